//! 로그 라인 조립 및 패턴 매칭 벤치마크
//!
//! 프레임 → 라인 조립, 라인 단위 정규식 평가 성능을 측정합니다.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use spire_testkit_runtime::LogChunk;
use spire_testkit_runtime::log_watcher::{LogCursor, compile_pattern};

const AGENT_LINE: &str = "time=\"2024-05-01T10:00:00Z\" level=debug msg=\"Fetched X.509 SVID\" \
    count=1 method=FetchX509SVID subsystem_name=endpoints";

fn agent_frames(lines: usize, frame_size: usize) -> Vec<LogChunk> {
    let mut text = String::new();
    for _ in 0..lines {
        text.push_str(AGENT_LINE);
        text.push('\n');
    }
    text.as_bytes()
        .chunks(frame_size)
        .enumerate()
        .map(|(i, bytes)| {
            if i % 3 == 0 {
                LogChunk::stderr(bytes)
            } else {
                LogChunk::stdout(bytes)
            }
        })
        .collect()
}

fn bench_line_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_assembly");

    for frame_size in [64usize, 512, 4096] {
        let frames = agent_frames(1_000, frame_size);
        group.throughput(Throughput::Elements(frames.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(frame_size),
            &frames,
            |b, frames| {
                b.iter(|| {
                    let mut cursor = LogCursor::new();
                    black_box(cursor.advance(black_box(frames), true))
                });
            },
        );
    }

    group.finish();
}

fn bench_pattern_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern_matching");
    group.throughput(Throughput::Elements(1));

    let svid_updated = compile_pattern(
        r#"msg="SVID updated" entry=[\w-]+ spiffe_id="spiffe://example\.com/workload" subsystem_name=cache_manager$"#,
    )
    .unwrap();
    let received = compile_pattern(r"Received [1-9]\d* svid after").unwrap();

    group.bench_function("agent_pattern_miss", |b| {
        b.iter(|| black_box(svid_updated.is_match(black_box(AGENT_LINE))));
    });

    let hit = "time=\"2024-05-01T10:00:01Z\" level=debug msg=\"SVID updated\" \
        entry=4a1c9d2e-7f3b-4b8e-9c1d-2e3f4a5b6c7d spiffe_id=\"spiffe://example.com/workload\" \
        subsystem_name=cache_manager";
    group.bench_function("agent_pattern_hit", |b| {
        b.iter(|| black_box(svid_updated.is_match(black_box(hit))));
    });

    group.bench_function("workload_pattern_hit", |b| {
        b.iter(|| black_box(received.is_match(black_box("Received 1 svid after 8.203ms"))));
    });

    group.finish();
}

criterion_group!(benches, bench_line_assembly, bench_pattern_matching);
criterion_main!(benches);
