//! 로그 감시 -- 컨테이너 출력에서 패턴을 기다리는 준비/검증 오라클
//!
//! # 매칭 규칙
//! - 패턴은 `regex` 크레이트 문법이며 **라인 단위**로 평가됩니다 (앵커 없음,
//!   `^`/`$`는 라인의 시작/끝).
//! - stdout과 stderr는 스트림별로 따로 라인을 조립하므로 교차 출력이 라인을 섞지 않습니다.
//! - `\r\n`은 `\n`으로 정규화됩니다.
//! - 개행 없는 마지막 조각은 컨테이너가 종료된 뒤에만 한 줄로 평가됩니다.
//! - 이미 읽은 프레임은 다음 폴링에서 건너뜁니다.
//!
//! 타임아웃이 지나면 마지막 `max_log_tail_lines` 라인을 담은
//! [`TimeoutError`]를 반환합니다. 컨테이너가 이미 종료되어 더 이상 출력이
//! 없으면 타임아웃을 기다리지 않고 즉시 반환합니다.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, warn};

use spire_testkit_core::error::{TestkitError, TimeoutError};
use spire_testkit_core::metrics as m;

use crate::config::RuntimeConfig;
use crate::docker::{ContainerRuntime, LogChunk};
use crate::launcher::RunningContainer;
use crate::spec::LogStream;

/// 패턴 + 타임아웃
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogAssertion {
    /// 정규식 패턴
    pub pattern: String,
    /// 대기 시간
    pub timeout: Duration,
}

impl LogAssertion {
    /// 새 조건을 생성합니다.
    pub fn new(pattern: impl Into<String>, timeout: Duration) -> Self {
        Self {
            pattern: pattern.into(),
            timeout,
        }
    }
}

/// 패턴과 일치한 라인
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched {
    /// 일치한 라인
    pub line: String,
    /// 라인이 나온 스트림
    pub stream: LogStream,
    /// 대기 시작부터 일치까지 걸린 시간
    pub elapsed: Duration,
    /// 위치 캡처 (0번은 전체 일치)
    pub captures: Vec<Option<String>>,
    /// 이름 있는 캡처
    pub named: BTreeMap<String, String>,
}

impl Matched {
    /// 위치 캡처를 반환합니다.
    pub fn capture(&self, index: usize) -> Option<&str> {
        self.captures.get(index).and_then(|c| c.as_deref())
    }

    /// 이름 있는 캡처를 반환합니다.
    pub fn named(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }
}

/// 출력 프레임을 스트림별 라인으로 조립하는 커서
///
/// 이미 소비한 프레임 수와 스트림별 미완성 라인을 기억합니다.
#[derive(Debug, Default)]
pub struct LogCursor {
    frames_seen: usize,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl LogCursor {
    /// 새 커서를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 지금까지 소비한 프레임 수
    pub fn frames_seen(&self) -> usize {
        self.frames_seen
    }

    /// 새 프레임을 소비하고 완성된 라인을 도착 순서대로 반환합니다.
    ///
    /// `finished`가 `true`이면 남은 미완성 라인도 반환합니다.
    pub fn advance(&mut self, chunks: &[LogChunk], finished: bool) -> Vec<(LogStream, String)> {
        let mut lines = Vec::new();

        for chunk in chunks.iter().skip(self.frames_seen) {
            let buf = match chunk.stream {
                LogStream::Stdout => &mut self.stdout,
                LogStream::Stderr => &mut self.stderr,
            };
            buf.extend_from_slice(&chunk.bytes);
            while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = buf.drain(..=pos).collect();
                lines.push((chunk.stream, decode_line(&raw[..pos])));
            }
        }
        self.frames_seen = self.frames_seen.max(chunks.len());

        if finished {
            for (stream, buf) in [
                (LogStream::Stdout, &mut self.stdout),
                (LogStream::Stderr, &mut self.stderr),
            ] {
                if !buf.is_empty() {
                    lines.push((stream, decode_line(buf)));
                    buf.clear();
                }
            }
        }

        lines
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// 패턴을 라인 단위 정규식으로 컴파일합니다.
pub fn compile_pattern(pattern: &str) -> Result<Regex, TestkitError> {
    Regex::new(pattern).map_err(|e| TestkitError::Pattern {
        pattern: pattern.to_owned(),
        reason: e.to_string(),
    })
}

fn to_matched(regex: &Regex, stream: LogStream, line: String, elapsed: Duration) -> Option<Matched> {
    let (captures, named) = {
        let caps = regex.captures(&line)?;
        let captures = caps
            .iter()
            .map(|c| c.map(|m| m.as_str().to_owned()))
            .collect();
        let named = regex
            .capture_names()
            .flatten()
            .filter_map(|name| caps.name(name).map(|m| (name.to_owned(), m.as_str().to_owned())))
            .collect();
        (captures, named)
    };
    Some(Matched {
        line,
        stream,
        elapsed,
        captures,
        named,
    })
}

/// 컨테이너 출력 폴링 감시기
#[derive(Debug, Clone)]
pub struct LogWatcher {
    poll_interval: Duration,
    max_tail_lines: usize,
}

impl LogWatcher {
    /// 런타임 설정에서 감시기를 생성합니다.
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_tail_lines: config.max_log_tail_lines.max(1),
        }
    }

    /// [`LogAssertion`]을 평가합니다.
    pub async fn wait_for<R: ContainerRuntime>(
        &self,
        container: &RunningContainer<R>,
        assertion: &LogAssertion,
    ) -> Result<Matched, TestkitError> {
        self.wait_for_pattern(container, &assertion.pattern, assertion.timeout)
            .await
    }

    /// 패턴과 일치하는 라인이 나올 때까지 폴링합니다.
    ///
    /// # Errors
    /// - 잘못된 정규식: [`TestkitError::Pattern`]
    /// - 시간 초과 또는 일치 없이 컨테이너 종료: [`TestkitError::Timeout`]
    /// - 런타임 호출 실패: [`TestkitError::Resource`]
    pub async fn wait_for_pattern<R: ContainerRuntime>(
        &self,
        container: &RunningContainer<R>,
        pattern: &str,
        timeout: Duration,
    ) -> Result<Matched, TestkitError> {
        let regex = compile_pattern(pattern)?;
        let started = Instant::now();
        let deadline = started + timeout;
        let mut cursor = LogCursor::new();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(self.max_tail_lines);

        debug!(container = %container.name(), pattern, ?timeout, "waiting for log pattern");

        loop {
            // 실행 여부를 먼저 확인해야 종료 직전 출력까지 이번 조회에 포함됩니다
            let running = container.is_running().await?;
            let chunks = container.logs().await?;

            for (stream, line) in cursor.advance(&chunks, !running) {
                if let Some(matched) = to_matched(&regex, stream, line.clone(), started.elapsed())
                {
                    metrics::counter!(m::LOG_WAITS_TOTAL, m::LABEL_RESULT => "matched")
                        .increment(1);
                    metrics::histogram!(m::LOG_WAIT_DURATION_SECONDS)
                        .record(matched.elapsed.as_secs_f64());
                    debug!(
                        container = %container.name(),
                        elapsed = ?matched.elapsed,
                        line = %matched.line,
                        "log pattern matched"
                    );
                    return Ok(matched);
                }
                if tail.len() == self.max_tail_lines {
                    tail.pop_front();
                }
                tail.push_back(line);
            }

            let now = Instant::now();
            if !running || now >= deadline {
                metrics::counter!(m::LOG_WAITS_TOTAL, m::LABEL_RESULT => "timeout").increment(1);
                metrics::histogram!(m::LOG_WAIT_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                warn!(
                    container = %container.name(),
                    pattern,
                    exited = !running,
                    "log pattern not observed"
                );
                return Err(TimeoutError {
                    container: container.name().to_owned(),
                    pattern: pattern.to_owned(),
                    timeout,
                    tail: tail.into_iter().collect(),
                }
                .into());
            }

            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
