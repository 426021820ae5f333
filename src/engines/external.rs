// Copyright 2024 Felix Engl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::config::ExternalEngineConfig;
use crate::engines::{EngineError, ProgressCounters};
use crate::runtime::Shutdown;
use regex::Regex;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;

fn link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"https?://[^\s"'<>]+"#).unwrap())
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap())
}

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\+?\d[\d\s().-]{6,}\d").unwrap())
}

fn depth_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)depth[:=\s]+(\d+)").unwrap())
}

/// How a subprocess run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubprocessOutcome {
    Completed,
    Cancelled,
}

/// One external engine invocation.
#[derive(Debug)]
pub struct SubprocessSpec {
    pub config: ExternalEngineConfig,
    /// Request-specific flags appended after the configured arguments.
    pub extra_args: Vec<String>,
    pub timeout: Duration,
    /// Scan stdout lines for links, emails, phones and depth markers to
    /// feed the live counters.
    pub scan_stdout: bool,
}

/// Runs the engine under its wall-clock budget, streaming stdout/stderr
/// into the log. Cancellation kills the child and reports
/// [SubprocessOutcome::Cancelled], the caller must not touch the artifact
/// in that case.
pub async fn run_subprocess(
    spec: &SubprocessSpec,
    counters: &Arc<ProgressCounters>,
    shutdown: &Shutdown,
) -> Result<SubprocessOutcome, EngineError> {
    let mut child = Command::new(&spec.config.program)
        .args(&spec.config.args)
        .args(&spec.extra_args)
        .current_dir(spec.config.workdir.as_std_path())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| EngineError::Spawn {
            program: spec.config.program.clone(),
            source,
        })?;

    let stdout_task = child.stdout.take().map(|stdout| {
        let counters = Arc::clone(counters);
        let scan = spec.scan_stdout;
        tokio::spawn(pump_lines(stdout, move |line| {
            log::debug!("engine stdout: {line}");
            if scan {
                scan_line(&line, &counters);
            }
        }))
    });
    let stderr_task = child.stderr.take().map(|stderr| {
        tokio::spawn(pump_lines(stderr, |line| {
            log::info!("engine stderr: {line}");
        }))
    });

    enum WaitEvent {
        Exited(std::io::Result<std::process::ExitStatus>),
        Cancelled,
        TimedOut,
    }

    let event = tokio::select! {
        status = child.wait() => WaitEvent::Exited(status),
        _ = shutdown.wait() => WaitEvent::Cancelled,
        _ = tokio::time::sleep(spec.timeout) => WaitEvent::TimedOut,
    };
    let outcome = match event {
        WaitEvent::Exited(status) => {
            let status = status?;
            if status.success() {
                Ok(SubprocessOutcome::Completed)
            } else {
                Err(EngineError::NonZeroExit(status))
            }
        }
        WaitEvent::Cancelled => {
            log::info!("cancelling {}", spec.config.program);
            child.start_kill().ok();
            child.wait().await.ok();
            Ok(SubprocessOutcome::Cancelled)
        }
        WaitEvent::TimedOut => {
            child.start_kill().ok();
            child.wait().await.ok();
            Err(EngineError::Timeout(spec.timeout))
        }
    };

    if let Some(task) = stdout_task {
        task.await.ok();
    }
    if let Some(task) = stderr_task {
        task.await.ok();
    }
    outcome
}

async fn pump_lines<R: AsyncRead + Unpin>(reader: R, mut on_line: impl FnMut(String)) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        on_line(line);
    }
}

/// Feeds the live counters from one stdout line of a scanning engine.
fn scan_line(line: &str, counters: &ProgressCounters) {
    for _ in link_pattern().find_iter(line) {
        counters.record_link();
    }
    for _ in email_pattern().find_iter(line) {
        counters.record_email();
    }
    let without_links = link_pattern().replace_all(line, "");
    for _ in phone_pattern().find_iter(&without_links) {
        counters.record_phone();
    }
    if let Some(captures) = depth_pattern().captures(line) {
        if let Ok(depth) = captures[1].parse::<u64>() {
            counters.record_depth(depth);
        }
    }
}

/// A bounded TCP connect against the Tor SOCKS endpoint. The subprocess
/// engines route through it themselves, this only fails fast when Tor is
/// not up at all.
pub async fn probe_socks(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}
