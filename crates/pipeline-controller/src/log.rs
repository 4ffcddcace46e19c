//! Pipeline log streaming

use chrono::{DateTime, Local};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Output stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// One line of pipeline output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    pub stream: LogStream,
    pub received_at: DateTime<Local>,
}

impl LogLine {
    pub fn new(stream: LogStream, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            stream,
            received_at: Local::now(),
        }
    }
}

/// Events published by the controller for the presentation layer.
///
/// Every event names the run (pipeline pid) it belongs to. Events of an
/// earlier run can still be queued after a new run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A line of pipeline output, in production order
    Line { pid: u32, line: LogLine },
    /// Both output streams of the pipeline reached end-of-stream
    Exited { pid: u32 },
}

impl PipelineEvent {
    /// Pid of the run that produced the event
    pub fn pid(&self) -> u32 {
        match self {
            PipelineEvent::Line { pid, .. } | PipelineEvent::Exited { pid } => *pid,
        }
    }
}

/// Receiving side of the controller's event stream
pub type PipelineEvents = mpsc::Receiver<PipelineEvent>;

/// Append-only log shown to the user. Cleared only on request or on a new run.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    lines: Vec<LogLine>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: LogLine) {
        self.lines.push(line);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Log text as a single newline-joined block
    pub fn render(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Spawn the log-tail task for one pipeline run.
///
/// Lines from each stream are forwarded in order. Sends wait for channel
/// capacity, so a slow consumer delays reading instead of losing lines.
/// Every read and send races `cancel`; once cancelled the task ends without
/// publishing anything further.
fn spawn_log_tail(
    pid: u32,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    events: mpsc::Sender<PipelineEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout_open = stdout.is_some();
        let mut stderr_open = stderr.is_some();
        let mut stdout = stdout.map(|s| BufReader::new(s).lines());
        let mut stderr = stderr.map(|s| BufReader::new(s).lines());
        let mut forward = true;

        while stdout_open || stderr_open {
            let (stream, next) = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Log tail for pipeline {} cancelled", pid);
                    return;
                }
                line = next_line(&mut stdout), if stdout_open => (LogStream::Stdout, line),
                line = next_line(&mut stderr), if stderr_open => (LogStream::Stderr, line),
            };

            match next {
                Ok(Some(text)) => {
                    trace!("[{}] {}", pid, text);
                    if !forward {
                        continue;
                    }
                    let event = PipelineEvent::Line {
                        pid,
                        line: LogLine::new(stream, text),
                    };
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            debug!("Log tail for pipeline {} cancelled", pid);
                            return;
                        }
                        sent = events.send(event) => {
                            if sent.is_err() {
                                // Keep draining so the child never blocks on a full pipe
                                debug!("Pipeline event receiver dropped");
                                forward = false;
                            }
                        }
                    }
                }
                Ok(None) => match stream {
                    LogStream::Stdout => stdout_open = false,
                    LogStream::Stderr => stderr_open = false,
                },
                Err(e) => {
                    warn!("Failed to read pipeline {:?}: {}", stream, e);
                    match stream {
                        LogStream::Stdout => stdout_open = false,
                        LogStream::Stderr => stderr_open = false,
                    }
                }
            }
        }

        debug!("Pipeline {} output closed", pid);
        if forward {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = events.send(PipelineEvent::Exited { pid }) => {}
            }
        }
    })
}

/// A running log-tail task and its cancellation token
pub(crate) struct LogTail {
    pid: u32,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LogTail {
    pub(crate) fn spawn(
        pid: u32,
        stdout: Option<ChildStdout>,
        stderr: Option<ChildStderr>,
        events: mpsc::Sender<PipelineEvent>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = spawn_log_tail(pid, stdout, stderr, events, cancel.clone());
        Self { pid, cancel, task }
    }

    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    /// Stop publishing. The task ends at its next read or send.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel, then wait up to `grace` for the task before aborting it
    pub(crate) async fn shutdown(mut self, grace: Duration) {
        self.cancel.cancel();
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            warn!("Log tail for pipeline {} did not finish, aborting", self.pid);
            self.task.abort();
        }
    }
}

async fn next_line<R>(
    lines: &mut Option<tokio::io::Lines<BufReader<R>>>,
) -> std::io::Result<Option<String>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await,
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn spawn_sh(script: &str) -> tokio::process::Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[test]
    fn test_log_buffer_append_and_clear() {
        let mut buffer = LogBuffer::new();
        buffer.push(LogLine::new(LogStream::Stdout, "first"));
        buffer.push(LogLine::new(LogStream::Stderr, "second"));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.render(), "first\nsecond");

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.render(), "");
    }

    #[tokio::test]
    async fn test_tail_ordered_under_slow_consumer() {
        let mut child = spawn_sh(
            "i=1; while [ $i -le 300 ]; do echo line-$i; i=$((i+1)); done",
        );
        let pid = child.id().unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let task = spawn_log_tail(
            pid,
            child.stdout.take(),
            child.stderr.take(),
            tx,
            CancellationToken::new(),
        );

        let mut received = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::Line { pid: from, line } => {
                    assert_eq!(from, pid);
                    received.push(line.text);
                    if received.len() % 50 == 0 {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                }
                PipelineEvent::Exited { pid: exited } => {
                    assert_eq!(exited, pid);
                    break;
                }
            }
        }

        task.await.unwrap();
        child.wait().await.unwrap();

        let expected: Vec<String> = (1..=300).map(|i| format!("line-{}", i)).collect();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_tail_tags_stderr() {
        let mut child = spawn_sh("echo oops >&2");
        let pid = child.id().unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        spawn_log_tail(pid, child.stdout.take(), child.stderr.take(), tx, CancellationToken::new());

        match rx.recv().await {
            Some(PipelineEvent::Line { line, .. }) => {
                assert_eq!(line.text, "oops");
                assert_eq!(line.stream, LogStream::Stderr);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(rx.recv().await, Some(PipelineEvent::Exited { pid }));
        child.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_tail_stops_on_cancel_while_producing() {
        let mut child = spawn_sh("while true; do echo tick; done");
        let pid = child.id().unwrap();
        let (tx, mut rx) = mpsc::channel(2);
        let cancel = CancellationToken::new();
        let task = spawn_log_tail(pid, child.stdout.take(), child.stderr.take(), tx, cancel.clone());

        assert!(matches!(rx.recv().await, Some(PipelineEvent::Line { .. })));
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("log tail did not stop")
            .unwrap();

        // Drain whatever was queued before the cancel; the stream then closes
        while rx.recv().await.is_some() {}
        let _ = child.kill().await;
    }

    #[tokio::test]
    async fn test_shutdown_ends_tail_with_open_output() {
        // A background writer keeps stdout open after the shell returns
        let mut child = spawn_sh("(while true; do echo bg; sleep 0.05; done) & echo started");
        let pid = child.id().unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let tail = LogTail::spawn(pid, child.stdout.take(), child.stderr.take(), tx);
        assert_eq!(tail.pid(), pid);

        assert!(matches!(rx.recv().await, Some(PipelineEvent::Line { .. })));
        child.wait().await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), tail.shutdown(Duration::from_secs(1)))
            .await
            .expect("shutdown did not return");

        // Queued lines drain, then every sender is gone
        while rx.recv().await.is_some() {}
    }
}
