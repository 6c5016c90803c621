//! Remote command execution
//!
//! Two modes over the session's exec channels:
//!
//! - **Buffered**: run a command, collect stdout/stderr, return the exit
//!   code. Bounded by a timeout; used for probing and advisory commands.
//! - **Streaming**: request a PTY so the remote process's line-buffered
//!   output arrives incrementally, deliver lines as they arrive, and
//!   capture the final exit code at stream end. Intentionally unbounded;
//!   used for the long-running deploy script.
//!
//! Commands are passed through verbatim; callers are responsible for
//! quoting path segments with spaces.

use std::collections::VecDeque;
use std::time::Duration;

use russh::client::Msg;
use russh::{Channel, ChannelMsg};

use capstan_core::error::ExecutionError;
use capstan_core::types::{truncate_sample, STDERR_PREVIEW_LEN};

use crate::session::Session;

/// Extended-data stream number carrying stderr
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Recent stdout lines kept for failure detail when stderr is empty
const RECENT_LINE_COUNT: usize = 5;

/// Result of one buffered remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code of the remote process
    pub exit_code: i32,
    /// Collected stdout
    pub stdout: String,
    /// Collected stderr
    pub stderr: String,
}

impl ExecOutput {
    /// The command completed with exit code 0
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Non-zero exit with empty stderr: "ran but reported nothing".
    /// Advisory callers may tolerate this softer signal.
    pub fn is_silent_failure(&self) -> bool {
        self.exit_code != 0 && self.stderr.trim().is_empty()
    }
}

/// Run a command and block until the remote process exits, collecting
/// its output. Fails with `ExecutionError` on transport loss or when the
/// bound elapses.
pub async fn run_buffered(
    session: &Session,
    command: &str,
    timeout: Duration,
) -> Result<ExecOutput, ExecutionError> {
    tracing::debug!("Running (buffered): {}", command);
    tokio::time::timeout(timeout, run_buffered_inner(session, command))
        .await
        .map_err(|_| ExecutionError::Timeout {
            seconds: timeout.as_secs(),
        })?
}

async fn run_buffered_inner(
    session: &Session,
    command: &str,
) -> Result<ExecOutput, ExecutionError> {
    let mut channel = session.open_exec_channel().await?;
    channel
        .exec(true, command)
        .await
        .map_err(|e| ExecutionError::TransportLost(e.to_string()))?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_code = None;

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
            ChannelMsg::ExtendedData { data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                stderr.extend_from_slice(&data)
            }
            ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status as i32),
            _ => {}
        }
    }

    let exit_code = exit_code.ok_or(ExecutionError::NoExitStatus)?;
    Ok(ExecOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}

/// Start a command with a PTY and return a stream of its output lines.
///
/// The stream is finite and not restartable; read lines until `None`,
/// then take the exit code from the finished stream.
pub async fn run_streaming(
    session: &Session,
    command: &str,
) -> Result<CommandStream, ExecutionError> {
    tracing::debug!("Running (streaming): {}", command);
    let channel = session.open_exec_channel().await?;

    // A PTY makes the remote side line-buffer its output instead of
    // withholding it until the process exits.
    channel
        .request_pty(true, "xterm", 200, 50, 0, 0, &[])
        .await
        .map_err(|e| ExecutionError::TransportLost(e.to_string()))?;
    channel
        .exec(true, command)
        .await
        .map_err(|e| ExecutionError::TransportLost(e.to_string()))?;

    Ok(CommandStream {
        channel,
        state: StreamState::new(),
    })
}

/// Lazy sequence of output lines from one streaming command
pub struct CommandStream {
    channel: Channel<Msg>,
    state: StreamState,
}

impl CommandStream {
    /// Next output line, in the order the remote process emitted them.
    /// Returns `None` once the stream has ended.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            if let Some(line) = self.state.pop_line() {
                return Some(line);
            }
            if self.state.finished {
                return self.state.take_remainder();
            }
            match self.channel.wait().await {
                Some(msg) => self.state.on_msg(msg),
                None => self.state.finished = true,
            }
        }
    }

    /// Exit code of the remote process; available once the stream ends
    pub fn exit_code(&self) -> Result<i32, ExecutionError> {
        if !self.state.finished {
            return Err(ExecutionError::NoExitStatus);
        }
        self.state.exit_code.ok_or(ExecutionError::NoExitStatus)
    }

    /// Failure detail for a non-zero exit: buffered stderr bounded to a
    /// fixed preview length, falling back to the last stdout lines when
    /// the PTY merged the streams.
    pub fn failure_detail(&self) -> String {
        if !self.state.stderr.trim().is_empty() {
            return truncate_sample(&self.state.stderr, STDERR_PREVIEW_LEN);
        }
        let recent: Vec<&str> = self.state.recent.iter().map(String::as_str).collect();
        truncate_sample(&recent.join("\n"), STDERR_PREVIEW_LEN)
    }
}

/// Channel-message handling for a streaming command, separated from the
/// channel itself so ordering and exit-code capture are unit-testable.
struct StreamState {
    assembler: LineAssembler,
    pending: VecDeque<String>,
    recent: VecDeque<String>,
    stderr: String,
    exit_code: Option<i32>,
    finished: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            assembler: LineAssembler::new(),
            pending: VecDeque::new(),
            recent: VecDeque::new(),
            stderr: String::new(),
            exit_code: None,
            finished: false,
        }
    }

    fn on_msg(&mut self, msg: ChannelMsg) {
        match msg {
            ChannelMsg::Data { data } => {
                for line in self.assembler.push(&data) {
                    self.remember(&line);
                    self.pending.push_back(line);
                }
            }
            ChannelMsg::ExtendedData { data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                if self.stderr.len() < STDERR_PREVIEW_LEN * 2 {
                    self.stderr.push_str(&String::from_utf8_lossy(&data));
                }
            }
            ChannelMsg::ExitStatus { exit_status } => {
                self.exit_code = Some(exit_status as i32);
            }
            ChannelMsg::Close => {
                self.finished = true;
            }
            _ => {}
        }
    }

    fn pop_line(&mut self) -> Option<String> {
        self.pending.pop_front()
    }

    /// Flush a final unterminated line once the stream has ended
    fn take_remainder(&mut self) -> Option<String> {
        let line = self.assembler.take_remainder()?;
        self.remember(&line);
        Some(line)
    }

    fn remember(&mut self, line: &str) {
        if self.recent.len() == RECENT_LINE_COUNT {
            self.recent.pop_front();
        }
        self.recent.push_back(line.to_string());
    }
}

/// Reassembles complete lines from arbitrarily-chunked byte input,
/// preserving emission order across chunk boundaries.
struct LineAssembler {
    buffer: Vec<u8>,
}

impl LineAssembler {
    fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Append a chunk and return the complete lines it finished
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            // PTYs translate newlines to CRLF
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// The unterminated tail, if any
    fn take_remainder(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        Some(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::CryptoVec;

    fn data(bytes: &[u8]) -> ChannelMsg {
        ChannelMsg::Data {
            data: CryptoVec::from_slice(bytes),
        }
    }

    fn stderr_data(bytes: &[u8]) -> ChannelMsg {
        ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(bytes),
            ext: SSH_EXTENDED_DATA_STDERR,
        }
    }

    #[test]
    fn test_assembler_splits_complete_lines() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"one\ntwo\nthree\n");
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert!(assembler.take_remainder().is_none());
    }

    #[test]
    fn test_assembler_preserves_order_across_chunk_boundaries() {
        let mut assembler = LineAssembler::new();
        let mut lines = assembler.push(b"instal");
        assert!(lines.is_empty());
        lines.extend(assembler.push(b"ling dependencies\nbuild"));
        lines.extend(assembler.push(b" done\n"));
        assert_eq!(lines, vec!["installing dependencies", "build done"]);
    }

    #[test]
    fn test_assembler_strips_pty_crlf() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"step 1\r\nstep 2\r\n");
        assert_eq!(lines, vec!["step 1", "step 2"]);
    }

    #[test]
    fn test_assembler_remainder_is_final_partial_line() {
        let mut assembler = LineAssembler::new();
        assembler.push(b"done\nno trailing newline");
        assert_eq!(
            assembler.take_remainder().as_deref(),
            Some("no trailing newline")
        );
        assert!(assembler.take_remainder().is_none());
    }

    #[test]
    fn test_stream_state_orders_lines_with_interleaved_stderr() {
        let mut state = StreamState::new();
        state.on_msg(data(b"line 1\n"));
        state.on_msg(stderr_data(b"npm: command not found\n"));
        state.on_msg(data(b"line 2\nline 3\n"));
        state.on_msg(ChannelMsg::ExitStatus { exit_status: 1 });
        state.on_msg(ChannelMsg::Close);

        assert_eq!(state.pop_line().as_deref(), Some("line 1"));
        assert_eq!(state.pop_line().as_deref(), Some("line 2"));
        assert_eq!(state.pop_line().as_deref(), Some("line 3"));
        assert!(state.pop_line().is_none());
        assert_eq!(state.exit_code, Some(1));
        assert!(state.finished);
        assert!(state.stderr.contains("npm: command not found"));
    }

    #[test]
    fn test_stream_state_exit_code_zero() {
        let mut state = StreamState::new();
        state.on_msg(data(b"deployed\n"));
        state.on_msg(ChannelMsg::ExitStatus { exit_status: 0 });
        state.on_msg(ChannelMsg::Close);
        assert_eq!(state.exit_code, Some(0));
    }

    #[test]
    fn test_stream_state_keeps_recent_lines_for_failure_detail() {
        let mut state = StreamState::new();
        for i in 0..10 {
            state.on_msg(data(format!("line {}\n", i).as_bytes()));
        }
        while state.pop_line().is_some() {}
        assert_eq!(state.recent.len(), RECENT_LINE_COUNT);
        assert_eq!(state.recent.back().map(String::as_str), Some("line 9"));
        assert_eq!(state.recent.front().map(String::as_str), Some("line 5"));
    }

    #[test]
    fn test_exec_output_silent_failure() {
        let silent = ExecOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "  ".to_string(),
        };
        assert!(silent.is_silent_failure());
        assert!(!silent.is_success());

        let loud = ExecOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "permission denied".to_string(),
        };
        assert!(!loud.is_silent_failure());

        let ok = ExecOutput {
            exit_code: 0,
            stdout: "fine".to_string(),
            stderr: String::new(),
        };
        assert!(ok.is_success());
        assert!(!ok.is_silent_failure());
    }
}
