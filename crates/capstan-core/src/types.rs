//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Maximum length of stdout/stderr samples kept in a stage result
pub const SAMPLE_LEN: usize = 200;

/// Maximum length of the stderr excerpt shown for a failed deploy script
pub const STDERR_PREVIEW_LEN: usize = 500;

/// A local file to be uploaded to the deployment root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Path of the file on the local machine
    pub local_path: PathBuf,
    /// File name it takes under the remote deployment root
    pub remote_name: String,
    /// Size in bytes, recorded before the transfer starts
    pub size_bytes: u64,
}

impl Artifact {
    /// Absolute remote path of this artifact under the given root
    pub fn remote_path(&self, root: &str) -> String {
        format!("{}/{}", root.trim_end_matches('/'), self.remote_name)
    }
}

/// Named stages of the deployment pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageName {
    /// Verify local artifacts exist and record their sizes
    CheckLocal,
    /// Open the session and resolve the deployment root
    Connect,
    /// Upload artifacts with size verification
    Upload,
    /// Advisory remote preparation (permissions, listing)
    PrepareRemote,
    /// Run the deploy script with streamed output
    ExecuteDeploy,
    /// Advisory post-deploy checks
    Verify,
    /// Print the final report
    Summarize,
    /// Close the session; runs on every exit path
    Cleanup,
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageName::CheckLocal => "check-local",
            StageName::Connect => "connect",
            StageName::Upload => "upload",
            StageName::PrepareRemote => "prepare-remote",
            StageName::ExecuteDeploy => "execute-deploy",
            StageName::Verify => "verify",
            StageName::Summarize => "summarize",
            StageName::Cleanup => "cleanup",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of one pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageOutcome {
    /// Stage completed
    Success,
    /// Stage failed; for hard-fail stages this terminates the run
    Failure,
    /// Stage was not run (earlier failure or reduced pipeline variant)
    Skipped,
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOutcome::Success => write!(f, "success"),
            StageOutcome::Failure => write!(f, "failure"),
            StageOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

/// Record of one executed stage; the ordered sequence of these is the
/// run's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage this result belongs to
    pub stage: StageName,
    /// Outcome
    pub outcome: StageOutcome,
    /// Exit code of the stage's main remote command, if any
    pub exit_code: Option<i32>,
    /// Truncated stdout excerpt
    pub stdout_sample: String,
    /// Truncated stderr excerpt
    pub stderr_sample: String,
}

impl StageResult {
    /// A successful stage with no captured output
    pub fn success(stage: StageName) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Success,
            exit_code: None,
            stdout_sample: String::new(),
            stderr_sample: String::new(),
        }
    }

    /// A failed stage carrying an error detail in the stderr sample
    pub fn failure(stage: StageName, detail: impl AsRef<str>) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Failure,
            exit_code: None,
            stdout_sample: String::new(),
            stderr_sample: truncate_sample(detail.as_ref(), STDERR_PREVIEW_LEN),
        }
    }

    /// A stage that was never run
    pub fn skipped(stage: StageName) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Skipped,
            exit_code: None,
            stdout_sample: String::new(),
            stderr_sample: String::new(),
        }
    }

    /// Attach the exit code of the stage's main command
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Attach a truncated stdout excerpt
    pub fn with_stdout(mut self, stdout: &str) -> Self {
        self.stdout_sample = truncate_sample(stdout, SAMPLE_LEN);
        self
    }

    /// Attach a truncated stderr excerpt
    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr_sample = truncate_sample(stderr, STDERR_PREVIEW_LEN);
        self
    }
}

/// Progress of one in-flight upload; emitted repeatedly, never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes sent so far
    pub bytes_transferred: u64,
    /// Total bytes to send
    pub total_bytes: u64,
}

impl TransferProgress {
    /// Completion percentage in [0, 100]
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        ((self.bytes_transferred * 100) / self.total_bytes).min(100) as u8
    }
}

/// Truncate a sample to at most `max` bytes, respecting char boundaries
pub fn truncate_sample(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.trim_end().to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", s[..end].trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_name_display() {
        assert_eq!(format!("{}", StageName::CheckLocal), "check-local");
        assert_eq!(format!("{}", StageName::ExecuteDeploy), "execute-deploy");
        assert_eq!(format!("{}", StageName::Cleanup), "cleanup");
    }

    #[test]
    fn test_artifact_remote_path() {
        let artifact = Artifact {
            local_path: PathBuf::from("bundle.tar.gz"),
            remote_name: "bundle.tar.gz".to_string(),
            size_bytes: 1024,
        };
        assert_eq!(
            artifact.remote_path("/srv/app/"),
            "/srv/app/bundle.tar.gz"
        );
        assert_eq!(artifact.remote_path("/srv/app"), "/srv/app/bundle.tar.gz");
    }

    #[test]
    fn test_progress_percent() {
        let p = TransferProgress {
            bytes_transferred: 512,
            total_bytes: 2048,
        };
        assert_eq!(p.percent(), 25);

        let empty = TransferProgress {
            bytes_transferred: 0,
            total_bytes: 0,
        };
        assert_eq!(empty.percent(), 100);
    }

    #[test]
    fn test_truncate_sample_short_input_untouched() {
        assert_eq!(truncate_sample("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_sample_bounds_long_input() {
        let long = "x".repeat(1000);
        let truncated = truncate_sample(&long, STDERR_PREVIEW_LEN);
        assert_eq!(truncated.len(), STDERR_PREVIEW_LEN + 3);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_truncate_sample_respects_char_boundary() {
        // Multi-byte chars must not be split mid-sequence
        let s = "ééééé";
        let truncated = truncate_sample(s, 3);
        assert!(truncated.starts_with('é'));
    }

    #[test]
    fn test_stage_result_failure_bounds_detail() {
        let detail = "e".repeat(2000);
        let result = StageResult::failure(StageName::Upload, &detail);
        assert!(result.stderr_sample.len() <= STDERR_PREVIEW_LEN + 3);
        assert_eq!(result.outcome, StageOutcome::Failure);
    }
}
