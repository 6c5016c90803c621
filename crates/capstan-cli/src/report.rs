//! Console rendering of pipeline progress and the final report

use std::sync::atomic::{AtomicBool, Ordering};

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use capstan_core::config::DeployConfig;
use capstan_core::types::{
    truncate_sample, StageName, StageOutcome, StageResult, TransferProgress,
};
use capstan_engine::{PipelineMode, PipelineReporter, RunReport, TransferObserver};

use crate::output::{
    finish_progress_line, format_size, print_error, print_info, print_progress_line, print_step,
    print_success, print_warning,
};

/// Renders pipeline progress to the terminal.
///
/// Implements both the pipeline's reporter and the transfer observer, so
/// one value drives stage banners and the in-place upload percentage.
pub struct ConsoleReporter {
    progress_open: AtomicBool,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            progress_open: AtomicBool::new(false),
        }
    }

    fn close_progress_line(&self) {
        if self.progress_open.swap(false, Ordering::Relaxed) {
            finish_progress_line();
        }
    }

    /// Render the final report: audit table, then either the failure
    /// detail or the access URLs and follow-up commands.
    pub fn render_summary(&self, report: &RunReport, config: &DeployConfig) {
        self.close_progress_line();

        println!();
        println!("{}", format_results(&report.results));

        match &report.error {
            Some(error) => {
                print_error(&format!("Deployment failed: {}", error));
                return;
            }
            None => print_success("Deployment pipeline complete"),
        }

        if report.mode == PipelineMode::UploadOnly {
            let root = report.root.as_deref().unwrap_or("<deployment root>");
            print_warning("Remote command execution is unavailable on this host.");
            print_info("Artifacts were uploaded; finish the deployment manually:");
            println!("   1. Open an SSH terminal or the host's file manager");
            println!("   2. cd {}", root);
            println!(
                "   3. chmod +x {} && ./{}",
                config.deploy.script, config.deploy.script
            );
            return;
        }

        let host = &config.target.host;
        println!();
        print_info("Application access:");
        println!("   Frontend: http://{}", host);
        println!("   API:      http://{}:{}", host, config.deploy.api_port);
        println!();
        print_info("Follow-up commands:");
        println!("   ssh {}@{}", config.target.user, host);
        println!("   pm2 status");
        println!("   pm2 logs {}", config.deploy.app_name);
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineReporter for ConsoleReporter {
    fn stage_started(&self, stage: StageName, step: usize, total: usize) {
        self.close_progress_line();
        print_step(step, total, stage_title(stage));
    }

    fn stage_finished(&self, result: &StageResult) {
        self.close_progress_line();
        match result.outcome {
            StageOutcome::Success => {
                print_success(&format!("{} complete", result.stage));
            }
            StageOutcome::Failure => {
                print_error(&format!("{} failed: {}", result.stage, result.stderr_sample));
            }
            StageOutcome::Skipped => {}
        }
    }

    fn info(&self, message: &str) {
        self.close_progress_line();
        println!("   {}", message);
    }

    fn deploy_output(&self, line: &str) {
        self.close_progress_line();
        println!("   {}", line);
    }
}

impl TransferObserver for ConsoleReporter {
    fn on_progress(&self, progress: TransferProgress) {
        self.progress_open.store(true, Ordering::Relaxed);
        print_progress_line(&format!(
            "Progress: {}% ({} / {})",
            progress.percent(),
            format_size(progress.bytes_transferred),
            format_size(progress.total_bytes)
        ));
        if progress.bytes_transferred >= progress.total_bytes {
            self.close_progress_line();
        }
    }
}

/// Human-readable title for a stage banner
fn stage_title(stage: StageName) -> &'static str {
    match stage {
        StageName::CheckLocal => "Checking local artifacts",
        StageName::Connect => "Connecting to target",
        StageName::Upload => "Uploading artifacts",
        StageName::PrepareRemote => "Preparing remote environment",
        StageName::ExecuteDeploy => "Executing deploy script",
        StageName::Verify => "Verifying deployment",
        StageName::Summarize => "Summary",
        StageName::Cleanup => "Cleaning up",
    }
}

/// Format the audit trail as an ASCII table
fn format_results(results: &[StageResult]) -> String {
    #[derive(Tabled)]
    struct StageRow {
        #[tabled(rename = "STAGE")]
        stage: String,
        #[tabled(rename = "OUTCOME")]
        outcome: String,
        #[tabled(rename = "EXIT")]
        exit: String,
        #[tabled(rename = "DETAIL")]
        detail: String,
    }

    let rows: Vec<StageRow> = results
        .iter()
        .map(|r| StageRow {
            stage: r.stage.to_string(),
            outcome: r.outcome.to_string(),
            exit: r
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
            detail: if r.stderr_sample.is_empty() {
                truncate_sample(&r.stdout_sample, 48)
            } else {
                truncate_sample(&r.stderr_sample, 48)
            },
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(100))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_results_includes_every_stage() {
        let results = vec![
            StageResult::success(StageName::CheckLocal),
            StageResult::failure(StageName::Upload, "size mismatch"),
            StageResult::skipped(StageName::ExecuteDeploy),
        ];
        let table = format_results(&results);
        assert!(table.contains("check-local"));
        assert!(table.contains("upload"));
        assert!(table.contains("execute-deploy"));
        assert!(table.contains("failure"));
        assert!(table.contains("size mismatch"));
        assert!(table.contains("skipped"));
    }

    #[test]
    fn test_stage_titles_are_distinct() {
        let titles = [
            stage_title(StageName::CheckLocal),
            stage_title(StageName::Connect),
            stage_title(StageName::Upload),
            stage_title(StageName::PrepareRemote),
            stage_title(StageName::ExecuteDeploy),
            stage_title(StageName::Verify),
            stage_title(StageName::Summarize),
            stage_title(StageName::Cleanup),
        ];
        let mut unique: Vec<&str> = titles.to_vec();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), titles.len());
    }
}
