//! The `deploy` subcommand: run the full pipeline

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use capstan_core::config::DeployConfig;
use capstan_engine::{EngineOps, PipelineController};

use crate::report::ConsoleReporter;

/// Run the deployment pipeline against the configured target.
///
/// Returns the process exit code: 0 when every hard-fail stage
/// succeeded, non-zero otherwise (including operator interrupt).
pub async fn deploy_command(
    config: &DeployConfig,
    upload_only: bool,
    cancel: CancellationToken,
) -> Result<i32> {
    config.validate().context("Invalid deployment config")?;

    let reporter = ConsoleReporter::new();
    let mut ops = EngineOps::new(config, &reporter, &reporter);
    let controller = PipelineController::new(&reporter, cancel, upload_only);

    let report = controller.run(&mut ops).await;
    reporter.render_summary(&report, config);

    Ok(if report.succeeded() { 0 } else { 1 })
}
