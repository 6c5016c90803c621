//! Staged deployment pipeline
//!
//! Fixed stage order: check-local → connect → upload(×N) →
//! prepare-remote → execute-deploy → verify → summarize, with an
//! always-run cleanup on every exit path, including operator interrupt.
//!
//! Only check-local, connect, upload, and execute-deploy are hard-fail
//! stages. prepare-remote and verify are composed of advisory
//! sub-commands whose failures are logged into the audit trail without
//! aborting the run: cosmetic checks must not abort a deployment that
//! otherwise succeeded.

use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use capstan_core::config::DeployConfig;
use capstan_core::error::{ConnectionError, DeployError, TransferError};
use capstan_core::types::{truncate_sample, Artifact, StageName, StageResult, SAMPLE_LEN};

use crate::exec;
use crate::resolve::resolve_root;
use crate::session::Session;
use crate::transfer::{self, TransferObserver, TransferReceipt};

/// Number of operator-visible pipeline steps (cleanup reported apart)
const PIPELINE_STEPS: usize = 7;

/// Stages in operator-visible order, used to mark skipped work
const STAGE_ORDER: [StageName; 7] = [
    StageName::CheckLocal,
    StageName::Connect,
    StageName::Upload,
    StageName::PrepareRemote,
    StageName::ExecuteDeploy,
    StageName::Verify,
    StageName::Summarize,
];

/// Which pipeline variant a run executed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    /// Upload, then execute the deploy script remotely
    Full,
    /// Upload only; the operator runs the deploy script by hand.
    /// Selected when the host refuses command execution.
    UploadOnly,
}

/// What the connect stage learned about the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOutcome {
    /// The confirmed deployment root
    pub resolved_root: String,
    /// Whether the host accepted the exec-capability probe
    pub can_execute_commands: bool,
}

/// Result of one advisory sub-command
#[derive(Debug, Clone)]
pub struct AdvisoryOutcome {
    /// Command text as sent
    pub command: String,
    /// Exit code, if the command ran at all
    pub exit_code: Option<i32>,
    /// Bounded output or error detail
    pub detail: String,
    /// Exit code was zero
    pub ok: bool,
}

/// Progress sink for the pipeline; the CLI installs a console reporter,
/// tests a recording one.
pub trait PipelineReporter: Send + Sync {
    /// A stage is about to attempt its action
    fn stage_started(&self, stage: StageName, step: usize, total: usize);

    /// A stage finished, with its audit record
    fn stage_finished(&self, result: &StageResult);

    /// Informational progress line within a stage
    fn info(&self, message: &str);

    /// One streamed line of deploy-script output
    fn deploy_output(&self, line: &str);
}

/// Stage bodies, separated from stage sequencing.
///
/// The production implementation is [`EngineOps`]; tests drive the
/// controller with recording fakes to pin the ordering, hard/advisory
/// asymmetry, and cleanup-exactly-once properties.
#[async_trait]
pub trait DeployOps: Send {
    /// Verify local artifacts exist; record their sizes
    async fn check_local(&mut self) -> Result<Vec<Artifact>, DeployError>;

    /// Open the session, probe exec capability, resolve the root
    async fn connect(&mut self) -> Result<ConnectOutcome, DeployError>;

    /// Upload one artifact with size verification
    async fn upload(&mut self, artifact: &Artifact) -> Result<TransferReceipt, DeployError>;

    /// Advisory remote preparation
    async fn prepare_remote(&mut self) -> Vec<AdvisoryOutcome>;

    /// Run the deploy script, streaming its output
    async fn execute_deploy(&mut self) -> Result<(), DeployError>;

    /// Advisory post-deploy checks
    async fn verify(&mut self) -> Vec<AdvisoryOutcome>;

    /// Release the session; must be safe to call exactly once on every
    /// exit path
    async fn cleanup(&mut self);
}

/// Audit trail and outcome of one run
#[derive(Debug)]
pub struct RunReport {
    /// Variant that was executed
    pub mode: PipelineMode,
    /// Deployment root, once the connect stage resolved it
    pub root: Option<String>,
    /// Ordered stage results
    pub results: Vec<StageResult>,
    /// Terminal error, if the run failed
    pub error: Option<DeployError>,
}

impl RunReport {
    /// All hard-fail stages succeeded
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Sequences the stages of one deployment run
pub struct PipelineController<'a> {
    reporter: &'a dyn PipelineReporter,
    cancel: CancellationToken,
    force_upload_only: bool,
}

impl<'a> PipelineController<'a> {
    pub fn new(
        reporter: &'a dyn PipelineReporter,
        cancel: CancellationToken,
        force_upload_only: bool,
    ) -> Self {
        Self {
            reporter,
            cancel,
            force_upload_only,
        }
    }

    /// Run the pipeline to completion or first hard failure.
    ///
    /// Cleanup runs exactly once on every exit path, including
    /// cancellation mid-stage.
    pub async fn run(&self, ops: &mut dyn DeployOps) -> RunReport {
        let mut results = Vec::new();
        let mut mode = PipelineMode::Full;
        let mut root = None;

        let error = match self.run_stages(ops, &mut results, &mut mode, &mut root).await {
            Ok(()) => None,
            Err(e) => {
                mark_unreached_skipped(&mut results);
                Some(e)
            }
        };

        self.reporter.info("Closing session");
        ops.cleanup().await;
        results.push(StageResult::success(StageName::Cleanup));

        RunReport {
            mode,
            root,
            results,
            error,
        }
    }

    async fn run_stages(
        &self,
        ops: &mut dyn DeployOps,
        results: &mut Vec<StageResult>,
        mode: &mut PipelineMode,
        root: &mut Option<String>,
    ) -> Result<(), DeployError> {
        // [1/7] check-local
        self.reporter
            .stage_started(StageName::CheckLocal, 1, PIPELINE_STEPS);
        let artifacts = match self.guard(ops.check_local()).await {
            Ok(Ok(artifacts)) => artifacts,
            Ok(Err(e)) | Err(e) => return self.fail(results, StageName::CheckLocal, e),
        };
        self.finish(results, StageResult::success(StageName::CheckLocal));

        // [2/7] connect (session, capability probe, root resolution)
        self.reporter
            .stage_started(StageName::Connect, 2, PIPELINE_STEPS);
        let connected = match self.guard(ops.connect()).await {
            Ok(Ok(connected)) => connected,
            Ok(Err(e)) | Err(e) => return self.fail(results, StageName::Connect, e),
        };
        self.reporter
            .info(&format!("Deployment root: {}", connected.resolved_root));
        *root = Some(connected.resolved_root.clone());
        if self.force_upload_only || !connected.can_execute_commands {
            *mode = PipelineMode::UploadOnly;
        }
        self.finish(results, StageResult::success(StageName::Connect));

        // [3/7] upload, one artifact at a time, halting on the first
        // failure — uploads are never retried
        self.reporter
            .stage_started(StageName::Upload, 3, PIPELINE_STEPS);
        for artifact in &artifacts {
            self.reporter.info(&format!(
                "Uploading {} ({} bytes)",
                artifact.remote_name, artifact.size_bytes
            ));
            match self.guard(ops.upload(artifact)).await {
                Ok(Ok(receipt)) => self.reporter.info(&format!(
                    "Verified {} ({} bytes)",
                    receipt.remote_path, receipt.remote_size
                )),
                Ok(Err(e)) | Err(e) => return self.fail(results, StageName::Upload, e),
            }
        }
        self.finish(results, StageResult::success(StageName::Upload));

        match *mode {
            PipelineMode::Full => {
                // [4/7] prepare-remote (advisory)
                self.reporter
                    .stage_started(StageName::PrepareRemote, 4, PIPELINE_STEPS);
                let reports = match self.guard(ops.prepare_remote()).await {
                    Ok(reports) => reports,
                    Err(e) => return self.fail(results, StageName::PrepareRemote, e),
                };
                self.finish(results, advisory_result(StageName::PrepareRemote, &reports));

                // [5/7] execute-deploy
                self.reporter
                    .stage_started(StageName::ExecuteDeploy, 5, PIPELINE_STEPS);
                match self.guard(ops.execute_deploy()).await {
                    Ok(Ok(())) => self.finish(
                        results,
                        StageResult::success(StageName::ExecuteDeploy).with_exit_code(0),
                    ),
                    Ok(Err(e)) | Err(e) => {
                        return self.fail(results, StageName::ExecuteDeploy, e)
                    }
                }

                // [6/7] verify (advisory)
                self.reporter
                    .stage_started(StageName::Verify, 6, PIPELINE_STEPS);
                let reports = match self.guard(ops.verify()).await {
                    Ok(reports) => reports,
                    Err(e) => return self.fail(results, StageName::Verify, e),
                };
                self.finish(results, advisory_result(StageName::Verify, &reports));
            }
            PipelineMode::UploadOnly => {
                self.reporter.info(
                    "Remote command execution unavailable; artifacts staged for manual deployment",
                );
                results.push(StageResult::skipped(StageName::PrepareRemote));
                results.push(StageResult::skipped(StageName::ExecuteDeploy));
                results.push(StageResult::skipped(StageName::Verify));
            }
        }

        // [7/7] summarize — rendering happens in the caller, from the report
        self.reporter
            .stage_started(StageName::Summarize, 7, PIPELINE_STEPS);
        self.finish(results, StageResult::success(StageName::Summarize));

        Ok(())
    }

    /// Race a stage future against operator cancellation
    async fn guard<T>(&self, fut: impl Future<Output = T>) -> Result<T, DeployError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DeployError::Interrupted),
            value = fut => Ok(value),
        }
    }

    fn finish(&self, results: &mut Vec<StageResult>, result: StageResult) {
        self.reporter.stage_finished(&result);
        results.push(result);
    }

    fn fail(
        &self,
        results: &mut Vec<StageResult>,
        stage: StageName,
        error: DeployError,
    ) -> Result<(), DeployError> {
        let mut result = StageResult::failure(stage, error.to_string());
        if let DeployError::DeployScriptFailed { exit_code, detail } = &error {
            result = result.with_exit_code(*exit_code).with_stderr(detail);
        }
        self.reporter.stage_finished(&result);
        results.push(result);
        Err(error)
    }
}

/// Fold advisory sub-command outcomes into one stage record.
///
/// The stage itself is always a success; failing sub-commands are kept
/// in the samples so the summary can surface them.
fn advisory_result(stage: StageName, reports: &[AdvisoryOutcome]) -> StageResult {
    let summary: Vec<String> = reports
        .iter()
        .map(|r| match r.exit_code {
            Some(0) => format!("{}: ok", r.command),
            Some(code) => format!("{}: exit {}", r.command, code),
            None => format!("{}: did not run", r.command),
        })
        .collect();
    let first_failure = reports
        .iter()
        .find(|r| !r.ok)
        .map(|r| r.detail.clone())
        .unwrap_or_default();

    let mut result = StageResult::success(stage).with_stdout(&summary.join("; "));
    result.stderr_sample = truncate_sample(&first_failure, SAMPLE_LEN);
    result
}

/// Append skipped records for every stage a failed run never reached
fn mark_unreached_skipped(results: &mut Vec<StageResult>) {
    for stage in STAGE_ORDER {
        if !results.iter().any(|r| r.stage == stage) {
            results.push(StageResult::skipped(stage));
        }
    }
}

/// Production stage bodies: wires [`Session`], root resolution,
/// [`transfer`], and [`exec`] together for one run.
pub struct EngineOps<'a> {
    config: &'a DeployConfig,
    reporter: &'a dyn PipelineReporter,
    observer: &'a dyn TransferObserver,
    session: Option<Session>,
    root: Option<String>,
}

impl<'a> EngineOps<'a> {
    pub fn new(
        config: &'a DeployConfig,
        reporter: &'a dyn PipelineReporter,
        observer: &'a dyn TransferObserver,
    ) -> Self {
        Self {
            config,
            reporter,
            observer,
            session: None,
            root: None,
        }
    }

    fn session_and_root(&self) -> Result<(&Session, &str), DeployError> {
        let session = self
            .session
            .as_ref()
            .ok_or(ConnectionError::SessionClosed)?;
        let root = self
            .root
            .as_deref()
            .ok_or(ConnectionError::SessionClosed)?;
        Ok((session, root))
    }

    async fn run_advisory(&self, commands: &[String]) -> Vec<AdvisoryOutcome> {
        let Ok((session, _)) = self.session_and_root() else {
            return Vec::new();
        };

        let mut reports = Vec::new();
        for command in commands {
            self.reporter.info(command);
            match exec::run_buffered(session, command, self.config.target.command_timeout).await {
                Ok(output) => {
                    if output.is_success() {
                        for line in output.stdout.lines().take(5) {
                            self.reporter.info(&format!("  {}", line));
                        }
                    } else if output.is_silent_failure() {
                        // Ran but reported nothing; tolerated for
                        // advisory commands
                        self.reporter
                            .info(&format!("  exit {} (no output)", output.exit_code));
                    } else {
                        self.reporter.info(&format!(
                            "  exit {}: {}",
                            output.exit_code,
                            truncate_sample(&output.stderr, SAMPLE_LEN)
                        ));
                    }
                    reports.push(AdvisoryOutcome {
                        command: command.clone(),
                        exit_code: Some(output.exit_code),
                        detail: truncate_sample(&output.stderr, SAMPLE_LEN),
                        ok: output.is_success(),
                    });
                }
                Err(e) => {
                    tracing::warn!("Advisory command failed to run: {}", e);
                    reports.push(AdvisoryOutcome {
                        command: command.clone(),
                        exit_code: None,
                        detail: e.to_string(),
                        ok: false,
                    });
                }
            }
        }
        reports
    }
}

#[async_trait]
impl DeployOps for EngineOps<'_> {
    async fn check_local(&mut self) -> Result<Vec<Artifact>, DeployError> {
        let mut artifacts = Vec::new();
        for spec in &self.config.artifacts {
            let metadata = tokio::fs::metadata(&spec.local_path).await.map_err(|e| {
                TransferError::LocalRead {
                    path: spec.local_path.clone(),
                    detail: e.to_string(),
                }
            })?;
            let artifact = Artifact {
                local_path: spec.local_path.clone(),
                remote_name: spec.remote_name(),
                size_bytes: metadata.len(),
            };
            self.reporter.info(&format!(
                "{} ({} bytes)",
                artifact.local_path.display(),
                artifact.size_bytes
            ));
            artifacts.push(artifact);
        }
        Ok(artifacts)
    }

    async fn connect(&mut self) -> Result<ConnectOutcome, DeployError> {
        let target = self.config.target.clone();
        self.reporter
            .info(&format!("Connecting to {}@{}", target.user, target.address()));

        let mut session = Session::open(&target).await?;
        let can_execute_commands = session.detect_exec_capability().await;

        // Stored before resolution so cleanup closes it even when no
        // candidate root exists
        self.session = Some(session);
        let session = self
            .session
            .as_ref()
            .ok_or(ConnectionError::SessionClosed)?;

        let resolution = resolve_root(session, &target.candidate_roots).await?;
        self.root = Some(resolution.root.clone());

        Ok(ConnectOutcome {
            resolved_root: resolution.root,
            can_execute_commands,
        })
    }

    async fn upload(&mut self, artifact: &Artifact) -> Result<TransferReceipt, DeployError> {
        let (session, root) = self.session_and_root()?;
        let receipt = transfer::upload(session, artifact, root, self.observer).await?;
        Ok(receipt)
    }

    async fn prepare_remote(&mut self) -> Vec<AdvisoryOutcome> {
        let Ok((_, root)) = self.session_and_root() else {
            return Vec::new();
        };
        let commands = vec![
            format!("ls -lh {} | head -10", root),
            format!("chmod +x {}/{}", root, self.config.deploy.script),
        ];
        self.run_advisory(&commands).await
    }

    async fn execute_deploy(&mut self) -> Result<(), DeployError> {
        let (session, root) = self.session_and_root()?;
        let command = format!("cd {} && bash ./{}", root, self.config.deploy.script);
        self.reporter.info(&command);

        let mut stream = exec::run_streaming(session, &command).await?;
        while let Some(line) = stream.next_line().await {
            self.reporter.deploy_output(&line);
        }

        let exit_code = stream.exit_code()?;
        if exit_code != 0 {
            return Err(DeployError::DeployScriptFailed {
                exit_code,
                detail: stream.failure_detail(),
            });
        }
        Ok(())
    }

    async fn verify(&mut self) -> Vec<AdvisoryOutcome> {
        let Ok((_, root)) = self.session_and_root() else {
            return Vec::new();
        };
        let commands = vec![
            "pm2 status".to_string(),
            format!("pm2 describe {}", self.config.deploy.app_name),
            format!("ls -lh {} | head -10", root),
        ];
        self.run_advisory(&commands).await
    }

    async fn cleanup(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}
