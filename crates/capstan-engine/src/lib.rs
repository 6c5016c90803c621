//! capstan-engine: The deployment pipeline engine
//!
//! Drives one stateless deployment run against one target host: opens the
//! SSH session and its SFTP sub-channel, resolves the deployment root from
//! candidate paths, uploads artifacts with progress and size verification,
//! executes remote commands (buffered or streamed), and sequences it all
//! through a staged pipeline with partial-failure handling and cleanup.

pub mod exec;
pub mod pipeline;
pub mod resolve;
pub mod session;
pub mod transfer;

pub use exec::{CommandStream, ExecOutput};
pub use pipeline::{
    AdvisoryOutcome, ConnectOutcome, DeployOps, EngineOps, PipelineController, PipelineMode,
    PipelineReporter, RunReport,
};
pub use resolve::{resolve_root, PathProbe, Resolution};
pub use session::{Session, SessionState};
pub use transfer::{NoopObserver, TransferObserver, TransferReceipt};
