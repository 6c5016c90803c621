//! SSH session lifecycle
//!
//! A `Session` owns one authenticated SSH connection and, derived from it,
//! one SFTP sub-channel. Both are exclusively owned by the pipeline for the
//! run's duration and closed exactly once, on every exit path.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use russh_sftp::client::SftpSession;

use capstan_core::config::{AuthMethod, DeploymentTarget};
use capstan_core::error::{ConnectionError, ExecutionError};

use crate::resolve::PathProbe;

/// Bound for the exec-capability probe; kept short since a host that
/// supports command execution answers a trivial exec immediately.
const CAPABILITY_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection
    Closed,
    /// Connection being established
    Connecting,
    /// Authenticated and usable
    Open,
    /// Establishment failed; never usable again
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Closed => write!(f, "closed"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Open => write!(f, "open"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// One authenticated SSH connection plus its SFTP sub-channel
pub struct Session {
    handle: Option<Handle<ClientHandler>>,
    sftp: Option<SftpSession>,
    state: SessionState,
    can_execute_commands: bool,
}

impl Session {
    /// A session that was never opened; `close` on it is a no-op
    pub fn new() -> Self {
        Self {
            handle: None,
            sftp: None,
            state: SessionState::Closed,
            can_execute_commands: false,
        }
    }

    /// Open an authenticated session to the target and derive the SFTP
    /// sub-channel from it.
    ///
    /// The connection attempt is bounded by the target's
    /// `connect_timeout`. Bad credentials and network failure map to
    /// distinct error variants; both are terminal. If SFTP derivation
    /// fails, the partially-established connection is disconnected before
    /// the error propagates.
    pub async fn open(target: &DeploymentTarget) -> Result<Self, ConnectionError> {
        let mut session = Self::new();
        session.state = SessionState::Connecting;

        match session.establish(target).await {
            Ok(()) => {
                session.state = SessionState::Open;
                tracing::info!("Session open to {}", target.address());
                Ok(session)
            }
            Err(e) => {
                session.abandon().await;
                Err(e)
            }
        }
    }

    async fn establish(&mut self, target: &DeploymentTarget) -> Result<(), ConnectionError> {
        let address = target.address();
        let config = Arc::new(client::Config::default());

        tracing::debug!("Connecting to {}", address);
        let handle = tokio::time::timeout(
            target.connect_timeout,
            client::connect(config, address.as_str(), ClientHandler),
        )
        .await
        .map_err(|_| ConnectionError::Timeout {
            address: address.clone(),
            seconds: target.connect_timeout.as_secs(),
        })?
        .map_err(|e| ConnectionError::Unreachable {
            address: address.clone(),
            detail: e.to_string(),
        })?;

        // Stored before authentication so every error path below tears
        // the connection down through `abandon`
        self.handle = Some(handle);
        let handle = self
            .handle
            .as_mut()
            .ok_or(ConnectionError::SessionClosed)?;

        tracing::debug!("Authenticating as '{}'", target.user);
        let authenticated = match &target.auth {
            AuthMethod::Password { .. } => {
                let password = target.auth.resolved_password().ok_or_else(|| {
                    ConnectionError::AuthenticationFailed {
                        user: target.user.clone(),
                        address: address.clone(),
                    }
                })?;
                handle
                    .authenticate_password(&target.user, password)
                    .await
                    .map_err(|e| ConnectionError::Unreachable {
                        address: address.clone(),
                        detail: e.to_string(),
                    })?
            }
            AuthMethod::PrivateKey { key_path } => {
                let key = russh_keys::load_secret_key(key_path, None).map_err(|e| {
                    ConnectionError::KeyLoad {
                        path: key_path.clone(),
                        detail: e.to_string(),
                    }
                })?;
                handle
                    .authenticate_publickey(&target.user, Arc::new(key))
                    .await
                    .map_err(|e| ConnectionError::Unreachable {
                        address: address.clone(),
                        detail: e.to_string(),
                    })?
            }
        };

        if !authenticated {
            return Err(ConnectionError::AuthenticationFailed {
                user: target.user.clone(),
                address,
            });
        }

        self.sftp = Some(self.derive_sftp().await?);
        Ok(())
    }

    /// Derive the file-transfer sub-channel from the authenticated
    /// connection.
    async fn derive_sftp(&self) -> Result<SftpSession, ConnectionError> {
        let handle = self
            .handle
            .as_ref()
            .ok_or(ConnectionError::SessionClosed)?;

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| ConnectionError::ChannelSetup(e.to_string()))?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| ConnectionError::ChannelSetup(e.to_string()))?;

        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ConnectionError::ChannelSetup(e.to_string()))
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the server accepted a trivial exec during the capability
    /// probe. Meaningless before `detect_exec_capability` runs.
    pub fn can_execute_commands(&self) -> bool {
        self.can_execute_commands
    }

    /// Probe whether the server permits command execution.
    ///
    /// Some managed hosts allow SFTP but have shell access disabled; a
    /// failed probe is not an error, it selects the upload-only pipeline
    /// variant.
    pub async fn detect_exec_capability(&mut self) -> bool {
        let probed = tokio::time::timeout(CAPABILITY_PROBE_TIMEOUT, self.probe_exec()).await;
        self.can_execute_commands = matches!(probed, Ok(Ok(())));
        if !self.can_execute_commands {
            tracing::warn!("Remote command execution unavailable on this host");
        }
        self.can_execute_commands
    }

    async fn probe_exec(&self) -> Result<(), ExecutionError> {
        let mut channel = self.open_exec_channel().await?;
        channel
            .exec(true, "true")
            .await
            .map_err(|e| ExecutionError::TransportLost(e.to_string()))?;
        while let Some(msg) = channel.wait().await {
            if let ChannelMsg::ExitStatus { .. } = msg {
                return Ok(());
            }
        }
        Err(ExecutionError::NoExitStatus)
    }

    /// Open a channel for one remote command
    pub(crate) async fn open_exec_channel(&self) -> Result<Channel<Msg>, ExecutionError> {
        if self.state != SessionState::Open && self.state != SessionState::Connecting {
            return Err(ExecutionError::ChannelOpen("session is closed".to_string()));
        }
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| ExecutionError::ChannelOpen("session is closed".to_string()))?;
        handle
            .channel_open_session()
            .await
            .map_err(|e| ExecutionError::ChannelOpen(e.to_string()))
    }

    /// The SFTP sub-channel; errors once the session is closed or failed
    pub(crate) fn sftp(&self) -> Result<&SftpSession, ConnectionError> {
        if self.state != SessionState::Open && self.state != SessionState::Connecting {
            return Err(ConnectionError::SessionClosed);
        }
        self.sftp.as_ref().ok_or(ConnectionError::SessionClosed)
    }

    /// Close the SFTP channel and disconnect.
    ///
    /// Idempotent; safe on a never-opened session.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.release().await;
        self.state = SessionState::Closed;
        tracing::debug!("Session closed");
    }

    /// Tear down after a failed open
    async fn abandon(&mut self) {
        self.release().await;
        self.state = SessionState::Failed;
    }

    async fn release(&mut self) {
        if let Some(sftp) = self.sftp.take() {
            let _ = sftp.close().await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "closing", "en")
                .await;
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Existence probes and listings over the session's SFTP channel.
///
/// Probe failures (permission denied, no response) count as "does not
/// exist" so path resolution can continue to the next candidate.
#[async_trait]
impl PathProbe for Session {
    async fn exists(&self, path: &str) -> bool {
        match self.sftp() {
            Ok(sftp) => sftp.metadata(path).await.is_ok(),
            Err(_) => false,
        }
    }

    async fn list_dir(&self, path: &str) -> Vec<String> {
        let Ok(sftp) = self.sftp() else {
            return Vec::new();
        };
        match sftp.read_dir(path).await {
            Ok(entries) => entries.map(|entry| entry.file_name()).collect(),
            Err(e) => {
                tracing::debug!("Listing {} failed: {}", path, e);
                Vec::new()
            }
        }
    }
}

/// Client-side SSH handler.
///
/// Host keys are accepted without verification, matching the original
/// operator tooling's auto-accept policy for this managed host.
struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!("Server host key: {}", server_public_key.fingerprint());
        Ok(true)
    }
}
