//! Deployment target and run configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::duration_secs;
use crate::error::ConfigError;

/// Environment variable consulted for password auth when the config file
/// carries no password (interactive prompting is out of scope).
pub const PASSWORD_ENV_VAR: &str = "CAPSTAN_SSH_PASSWORD";

/// How the session authenticates to the target host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum AuthMethod {
    /// Password authentication; the password may come from the config
    /// file or from `CAPSTAN_SSH_PASSWORD`
    Password {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    /// Public-key authentication with a private key file
    PrivateKey { key_path: PathBuf },
}

impl AuthMethod {
    /// Resolve the effective password, preferring the config value
    pub fn resolved_password(&self) -> Option<String> {
        match self {
            AuthMethod::Password { password } => password
                .clone()
                .or_else(|| std::env::var(PASSWORD_ENV_VAR).ok()),
            AuthMethod::PrivateKey { .. } => None,
        }
    }
}

/// The one remote host a run deploys to.
///
/// Constructed once at the boundary and passed by reference through the
/// pipeline; nothing mutates it after that.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentTarget {
    /// Host name or address
    pub host: String,

    /// SSH port
    pub port: u16,

    /// Remote user name
    pub user: String,

    /// Candidate deployment roots, probed in order; the first one that
    /// exists on the remote filesystem wins
    pub candidate_roots: Vec<String>,

    /// Connection establishment bound
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Bound for buffered remote commands (the streamed deploy script is
    /// intentionally unbounded)
    #[serde(with = "duration_secs")]
    pub command_timeout: Duration,

    /// Authentication method
    pub auth: AuthMethod,
}

impl Default for DeploymentTarget {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 22,
            user: whoami::username(),
            candidate_roots: vec![],
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(300),
            auth: AuthMethod::PrivateKey {
                key_path: dirs::home_dir()
                    .unwrap_or_default()
                    .join(".ssh")
                    .join("id_ed25519"),
            },
        }
    }
}

impl DeploymentTarget {
    /// `host:port` address for the SSH connection
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the target is usable before any stage runs
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::MissingField("target.host".to_string()));
        }
        if self.candidate_roots.is_empty() {
            return Err(ConfigError::MissingField(
                "target.candidate_roots".to_string(),
            ));
        }
        if let AuthMethod::Password { .. } = &self.auth {
            if self.auth.resolved_password().is_none() {
                return Err(ConfigError::MissingField(format!(
                    "target.auth.password (or {})",
                    PASSWORD_ENV_VAR
                )));
            }
        }
        Ok(())
    }
}

/// One artifact to upload, as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Local file path
    pub local_path: PathBuf,

    /// Name under the remote root; defaults to the local file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_name: Option<String>,
}

impl ArtifactSpec {
    /// Effective remote file name
    pub fn remote_name(&self) -> String {
        match &self.remote_name {
            Some(name) => name.clone(),
            None => self
                .local_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }
}

/// Settings for the remote execution and summary phases
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySettings {
    /// Deploy script name under the remote root; must also appear in the
    /// artifact list so it gets uploaded
    pub script: String,

    /// Process-manager application name, used by the advisory verify
    /// stage and the follow-up commands in the summary
    pub app_name: String,

    /// Port the deployed API listens on; only used to derive the access
    /// URLs printed in the summary
    pub api_port: u16,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            script: "deploy.sh".to_string(),
            app_name: "app".to_string(),
            api_port: 3001,
        }
    }
}

/// Full configuration for one deployment run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Target host
    pub target: DeploymentTarget,

    /// Files to upload, in order
    pub artifacts: Vec<ArtifactSpec>,

    /// Remote execution and summary settings
    pub deploy: DeploySettings,
}

impl DeployConfig {
    /// Check the whole run configuration before any stage runs
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.target.validate()?;
        if self.artifacts.is_empty() {
            return Err(ConfigError::MissingField("artifacts".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_text = r#"
            [target]
            host = "203.0.113.7"
            user = "deployer"
            candidate_roots = [
                "/home/deployer/applications/app/public_html",
                "/home/deployer/public_html",
            ]
            connect_timeout = 10
            command_timeout = 300

            [target.auth]
            method = "private-key"
            key_path = "/home/op/.ssh/deploy_rsa"

            [[artifacts]]
            local_path = "bundle.tar.gz"

            [[artifacts]]
            local_path = "scripts/deploy.sh"
            remote_name = "deploy.sh"

            [deploy]
            script = "deploy.sh"
            app_name = "wos-manager"
            api_port = 3001
        "#;

        let config: DeployConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(config.target.host, "203.0.113.7");
        assert_eq!(config.target.candidate_roots.len(), 2);
        assert_eq!(config.target.connect_timeout, Duration::from_secs(10));
        assert!(matches!(
            config.target.auth,
            AuthMethod::PrivateKey { .. }
        ));
        assert_eq!(config.artifacts.len(), 2);
        assert_eq!(config.artifacts[0].remote_name(), "bundle.tar.gz");
        assert_eq!(config.artifacts[1].remote_name(), "deploy.sh");
        assert_eq!(config.deploy.app_name, "wos-manager");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_empty_candidate_roots() {
        let config = DeployConfig {
            target: DeploymentTarget {
                host: "203.0.113.7".to_string(),
                ..Default::default()
            },
            artifacts: vec![ArtifactSpec {
                local_path: PathBuf::from("bundle.tar.gz"),
                remote_name: None,
            }],
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(field)) if field.contains("candidate_roots")
        ));
    }

    #[test]
    fn test_validate_rejects_password_auth_without_password() {
        // Only meaningful when the env var is not set in the test
        // environment; skip otherwise.
        if std::env::var(PASSWORD_ENV_VAR).is_ok() {
            return;
        }
        let target = DeploymentTarget {
            host: "203.0.113.7".to_string(),
            auth: AuthMethod::Password { password: None },
            candidate_roots: vec!["/srv/app".to_string()],
            ..Default::default()
        };
        assert!(target.validate().is_err());
    }

    #[test]
    fn test_auth_password_from_config_wins() {
        let auth = AuthMethod::Password {
            password: Some("hunter2".to_string()),
        };
        assert_eq!(auth.resolved_password().as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_target_address() {
        let target = DeploymentTarget {
            host: "203.0.113.7".to_string(),
            port: 2222,
            ..Default::default()
        };
        assert_eq!(target.address(), "203.0.113.7:2222");
    }
}
