//! SFTP transport for generated files.
//!
//! Only the TCP connect and SSH handshake are retried. A host that answers
//! but rejects the credentials fails at once as a transfer failure.

use super::{DeliveryError, RemoteDelivery};
use crate::config::{DeliverySettings, NapDeployment};
use log::{debug, info, warn};
use ssh2::Session;
use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Where a delivery stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// TCP connect or SSH handshake, after every attempt was used
    Connect,
    Authenticate,
    Transfer,
}

impl Stage {
    fn failure(self, host: IpAddr, attempts: u32, path: &Path, reason: String) -> DeliveryError {
        match self {
            Stage::Connect => DeliveryError::RemoteConnectFailure {
                host,
                attempts,
                reason,
            },
            Stage::Authenticate => DeliveryError::RemoteTransferFailure {
                host,
                path: path.to_path_buf(),
                reason: format!("authentication failed: {}", reason),
            },
            Stage::Transfer => DeliveryError::RemoteTransferFailure {
                host,
                path: path.to_path_buf(),
                reason,
            },
        }
    }
}

/// SFTP delivery over SSH.
///
/// Authentication tries the SSH agent, then the private key file, then the
/// configured password, in that order.
pub struct SshDelivery {
    user: String,
    private_key: PathBuf,
    password: Option<String>,
    settings: DeliverySettings,
}

impl SshDelivery {
    pub fn new(user: impl Into<String>, private_key: impl Into<PathBuf>, settings: DeliverySettings) -> Self {
        Self {
            user: user.into(),
            private_key: private_key.into(),
            password: None,
            settings,
        }
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn from_deployment(deployment: &NapDeployment) -> Self {
        Self::new(
            deployment.user.clone(),
            deployment.private_key(),
            deployment.delivery.clone(),
        )
        .with_password(deployment.password.clone())
    }

    fn attempts(&self) -> u32 {
        self.settings.attempts.max(1)
    }

    /// Open a handshaken, not yet authenticated session
    fn connect(&self, host: IpAddr) -> Result<Session, String> {
        let attempts = self.attempts();
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.try_connect(host) {
                Ok(session) => {
                    debug!("connected to {} on attempt {}", host, attempt);
                    return Ok(session);
                }
                Err(reason) => {
                    warn!("ssh to {} failed (attempt {}/{}): {}", host, attempt, attempts, reason);
                    last_error = reason;
                    if attempt < attempts {
                        std::thread::sleep(RETRY_DELAY);
                    }
                }
            }
        }
        Err(last_error)
    }

    fn try_connect(&self, host: IpAddr) -> Result<Session, String> {
        let address = SocketAddr::new(host, self.settings.port);
        let tcp = TcpStream::connect_timeout(&address, self.settings.timeout).map_err(|e| e.to_string())?;
        let mut session = Session::new().map_err(|e| e.to_string())?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(self.settings.timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake().map_err(|e| e.to_string())?;
        Ok(session)
    }

    fn authenticate(&self, session: &Session) -> Result<(), String> {
        if session.userauth_agent(&self.user).is_ok() && session.authenticated() {
            return Ok(());
        }
        debug!("agent authentication failed, trying {:?}", self.private_key);
        if self.private_key.exists()
            && session
                .userauth_pubkey_file(&self.user, None, &self.private_key, None)
                .is_ok()
            && session.authenticated()
        {
            return Ok(());
        }
        if let Some(password) = &self.password {
            debug!("key authentication failed, trying password");
            session
                .userauth_password(&self.user, password)
                .map_err(|e| format!("password rejected: {}", e))?;
        }
        if session.authenticated() {
            Ok(())
        } else {
            Err(format!("no accepted authentication method for user {}", self.user))
        }
    }

    fn make_remote_dir(session: &Session, remote_dir: &Path) -> Result<(), String> {
        let command = format!("mkdir -p {}", shell_quote(&remote_dir.to_string_lossy()));
        let mut channel = session.channel_session().map_err(|e| e.to_string())?;
        channel.exec(&command).map_err(|e| e.to_string())?;
        let mut output = String::new();
        channel.read_to_string(&mut output).map_err(|e| e.to_string())?;
        channel.wait_close().map_err(|e| e.to_string())?;
        match channel.exit_status().map_err(|e| e.to_string())? {
            0 => Ok(()),
            status => Err(format!("'{}' exited with {}: {}", command, status, output.trim())),
        }
    }
}

impl RemoteDelivery for SshDelivery {
    fn deliver(&self, host: IpAddr, remote_dir: &Path, local_file: &Path) -> Result<(), DeliveryError> {
        let local_error = |source: std::io::Error| DeliveryError::LocalFile {
            path: local_file.to_path_buf(),
            source,
        };
        let file_name = local_file.file_name().ok_or_else(|| {
            local_error(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path has no file name",
            ))
        })?;
        let content = std::fs::read(local_file).map_err(local_error)?;
        let remote_path = remote_dir.join(file_name);

        let attempts = self.attempts();
        let fail = |stage: Stage, reason: String| stage.failure(host, attempts, &remote_path, reason);
        let transfer_error = |reason: String| fail(Stage::Transfer, reason);

        let session = self
            .connect(host)
            .map_err(|reason| fail(Stage::Connect, reason))?;
        self.authenticate(&session)
            .map_err(|reason| fail(Stage::Authenticate, reason))?;
        Self::make_remote_dir(&session, remote_dir).map_err(transfer_error)?;
        let sftp = session.sftp().map_err(|e| transfer_error(e.to_string()))?;
        let mut remote = sftp
            .create(&remote_path)
            .map_err(|e| transfer_error(e.to_string()))?;
        remote
            .write_all(&content)
            .map_err(|e| transfer_error(e.to_string()))?;

        info!("delivered {:?} to {}:{:?}", file_name, host, remote_path);
        Ok(())
    }
}

/// Single-quote `value` for a POSIX shell
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/home/icn/nap"), "'/home/icn/nap'");
        assert_eq!(shell_quote("/tmp/it's"), "'/tmp/it'\\''s'");
    }

    #[test]
    fn test_missing_local_file() {
        let delivery = SshDelivery::new("icn", "/nonexistent/id_rsa", DeliverySettings::default());
        let err = delivery
            .deliver(
                "127.0.0.1".parse().unwrap(),
                Path::new("/tmp"),
                Path::new("/nonexistent/nap-00000001.cfg"),
            )
            .unwrap_err();
        assert!(matches!(err, DeliveryError::LocalFile { .. }));
    }

    #[test]
    fn test_connect_failure_after_attempts() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let local_file = temp_dir.path().join("nap-00000001.cfg");
        std::fs::write(&local_file, "napConfig:\n").unwrap();
        let settings = DeliverySettings {
            attempts: 2,
            timeout: Duration::from_millis(200),
            workers: 1,
            port: 1,
        };
        let delivery = SshDelivery::new("icn", "/nonexistent/id_rsa", settings);
        let err = delivery
            .deliver("127.0.0.1".parse().unwrap(), Path::new("/tmp"), &local_file)
            .unwrap_err();
        assert!(matches!(err, DeliveryError::RemoteConnectFailure { attempts: 2, .. }));
    }

    #[test]
    fn test_rejected_credentials_are_a_transfer_failure() {
        let host: IpAddr = "192.168.1.10".parse().unwrap();
        let path = Path::new("/home/icn/nap/nap-00000001.cfg");
        let err = Stage::Authenticate.failure(host, 6, path, "no accepted authentication method for user icn".to_string());
        match err {
            DeliveryError::RemoteTransferFailure { host: failed, path: failed_path, reason } => {
                assert_eq!(failed, host);
                assert_eq!(failed_path, path);
                assert_eq!(reason, "authentication failed: no accepted authentication method for user icn");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_only_connect_stage_reports_attempts() {
        let host: IpAddr = "192.168.1.10".parse().unwrap();
        let path = Path::new("/tmp/nap-00000001.cfg");
        assert!(matches!(
            Stage::Connect.failure(host, 6, path, "connection refused".to_string()),
            DeliveryError::RemoteConnectFailure { attempts: 6, .. }
        ));
        assert!(matches!(
            Stage::Transfer.failure(host, 6, path, "permission denied".to_string()),
            DeliveryError::RemoteTransferFailure { .. }
        ));
    }
}
