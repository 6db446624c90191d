//! SSH session to a cluster node
//!
//! One control-master connection per run; every command is multiplexed over
//! it so authentication happens once. Uses the system `ssh` binary.

use crate::config::NodeTarget;
use crate::domain::ports::{CommandOutput, RemoteExecutor};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info, warn};

const SSH_BINARY: &str = "ssh";

pub struct SshSession {
    target: NodeTarget,
    control_path: PathBuf,
}

impl SshSession {
    /// Authenticate and start the control master
    pub async fn open(target: NodeTarget) -> Result<Self> {
        let control_path = std::env::temp_dir().join(format!(
            "storage-bootstrap-{}-%C",
            std::process::id()
        ));
        let session = Self {
            target,
            control_path,
        };

        let mut args = session.base_args();
        args.extend(
            ["-o", "ControlMaster=yes", "-o", "ControlPersist=yes", "-N", "-f"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push(session.destination());

        let output = session.spawn(&args).await?;
        if !output.success() {
            return Err(Error::Session {
                host: session.target.host.clone(),
                reason: output.stderr.trim().to_string(),
            });
        }
        info!("Opened SSH session to {}", session.destination());
        Ok(session)
    }

    /// Stop the control master
    pub async fn close(self) -> Result<()> {
        let mut args = self.base_args();
        args.extend(["-O".to_string(), "exit".to_string(), self.destination()]);
        let output = self.spawn(&args).await?;
        if !output.success() {
            warn!(
                "Closing SSH session to {} reported: {}",
                self.target.host,
                output.stderr.trim()
            );
        }
        debug!("Closed SSH session to {}", self.target.host);
        Ok(())
    }

    pub fn host(&self) -> &str {
        &self.target.host
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.target.user, self.target.host)
    }

    /// Options shared by the master, every command and the exit request
    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.target.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
        ];
        if let Some(identity) = &self.target.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }

    fn command_args(&self, command: &str) -> Vec<String> {
        let mut args = self.base_args();
        args.push(self.destination());
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }

    async fn spawn(&self, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new(SSH_BINARY)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Session {
                host: self.target.host.clone(),
                reason: format!("cannot run {}: {}", SSH_BINARY, e),
            })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            // Killed by a signal
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[async_trait]
impl RemoteExecutor for SshSession {
    async fn execute(&self, command: &str) -> Result<CommandOutput> {
        let output = self.spawn(&self.command_args(command)).await?;
        // ssh itself exits 255 when the connection is lost
        if output.exit_code == 255 {
            return Err(Error::Session {
                host: self.target.host.clone(),
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}
