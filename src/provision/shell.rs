//! Shell-backed disk operations
//!
//! Implements [`DiskOperations`] by issuing command lines through a
//! [`RemoteExecutor`]. Keeping the command construction here lets the
//! provisioner be tested against a fake executor with scripted output.

use crate::config::ProvisionerConfig;
use crate::domain::ports::{BlockDevice, DiskOperations, RemoteExecutor};
use crate::error::{Error, Result};
use crate::provision::inventory::{device_path, parse_lsblk, LSBLK_COMMAND};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const FSTAB: &str = "/etc/fstab";

/// Single-quote a shell argument
pub fn quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/-_.,:=@%+".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Force flag for mkfs so it does not stop to ask about existing signatures
fn mkfs_force_flag(filesystem: &str) -> Option<&'static str> {
    match filesystem {
        "ext2" | "ext3" | "ext4" => Some("-F"),
        "xfs" | "btrfs" => Some("-f"),
        _ => None,
    }
}

pub struct ShellDiskOperations<E> {
    executor: E,
    config: ProvisionerConfig,
}

impl<E: RemoteExecutor> ShellDiskOperations<E> {
    pub fn new(executor: E, config: ProvisionerConfig) -> Self {
        Self { executor, config }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn into_executor(self) -> E {
        self.executor
    }

    fn privileged(&self, command: &str) -> String {
        if self.config.use_sudo {
            format!("sudo {}", command)
        } else {
            command.to_string()
        }
    }

    /// Run a privileged command, failing on a non-zero exit
    async fn run(&self, command: String) -> Result<String> {
        let command = self.privileged(&command);
        debug!("$ {}", command);
        self.executor.execute(&command).await?.into_stdout(&command)
    }
}

#[async_trait]
impl<E: RemoteExecutor> DiskOperations for ShellDiskOperations<E> {
    async fn list_block_devices(&self) -> Result<Vec<BlockDevice>> {
        let stdout = self
            .executor
            .execute(LSBLK_COMMAND)
            .await?
            .into_stdout(LSBLK_COMMAND)?;
        Ok(parse_lsblk(&stdout))
    }

    async fn create_partition(&self, device: &str) -> Result<()> {
        let disk = quote(&device_path(device));
        self.run(format!("parted -s {} mklabel gpt mkpart primary 0% 100%", disk))
            .await?;
        self.run(format!("partprobe {}", disk)).await?;
        tokio::time::sleep(Duration::from_millis(self.config.partition_settle_ms)).await;
        Ok(())
    }

    async fn wait_for_device(&self, partition: &str) -> Result<()> {
        let command = format!("test -b {}", quote(partition));
        let attempts = self.config.device_wait_attempts.max(1);
        for attempt in 1..=attempts {
            if self.executor.execute(&command).await?.success() {
                return Ok(());
            }
            debug!("{} not present yet (attempt {}/{})", partition, attempt, attempts);
            if attempt < attempts {
                tokio::time::sleep(Duration::from_millis(self.config.device_wait_interval_ms))
                    .await;
            }
        }
        Err(Error::DiskNotFound {
            device: partition.to_string(),
        })
    }

    async fn format(&self, partition: &str, filesystem: &str) -> Result<()> {
        let flag = mkfs_force_flag(filesystem).ok_or_else(|| {
            Error::Configuration(format!("unsupported filesystem {:?}", filesystem))
        })?;
        self.run(format!("mkfs.{} {} {}", filesystem, flag, quote(partition)))
            .await?;
        Ok(())
    }

    async fn create_mount_dir(&self, mountpoint: &str) -> Result<()> {
        self.run(format!("mkdir -p {}", quote(mountpoint))).await?;
        Ok(())
    }

    async fn filesystem_uuid(&self, partition: &str) -> Result<String> {
        let command = format!("blkid -s UUID -o value {}", quote(partition));
        let uuid = self.run(command.clone()).await?.trim().to_string();
        if uuid.is_empty() {
            return Err(Error::RemoteCommand {
                command: self.privileged(&command),
                exit_code: 0,
                stderr: format!("no filesystem UUID reported for {}", partition),
            });
        }
        Ok(uuid)
    }

    async fn has_fstab_entry(&self, mountpoint: &str) -> Result<bool> {
        let command = format!(
            "awk -v m={} '$1 !~ /^#/ && $2 == m {{ found = 1 }} END {{ exit !found }}' {}",
            quote(mountpoint),
            FSTAB
        );
        debug!("$ {}", command);
        let output = self.executor.execute(&command).await?;
        match output.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            _ => output.into_stdout(&command).map(|_| false),
        }
    }

    async fn append_fstab_entry(&self, entry: &str) -> Result<()> {
        let tee = self.privileged(&format!("tee -a {}", FSTAB));
        let command = format!("echo {} | {} > /dev/null", quote(entry), tee);
        debug!("$ {}", command);
        self.executor.execute(&command).await?.into_stdout(&command)?;
        Ok(())
    }

    async fn mount(&self, mountpoint: &str) -> Result<()> {
        self.run(format!("mount {}", quote(mountpoint))).await?;
        Ok(())
    }

    async fn set_permissions(&self, mountpoint: &str) -> Result<()> {
        self.run(format!("chmod 777 {}", quote(mountpoint))).await?;
        Ok(())
    }
}
