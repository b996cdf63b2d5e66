//! Host mount operations behind a trait seam.
//!
//! The node service talks to the host exclusively through [`HostMount`], so
//! tests can substitute an in-memory fake and the production implementation
//! can shell out to the host utilities. The trait carries a derived
//! `cleanup_mount_point` helper implementing the unpublish sequence: unmount
//! if mounted, verify the unmount took, then remove the directory.

use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors raised by host mount operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MountError {
    /// A host operation failed; carries the target path and failure detail.
    #[error("{operation} failed on {path}: {message}")]
    Operation {
        /// Host operation that failed.
        operation: String,
        /// Path the operation was applied to.
        path: String,
        /// Failure detail from the host.
        message: String,
    },
    /// The target is still a mount point after an unmount attempt.
    #[error("{path} is still a mount point after unmount")]
    StuckMount {
        /// Path that refused to unmount.
        path: String,
    },
    /// The addressed path does not exist on the host.
    #[error("path {path} does not exist")]
    Missing {
        /// Path that was expected to exist.
        path: String,
    },
    /// Host output could not be parsed.
    #[error("unreadable output from {operation} on {path}: {message}")]
    UnreadableOutput {
        /// Host operation whose output was unreadable.
        operation: String,
        /// Path the operation was applied to.
        path: String,
        /// What failed to parse.
        message: String,
    },
}

impl MountError {
    fn operation(operation: &str, path: &Path, message: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.to_owned(),
            path: path.display().to_string(),
            message: message.into(),
        }
    }
}

/// Filesystem usage figures for a mounted volume, in bytes and inodes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FsUsage {
    /// Total capacity in bytes.
    pub total_bytes: u64,
    /// Bytes in use.
    pub used_bytes: u64,
    /// Bytes available to unprivileged writers.
    pub available_bytes: u64,
    /// Total inode count.
    pub total_inodes: u64,
    /// Inodes in use.
    pub used_inodes: u64,
    /// Inodes available.
    pub available_inodes: u64,
}

/// Host mount operations used by the node service.
#[async_trait]
pub trait HostMount: Send + Sync {
    /// Whether the path is currently a mount point.
    async fn is_mount_point(&self, path: &Path) -> Result<bool, MountError>;

    /// Creates the directory (and parents) for a publish target.
    async fn make_dir(&self, path: &Path) -> Result<(), MountError>;

    /// Mounts `source` at `target` with the given filesystem type and
    /// options.
    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), MountError>;

    /// Unmounts the target.
    async fn unmount(&self, target: &Path) -> Result<(), MountError>;

    /// Removes the (empty) publish directory.
    async fn remove_dir(&self, path: &Path) -> Result<(), MountError>;

    /// Whether the path exists on the host.
    async fn path_exists(&self, path: &Path) -> Result<bool, MountError>;

    /// Reads byte and inode usage for a mounted path.
    async fn fs_usage(&self, path: &Path) -> Result<FsUsage, MountError>;

    /// Tears a publish target down: unmount if mounted, verify the unmount
    /// took, then remove the directory. An absent target is success.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::StuckMount`] when the target remains mounted
    /// after the unmount call, and any underlying operation error.
    async fn cleanup_mount_point(&self, target: &Path) -> Result<(), MountError> {
        if !self.path_exists(target).await? {
            return Ok(());
        }
        if self.is_mount_point(target).await? {
            self.unmount(target).await?;
            if self.is_mount_point(target).await? {
                return Err(MountError::StuckMount {
                    path: target.display().to_string(),
                });
            }
        }
        self.remove_dir(target).await
    }
}

/// [`HostMount`] backed by the host's mount utilities.
///
/// Mount state queries and filesystem statistics are read by invoking
/// `mountpoint` and `stat` and parsing their output.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemMount;

fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_owned()
}

#[async_trait]
impl HostMount for SystemMount {
    async fn is_mount_point(&self, path: &Path) -> Result<bool, MountError> {
        let output = Command::new("mountpoint")
            .arg("-q")
            .arg(path)
            .output()
            .await
            .map_err(|err| MountError::operation("mountpoint", path, err.to_string()))?;
        Ok(output.status.success())
    }

    async fn make_dir(&self, path: &Path) -> Result<(), MountError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|err| MountError::operation("mkdir", path, err.to_string()))
    }

    async fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), MountError> {
        let mut command = Command::new("mount");
        command.arg("-t").arg(fs_type);
        if !options.is_empty() {
            command.arg("-o").arg(options.join(","));
        }
        command.arg(source).arg(target);
        debug!(source, target = %target.display(), fs_type, "mounting volume");
        let output = command
            .output()
            .await
            .map_err(|err| MountError::operation("mount", target, err.to_string()))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(MountError::operation("mount", target, stderr_text(&output)))
        }
    }

    async fn unmount(&self, target: &Path) -> Result<(), MountError> {
        let output = Command::new("umount")
            .arg(target)
            .output()
            .await
            .map_err(|err| MountError::operation("umount", target, err.to_string()))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(MountError::operation("umount", target, stderr_text(&output)))
        }
    }

    async fn remove_dir(&self, path: &Path) -> Result<(), MountError> {
        tokio::fs::remove_dir(path)
            .await
            .map_err(|err| MountError::operation("rmdir", path, err.to_string()))
    }

    async fn path_exists(&self, path: &Path) -> Result<bool, MountError> {
        match tokio::fs::metadata(path).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(MountError::operation("stat", path, err.to_string())),
        }
    }

    async fn fs_usage(&self, path: &Path) -> Result<FsUsage, MountError> {
        let output = Command::new("stat")
            .arg("-f")
            .arg("--format=%S %b %f %a %c %d")
            .arg(path)
            .output()
            .await
            .map_err(|err| MountError::operation("stat -f", path, err.to_string()))?;
        if !output.status.success() {
            return Err(MountError::operation("stat -f", path, stderr_text(&output)));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        parse_stat_output(text.trim(), path)
    }
}

/// Parses `stat -f --format=%S %b %f %a %c %d` output: block size, total
/// blocks, free blocks, blocks available to unprivileged users, total
/// inodes, free inodes.
fn parse_stat_output(text: &str, path: &Path) -> Result<FsUsage, MountError> {
    let unreadable = |message: &str| MountError::UnreadableOutput {
        operation: String::from("stat -f"),
        path: path.display().to_string(),
        message: message.to_owned(),
    };
    let mut fields = text.split_whitespace().map(str::parse::<u64>);
    let mut next = |name: &str| {
        fields
            .next()
            .ok_or_else(|| unreadable(&format!("missing field {name}")))?
            .map_err(|_| unreadable(&format!("non-numeric field {name}")))
    };
    let block_size = next("block size")?;
    let total_blocks = next("total blocks")?;
    let free_blocks = next("free blocks")?;
    let available_blocks = next("available blocks")?;
    let total_inodes = next("total inodes")?;
    let free_inodes = next("free inodes")?;

    let total_bytes = total_blocks.saturating_mul(block_size);
    let free_bytes = free_blocks.saturating_mul(block_size);
    Ok(FsUsage {
        total_bytes,
        used_bytes: total_bytes.saturating_sub(free_bytes),
        available_bytes: available_blocks.saturating_mul(block_size),
        total_inodes,
        used_inodes: total_inodes.saturating_sub(free_inodes),
        available_inodes: free_inodes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_output_parses_into_usage() {
        let usage = match parse_stat_output("4096 1000 400 350 2048 2000", Path::new("/mnt/v")) {
            Ok(usage) => usage,
            Err(err) => panic!("parse failed: {err}"),
        };
        assert_eq!(usage.total_bytes, 4096 * 1000);
        assert_eq!(usage.used_bytes, 4096 * 600);
        assert_eq!(usage.available_bytes, 4096 * 350);
        assert_eq!(usage.total_inodes, 2048);
        assert_eq!(usage.used_inodes, 48);
        assert_eq!(usage.available_inodes, 2000);
    }

    #[test]
    fn short_stat_output_is_rejected() {
        let result = parse_stat_output("4096 1000", Path::new("/mnt/v"));
        assert!(matches!(result, Err(MountError::UnreadableOutput { .. })));
    }

    #[test]
    fn non_numeric_stat_output_is_rejected() {
        let result = parse_stat_output("4096 x 400 350 2048 2000", Path::new("/mnt/v"));
        assert!(matches!(result, Err(MountError::UnreadableOutput { .. })));
    }
}
