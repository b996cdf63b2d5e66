//! Node service: publish/unpublish of shares on the worker host.
//!
//! All publish and unpublish calls on one node process share a single
//! mutex, serializing host mount-table mutations regardless of which
//! volume they target. The coarse lock trades throughput for the
//! elimination of interleaved mount races.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, instrument, warn};

use crate::controller::CONTEXT_SERVER_PATH;
use crate::identity;
use crate::mount::{FsUsage, HostMount, MountError};
use crate::rpc::RpcError;
use crate::types::{NodeInfo, NodePublishVolumeRequest, Topology};
use crate::volume_id::CompoundVolumeId;

/// Filesystem type used for every share mount.
const FS_TYPE: &str = "nfs4";

/// Nodes with fewer cores than this get the low attach cap.
const CORE_THRESHOLD: usize = 4;
/// Attach cap for small nodes.
const LOW_VOLUME_CAP: u64 = 12;
/// Attach cap for nodes at or above the core threshold.
const HIGH_VOLUME_CAP: u64 = 32;

/// Placement and identity of the worker the node service runs on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NodeMetadata {
    /// Cluster-unique worker identifier.
    pub worker_id: String,
    /// Zone the worker runs in.
    pub zone: String,
    /// Region the worker runs in.
    pub region: String,
}

/// Failure to discover the worker's metadata.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("node metadata unavailable: {reason}")]
pub struct MetadataError {
    /// What failed during discovery.
    pub reason: String,
}

/// Source of worker metadata, resolved lazily on the first `NodeGetInfo`.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Discovers the worker's identity and placement.
    async fn fetch(&self) -> Result<NodeMetadata, MetadataError>;
}

/// Orchestrator-facing node service.
pub struct NodeService {
    host: Arc<dyn HostMount>,
    provider: Arc<dyn MetadataProvider>,
    metadata: OnceCell<NodeMetadata>,
    // Serializes every publish/unpublish on this host.
    mount_lock: Mutex<()>,
}

impl NodeService {
    /// Builds the node service over a host mount seam and a metadata
    /// source.
    #[must_use]
    pub fn new(host: Arc<dyn HostMount>, provider: Arc<dyn MetadataProvider>) -> Self {
        Self {
            host,
            provider,
            metadata: OnceCell::new(),
            mount_lock: Mutex::new(()),
        }
    }

    /// Mounts a share at the request's target path. Publishing an already
    /// mounted target is success; a failed mount rolls the created
    /// directory back before returning.
    ///
    /// # Errors
    ///
    /// Returns argument errors for a malformed request and internal errors
    /// for host mount failures, including the stuck-mount condition.
    #[instrument(skip(self, request), fields(volume_id = %request.volume_id))]
    pub async fn publish_volume(&self, request: &NodePublishVolumeRequest) -> Result<(), RpcError> {
        CompoundVolumeId::parse(&request.volume_id)
            .map_err(|err| RpcError::invalid_argument(err.to_string()))?;
        if request.target_path.trim().is_empty() {
            return Err(RpcError::invalid_argument("target path is required"));
        }
        let capability = request
            .volume_capability
            .as_ref()
            .ok_or_else(|| RpcError::invalid_argument("volume capability is required"))?;
        if !identity::supports_access_mode(capability.access_mode) {
            return Err(RpcError::invalid_argument(format!(
                "access mode {:?} is not supported",
                capability.access_mode
            )));
        }
        let source = request
            .volume_context
            .get(CONTEXT_SERVER_PATH)
            .filter(|path| !path.is_empty())
            .ok_or_else(|| {
                RpcError::invalid_argument(format!(
                    "volume context is missing the {CONTEXT_SERVER_PATH} key"
                ))
            })?;
        let target = Path::new(&request.target_path);

        let _guard = self.mount_lock.lock().await;
        if self.host.is_mount_point(target).await.map_err(|err| mount_to_rpc(&err))? {
            info!(target = %target.display(), "target already mounted");
            return Ok(());
        }

        self.host.make_dir(target).await.map_err(|err| mount_to_rpc(&err))?;
        let mut options = capability.mount_flags.clone();
        if request.readonly && !options.iter().any(|flag| flag == "ro") {
            options.push(String::from("ro"));
        }
        match self.host.mount(source, target, FS_TYPE, &options).await {
            Ok(()) => {
                info!(target = %target.display(), source, "volume published");
                Ok(())
            }
            Err(failure) => {
                warn!(target = %target.display(), error = %failure, "mount failed, rolling back");
                self.rollback_failed_mount(target).await?;
                Err(mount_to_rpc(&failure))
            }
        }
    }

    /// After a failed mount, probes whether the target became a mount
    /// point anyway, unmounts it if so, and removes the created directory.
    async fn rollback_failed_mount(&self, target: &Path) -> Result<(), RpcError> {
        if self.host.is_mount_point(target).await.map_err(|err| mount_to_rpc(&err))? {
            self.host.unmount(target).await.map_err(|err| mount_to_rpc(&err))?;
            if self.host.is_mount_point(target).await.map_err(|err| mount_to_rpc(&err))? {
                return Err(RpcError::internal(format!(
                    "{} is stuck as a mount point after a failed mount",
                    target.display()
                )));
            }
        }
        self.host.remove_dir(target).await.map_err(|err| mount_to_rpc(&err))
    }

    /// Unmounts the target if mounted and removes its directory. An
    /// already unmounted or absent target is success.
    ///
    /// # Errors
    ///
    /// Returns argument errors for a malformed request and internal errors
    /// for host failures.
    #[instrument(skip(self))]
    pub async fn unpublish_volume(&self, volume_id: &str, target_path: &str) -> Result<(), RpcError> {
        CompoundVolumeId::parse(volume_id)
            .map_err(|err| RpcError::invalid_argument(err.to_string()))?;
        if target_path.trim().is_empty() {
            return Err(RpcError::invalid_argument("target path is required"));
        }

        let _guard = self.mount_lock.lock().await;
        self.host
            .cleanup_mount_point(Path::new(target_path))
            .await
            .map_err(|err| mount_to_rpc(&err))?;
        info!(target = target_path, "volume unpublished");
        Ok(())
    }

    /// Reports the worker's identity, placement, and attach cap. Metadata
    /// is discovered on the first call and cached for the process
    /// lifetime.
    ///
    /// # Errors
    ///
    /// Returns an internal error when metadata discovery fails.
    pub async fn node_info(&self) -> Result<NodeInfo, RpcError> {
        let metadata = self
            .metadata
            .get_or_try_init(|| self.provider.fetch())
            .await
            .map_err(|err| RpcError::internal(err.to_string()))?;
        let cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        Ok(NodeInfo {
            node_id: metadata.worker_id.clone(),
            max_volumes_per_node: volume_cap(cores),
            accessible_topology: Topology::zone_region(&metadata.zone, &metadata.region),
        })
    }

    /// Reports byte and inode usage for a published volume.
    ///
    /// # Errors
    ///
    /// Returns `not-found` when the path does not exist, distinct from
    /// internal errors reading the statistics.
    #[instrument(skip(self))]
    pub async fn volume_stats(&self, volume_id: &str, path: &str) -> Result<FsUsage, RpcError> {
        CompoundVolumeId::parse(volume_id)
            .map_err(|err| RpcError::invalid_argument(err.to_string()))?;
        if path.trim().is_empty() {
            return Err(RpcError::invalid_argument("volume path is required"));
        }
        let target = Path::new(path);
        if !self.host.path_exists(target).await.map_err(|err| mount_to_rpc(&err))? {
            return Err(RpcError::not_found(format!("volume path {path} does not exist")));
        }
        self.host.fs_usage(target).await.map_err(|err| mount_to_rpc(&err))
    }
}

/// Attach cap for a node with the given core count.
const fn volume_cap(cores: usize) -> u64 {
    if cores < CORE_THRESHOLD {
        LOW_VOLUME_CAP
    } else {
        HIGH_VOLUME_CAP
    }
}

fn mount_to_rpc(err: &MountError) -> RpcError {
    RpcError::internal(err.to_string())
}

#[cfg(test)]
mod tests;
