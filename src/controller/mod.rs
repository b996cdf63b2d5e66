//! Controller service: the composition layer behind the orchestrator's
//! provisioning RPCs.
//!
//! Each RPC runs to completion with no shared mutable state beyond the
//! backend session, the retry policy, and the subnet registry. Correctness
//! under concurrent callers rests on idempotent check-then-act sequences
//! (by-name share lookup, access-point reuse, absent-is-success deletion)
//! rather than per-volume locks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::access_point::{AccessPointError, AccessPointManager};
use crate::config::{ConfigError, DriverConfig, SubnetRegistry};
use crate::identity;
use crate::params::{self, AccessControlMode, PrimaryIp, ResolveError, VolumeSpec};
use crate::rpc::{RpcError, RpcErrorCode};
use crate::session::{
    AccessPoint, AccessPointRequest, CODE_INVALID_LIMIT, CODE_START_TOKEN_NOT_FOUND,
    FileShareSession, SessionError, SessionErrorKind, Share, ShareFilter,
};
use crate::types::{
    CreateVolumeRequest, ListVolumesResponse, Topology, ValidateVolumeCapabilitiesResponse, Volume,
    VolumeCapability,
};
use crate::volume_id::CompoundVolumeId;

/// Volume-context key carrying the compound volume handle.
pub const CONTEXT_VOLUME_ID: &str = "volumeId";
/// Volume-context key carrying the share's cloud resource name.
pub const CONTEXT_CRN: &str = "volumeCRN";
/// Volume-context key carrying the serving cluster's identifier.
pub const CONTEXT_CLUSTER_ID: &str = "clusterId";
/// Volume-context key carrying the comma-joined tag list.
pub const CONTEXT_TAGS: &str = "tags";
/// Volume-context key carrying the requested IOPS, when set.
pub const CONTEXT_IOPS: &str = "iops";
/// Volume-context key carrying the placement region.
pub const CONTEXT_REGION: &str = "region";
/// Volume-context key carrying the placement zone (VPC mode only).
pub const CONTEXT_ZONE: &str = "zone";
/// Volume-context key carrying the NFS server path mounted by the node.
pub const CONTEXT_SERVER_PATH: &str = "nfsServerPath";

/// Largest page size a listing may request.
const MAX_LIST_ENTRIES: u32 = 100;
/// Page size used when the caller passes zero.
const DEFAULT_LIST_ENTRIES: u32 = 50;

/// Orchestrator-facing controller service.
pub struct ControllerService {
    session: Arc<dyn FileShareSession>,
    manager: AccessPointManager,
    config: DriverConfig,
    subnets: Arc<SubnetRegistry>,
}

impl ControllerService {
    /// Builds the controller over a backend session, validated
    /// configuration, and the shared subnet registry.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration fails validation.
    pub fn new(
        session: Arc<dyn FileShareSession>,
        config: DriverConfig,
        subnets: Arc<SubnetRegistry>,
    ) -> Result<Self, ConfigError> {
        let retry = config.retry_policy()?;
        let manager = AccessPointManager::new(Arc::clone(&session), retry);
        Ok(Self {
            session,
            manager,
            config,
            subnets,
        })
    }

    /// Provisions a share and its access point, or returns the existing
    /// volume unchanged when called again with the same name.
    ///
    /// # Errors
    ///
    /// Returns an [`RpcError`] with a deterministic category: argument
    /// errors for validation failures, `already-exists` for a same-name
    /// share of different capacity, and internal errors for exhausted
    /// retries or terminal backend failures.
    #[instrument(skip(self, request), fields(volume_name = %request.name))]
    pub async fn create_volume(&self, request: &CreateVolumeRequest) -> Result<Volume, RpcError> {
        if request.name.trim().is_empty() {
            return Err(RpcError::invalid_argument("volume name is required"));
        }
        check_capabilities(&request.volume_capabilities)?;

        let mut spec = params::resolve(
            &request.parameters,
            &request.secrets,
            request.capacity_range.as_ref(),
            &request.accessibility_requirements,
            self.config.default_resource_group.as_deref().unwrap_or(""),
        )
        .map_err(|err| resolve_to_rpc(&err))?;
        spec.name = request.name.clone();

        let share = match self.find_share_by_name(&spec.name).await? {
            Some(existing) => {
                if existing.capacity_gib != spec.capacity_gib {
                    return Err(RpcError::already_exists(format!(
                        "share {} exists with capacity {} GiB, requested {} GiB",
                        existing.name, existing.capacity_gib, spec.capacity_gib
                    )));
                }
                info!(share_id = %existing.id, "reusing existing share");
                self.manager
                    .wait_share_stable(&existing.id)
                    .await
                    .map_err(lifecycle_to_rpc)?
            }
            None => {
                let created = self
                    .manager
                    .with_retries("create share", || self.session.create_share(&spec))
                    .await
                    .map_err(lifecycle_to_rpc)?;
                info!(share_id = %created.id, "share created");
                self.manager
                    .wait_share_stable(&created.id)
                    .await
                    .map_err(lifecycle_to_rpc)?
            }
        };

        let ap_request = self.access_point_request(&spec);
        let access_point = self
            .manager
            .ensure(&share.id, &ap_request)
            .await
            .map_err(lifecycle_to_rpc)?;

        let volume_id = CompoundVolumeId::new(share.id.clone(), access_point.id.clone())
            .map_err(|err| RpcError::internal(err.to_string()))?;
        Ok(self.build_volume(&volume_id, &spec, &share, &access_point))
    }

    /// Deletes the access point and share addressed by a compound volume
    /// id. An already-absent share is success.
    ///
    /// # Errors
    ///
    /// Returns `failed-precondition` while several live access points
    /// exist, argument errors for a malformed id, and internal errors for
    /// backend failures.
    #[instrument(skip(self))]
    pub async fn delete_volume(&self, volume_id: &str) -> Result<(), RpcError> {
        let id = CompoundVolumeId::parse(volume_id)
            .map_err(|err| RpcError::invalid_argument(err.to_string()))?;

        let lookup = self
            .manager
            .with_retries("get share", || self.session.get_share(&id.share_id))
            .await;
        match lookup {
            Err(AccessPointError::Session(err)) if err.is_not_found() => {
                info!(share_id = %id.share_id, "share already absent");
                return Ok(());
            }
            Err(other) => return Err(lifecycle_to_rpc(other)),
            Ok(_) => {}
        }

        self.manager
            .ensure_share_deletable(&id.share_id)
            .await
            .map_err(lifecycle_to_rpc)?;
        self.manager
            .remove(&id.share_id, &id.access_point_id)
            .await
            .map_err(lifecycle_to_rpc)?;
        self.manager
            .wait_until_gone(&id.share_id, &id.access_point_id)
            .await
            .map_err(lifecycle_to_rpc)?;

        let deletion = self
            .manager
            .with_retries("delete share", || self.session.delete_share(&id.share_id))
            .await;
        match deletion {
            Ok(()) => {
                info!(share_id = %id.share_id, "share deleted");
                Ok(())
            }
            Err(AccessPointError::Session(err)) if err.is_not_found() => Ok(()),
            Err(other) => Err(lifecycle_to_rpc(other)),
        }
    }

    /// Lists capacity-bearing volumes one page at a time.
    ///
    /// # Errors
    ///
    /// Returns an argument error for a negative or backend-rejected page
    /// size and `aborted` for an unknown start token.
    #[instrument(skip(self))]
    pub async fn list_volumes(
        &self,
        max_entries: i32,
        starting_token: Option<&str>,
    ) -> Result<ListVolumesResponse, RpcError> {
        if max_entries < 0 {
            return Err(RpcError::invalid_argument(format!(
                "max entries must not be negative, got {max_entries}"
            )));
        }
        // Lossless after the negative guard above.
        let clamped = max_entries.unsigned_abs().min(MAX_LIST_ENTRIES);
        let limit = if clamped == 0 {
            DEFAULT_LIST_ENTRIES
        } else {
            clamped
        };
        let filter = ShareFilter {
            limit,
            start: starting_token.map(str::to_owned),
            tags: Vec::new(),
        };

        let page = self
            .manager
            .with_retries("list shares", || self.session.list_shares(&filter))
            .await
            .map_err(listing_to_rpc)?;
        let entries = page
            .shares
            .into_iter()
            .filter(|share| share.capacity_gib > 0)
            .map(|share| Volume {
                volume_id: share.id,
                capacity_bytes: share.capacity_gib.saturating_mul(crate::profile::GIB),
                volume_context: HashMap::new(),
                accessible_topology: Vec::new(),
            })
            .collect();
        Ok(ListVolumesResponse {
            entries,
            next_token: page.next_token,
        })
    }

    /// Confirms whether the requested capabilities are supported for an
    /// existing volume. Unsupported capabilities yield an unconfirmed
    /// response, not an error.
    ///
    /// # Errors
    ///
    /// Returns an argument error for a malformed id and `not-found` when
    /// the share no longer exists.
    #[instrument(skip(self, capabilities))]
    pub async fn validate_volume_capabilities(
        &self,
        volume_id: &str,
        capabilities: &[VolumeCapability],
    ) -> Result<ValidateVolumeCapabilitiesResponse, RpcError> {
        let id = CompoundVolumeId::parse(volume_id)
            .map_err(|err| RpcError::invalid_argument(err.to_string()))?;
        if capabilities.is_empty() {
            return Err(RpcError::invalid_argument(
                "volume capabilities are required",
            ));
        }

        self.manager
            .with_retries("get share", || self.session.get_share(&id.share_id))
            .await
            .map_err(lifecycle_to_rpc)?;

        let unsupported: Vec<&VolumeCapability> = capabilities
            .iter()
            .filter(|capability| !identity::supports_access_mode(capability.access_mode))
            .collect();
        if unsupported.is_empty() {
            Ok(ValidateVolumeCapabilitiesResponse {
                confirmed: true,
                message: String::new(),
            })
        } else {
            Ok(ValidateVolumeCapabilitiesResponse {
                confirmed: false,
                message: String::from("requested access modes are not all supported"),
            })
        }
    }

    /// Fixed unimplemented signal for the controller operations this
    /// backend deliberately does not provide.
    ///
    /// # Errors
    ///
    /// Always returns [`RpcErrorCode::Unimplemented`].
    pub fn unimplemented<T>(method: &str) -> Result<T, RpcError> {
        Err(RpcError::unimplemented(method))
    }

    async fn find_share_by_name(&self, name: &str) -> Result<Option<Share>, RpcError> {
        match self.session.get_share_by_name(name).await {
            Ok(share) => Ok(Some(share)),
            // Retrieval failures and not-found both mean "does not exist";
            // creation proceeds and the backend arbitrates duplicates.
            Err(err) if err.is_not_found() || err.is_retriable() => {
                if err.is_retriable() {
                    warn!(name, error = %err, "by-name lookup failed, assuming absent");
                }
                Ok(None)
            }
            Err(err) => Err(session_to_rpc(&err)),
        }
    }

    fn access_point_request(&self, spec: &VolumeSpec) -> AccessPointRequest {
        let subnet_id = match spec.access_control_mode {
            AccessControlMode::Vpc => None,
            AccessControlMode::SecurityGroup => spec.subnet_id.clone().or_else(|| {
                let (_, subnets) = self.subnets.get();
                subnets.first().cloned()
            }),
        };
        let (primary_ip_id, primary_ip_address) = match &spec.primary_ip {
            Some(PrimaryIp::ById(id)) => (Some(id.clone()), None),
            Some(PrimaryIp::ByAddress(address)) => (None, Some(address.clone())),
            None => (None, None),
        };
        AccessPointRequest {
            vpc_id: self.config.vpc_id.clone(),
            subnet_id,
            primary_ip_id,
            primary_ip_address,
            security_group_ids: spec.security_group_ids.clone(),
            transit_encryption: spec.transit_encryption,
        }
    }

    fn build_volume(
        &self,
        volume_id: &CompoundVolumeId,
        spec: &VolumeSpec,
        share: &Share,
        access_point: &AccessPoint,
    ) -> Volume {
        let mut context = HashMap::from([
            (CONTEXT_VOLUME_ID.to_owned(), volume_id.to_string()),
            (CONTEXT_CRN.to_owned(), share.crn.clone()),
            (
                CONTEXT_CLUSTER_ID.to_owned(),
                self.config.cluster_id.clone(),
            ),
            (CONTEXT_TAGS.to_owned(), spec.tags.join(",")),
            (CONTEXT_REGION.to_owned(), spec.region.clone()),
        ]);
        if let Some(iops) = spec.iops {
            context.insert(CONTEXT_IOPS.to_owned(), iops.to_string());
        }
        if spec.access_control_mode == AccessControlMode::Vpc {
            context.insert(CONTEXT_ZONE.to_owned(), share.zone.clone());
        }
        if let Some(path) = &access_point.mount_path {
            context.insert(CONTEXT_SERVER_PATH.to_owned(), path.clone());
        }
        Volume {
            volume_id: volume_id.to_string(),
            capacity_bytes: spec.capacity_bytes(),
            volume_context: context,
            accessible_topology: vec![Topology::zone_region(&share.zone, &spec.region)],
        }
    }
}

/// Rejects empty or unsupported capability lists at volume creation.
fn check_capabilities(capabilities: &[VolumeCapability]) -> Result<(), RpcError> {
    if capabilities.is_empty() {
        return Err(RpcError::invalid_argument(
            "volume capabilities are required",
        ));
    }
    for capability in capabilities {
        if !identity::supports_access_mode(capability.access_mode) {
            return Err(RpcError::invalid_argument(format!(
                "access mode {:?} is not supported",
                capability.access_mode
            )));
        }
    }
    Ok(())
}

fn resolve_to_rpc(err: &ResolveError) -> RpcError {
    RpcError::invalid_argument(err.to_string())
}

/// Deterministic category mapping from a backend error classification.
fn session_to_rpc(err: &SessionError) -> RpcError {
    let code = match err.kind {
        SessionErrorKind::Invalid => RpcErrorCode::InvalidArgument,
        SessionErrorKind::NotFound => RpcErrorCode::NotFound,
        SessionErrorKind::Conflict => RpcErrorCode::AlreadyExists,
        SessionErrorKind::Retriable | SessionErrorKind::Fatal => RpcErrorCode::Internal,
    };
    RpcError::new(code, err.to_string())
}

fn lifecycle_to_rpc(err: AccessPointError) -> RpcError {
    match err {
        AccessPointError::Session(inner) => session_to_rpc(&inner),
        AccessPointError::MultipleAccessPoints { .. } => {
            RpcError::failed_precondition(err.to_string())
        }
        _ => RpcError::internal(err.to_string()),
    }
}

/// Maps listing failures, distinguishing a rejected limit from an unknown
/// start token.
fn listing_to_rpc(err: AccessPointError) -> RpcError {
    if let AccessPointError::Session(inner) = &err {
        if inner.code == CODE_INVALID_LIMIT {
            return RpcError::invalid_argument(inner.message.clone());
        }
        if inner.code == CODE_START_TOKEN_NOT_FOUND {
            return RpcError::aborted(inner.message.clone());
        }
    }
    lifecycle_to_rpc(err)
}
