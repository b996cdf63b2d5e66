//! Backend session contract for the VPC file-storage control plane.
//!
//! The session is an external collaborator: it executes one typed call per
//! control-plane operation and reports failures as a [`SessionError`] whose
//! [`SessionErrorKind`] discriminant drives every retry/skip decision in the
//! lifecycle engine. The session's own transport and paging concerns are out
//! of scope here.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::VolumeSpec;

/// Backend error code reported when a listing limit is out of range.
pub const CODE_INVALID_LIMIT: &str = "invalid_limit";

/// Backend error code reported when a listing start token is unknown.
pub const CODE_START_TOKEN_NOT_FOUND: &str = "start_token_not_found";

/// Lifecycle status of a share.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ShareStatus {
    /// Creation accepted, share not yet usable.
    Pending,
    /// Share is usable; access points may be created.
    Stable,
    /// Deletion in progress.
    Deleting,
    /// Terminal backend failure.
    Failed,
}

/// Lifecycle status of an access point.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AccessPointStatus {
    /// Creation accepted, mount path not yet usable.
    Pending,
    /// Access point is usable.
    Stable,
    /// Deletion in progress.
    Deleting,
    /// Deletion finished; the backend may still report the record briefly.
    Deleted,
    /// Terminal backend failure.
    Failed,
}

impl AccessPointStatus {
    /// Whether the access point still counts against its share. Records in
    /// teardown no longer block share deletion.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Pending | Self::Stable)
    }
}

/// Share record as reported by the backend.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Share {
    /// Backend-assigned share identifier.
    pub id: String,
    /// Caller-assigned share name.
    pub name: String,
    /// Provisioned capacity in GiB.
    pub capacity_gib: u64,
    /// Current lifecycle status.
    pub status: ShareStatus,
    /// Cloud resource name of the share.
    pub crn: String,
    /// Zone the share was placed in.
    pub zone: String,
}

/// Access-point record binding a share to a VPC/subnet.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct AccessPoint {
    /// Backend-assigned access-point identifier.
    pub id: String,
    /// Current lifecycle status.
    pub status: AccessPointStatus,
    /// NFS mount path exposed once the access point is stable.
    pub mount_path: Option<String>,
    /// VPC the access point binds the share into.
    pub vpc_id: Option<String>,
    /// Subnet the access point binds the share into.
    pub subnet_id: Option<String>,
}

/// Parameters for creating an access point on a share.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AccessPointRequest {
    /// Target VPC; used as the dedup key in VPC access-control mode.
    pub vpc_id: Option<String>,
    /// Target subnet; used as the dedup key when supplied.
    pub subnet_id: Option<String>,
    /// Reserved primary IP to bind, by id.
    pub primary_ip_id: Option<String>,
    /// Primary IP to bind, by address; requires a subnet.
    pub primary_ip_address: Option<String>,
    /// Security groups attached to the access point.
    pub security_group_ids: Vec<String>,
    /// Whether traffic to the share is encrypted in transit.
    pub transit_encryption: bool,
}

/// Filter for paged share listings.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ShareFilter {
    /// Page size; the controller clamps this before the call.
    pub limit: u32,
    /// Resume token from a previous page.
    pub start: Option<String>,
    /// Restrict the listing to shares carrying all of these tags.
    pub tags: Vec<String>,
}

/// One page of share records.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ShareList {
    /// Shares on this page.
    pub shares: Vec<Share>,
    /// Token resuming the listing, when more pages exist.
    pub next_token: Option<String>,
}

/// Classification of a backend failure, driving the retry gate.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum SessionErrorKind {
    /// Transient condition; safe to retry with backoff.
    Retriable,
    /// The addressed resource does not exist.
    NotFound,
    /// The request was malformed; retrying cannot succeed.
    Invalid,
    /// A resource with the same name already exists.
    Conflict,
    /// Policy violation or other unrecoverable condition.
    Fatal,
}

impl fmt::Display for SessionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Retriable => "retriable",
            Self::NotFound => "not found",
            Self::Invalid => "invalid",
            Self::Conflict => "conflict",
            Self::Fatal => "fatal",
        };
        f.write_str(text)
    }
}

/// Typed failure reported by the backend session.
#[derive(Clone, Debug, Deserialize, Error, Eq, PartialEq, Serialize)]
#[error("backend error ({kind}, code {code}): {message}")]
pub struct SessionError {
    /// Classification driving retry decisions.
    pub kind: SessionErrorKind,
    /// Backend wire code, kept for category mapping at the RPC boundary.
    pub code: String,
    /// Message reported by the backend.
    pub message: String,
}

impl SessionError {
    /// Constructs an error with an explicit kind and wire code.
    #[must_use]
    pub fn new(kind: SessionErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Constructs a retriable (transient) error.
    #[must_use]
    pub fn retriable(message: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::Retriable, "transient", message)
    }

    /// Constructs a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::NotFound, "not_found", message)
    }

    /// Constructs a malformed-input error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::Invalid, "invalid_request", message)
    }

    /// Constructs a duplicate-name error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::Conflict, "duplicate_name", message)
    }

    /// Constructs an unrecoverable policy error.
    #[must_use]
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(SessionErrorKind::Fatal, "policy_violation", message)
    }

    /// Whether the retry gate may re-issue the failed call.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self.kind, SessionErrorKind::Retriable)
    }

    /// Whether the failure means the addressed resource is absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self.kind, SessionErrorKind::NotFound)
    }
}

/// Typed call-and-return contract against the file-storage control plane.
#[async_trait]
pub trait FileShareSession: Send + Sync {
    /// Creates a share from a validated volume specification.
    async fn create_share(&self, spec: &VolumeSpec) -> Result<Share, SessionError>;

    /// Fetches a share by backend id.
    async fn get_share(&self, share_id: &str) -> Result<Share, SessionError>;

    /// Fetches a share by its caller-assigned name.
    async fn get_share_by_name(&self, name: &str) -> Result<Share, SessionError>;

    /// Deletes a share. The backend refuses while access points remain.
    async fn delete_share(&self, share_id: &str) -> Result<(), SessionError>;

    /// Lists shares matching the filter, one page at a time.
    async fn list_shares(&self, filter: &ShareFilter) -> Result<ShareList, SessionError>;

    /// Creates an access point on a share.
    async fn create_access_point(
        &self,
        share_id: &str,
        request: &AccessPointRequest,
    ) -> Result<AccessPoint, SessionError>;

    /// Fetches one access point of a share.
    async fn get_access_point(
        &self,
        share_id: &str,
        access_point_id: &str,
    ) -> Result<AccessPoint, SessionError>;

    /// Lists all access points of a share.
    async fn list_access_points(&self, share_id: &str) -> Result<Vec<AccessPoint>, SessionError>;

    /// Deletes one access point of a share.
    async fn delete_access_point(
        &self,
        share_id: &str,
        access_point_id: &str,
    ) -> Result<(), SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_retriable_kind_passes_the_gate() {
        assert!(SessionError::retriable("socket reset").is_retriable());
        assert!(!SessionError::not_found("gone").is_retriable());
        assert!(!SessionError::invalid("bad field").is_retriable());
        assert!(!SessionError::conflict("name taken").is_retriable());
        assert!(!SessionError::fatal("quota exceeded").is_retriable());
    }

    #[test]
    fn teardown_states_are_not_live() {
        assert!(AccessPointStatus::Pending.is_live());
        assert!(AccessPointStatus::Stable.is_live());
        assert!(!AccessPointStatus::Deleting.is_live());
        assert!(!AccessPointStatus::Deleted.is_live());
        assert!(!AccessPointStatus::Failed.is_live());
    }
}
