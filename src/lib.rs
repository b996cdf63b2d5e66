//! Core library for the VPC file-storage plugin.
//!
//! The crate turns a container orchestrator's volume lifecycle calls into
//! share and access-point operations against a cloud file-storage backend:
//! parameter resolution, the compound volume-identity codec, the retried
//! access-point state machine, the controller composition layer, and the
//! node-side mount manager.

pub mod access_point;
pub mod config;
pub mod controller;
pub mod identity;
pub mod mount;
pub mod node;
pub mod params;
pub mod profile;
pub mod rpc;
pub mod session;
pub mod test_support;
pub mod types;
pub mod volume_id;

pub use access_point::{AccessPointError, AccessPointManager};
pub use config::{ConfigError, DriverConfig, RetryPolicy, SubnetRegistry, SubnetWatcher};
pub use controller::ControllerService;
pub use mount::{FsUsage, HostMount, MountError, SystemMount};
pub use node::{MetadataError, MetadataProvider, NodeMetadata, NodeService};
pub use params::{AccessControlMode, PrimaryIp, ResolveError, VolumeSpec, resolve};
pub use profile::{GIB, Profile, ProfileError};
pub use rpc::{RpcError, RpcErrorCode};
pub use session::{
    AccessPoint, AccessPointRequest, AccessPointStatus, FileShareSession, SessionError,
    SessionErrorKind, Share, ShareFilter, ShareList, ShareStatus,
};
pub use volume_id::{CompoundVolumeId, VolumeIdError};
