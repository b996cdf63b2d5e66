//! Orchestrator-facing protocol types: capabilities, topology, requests, and
//! volume descriptions.
//!
//! These mirror the field names of the standard storage-plugin protocol,
//! which is a hard compatibility requirement. They are all
//! [`Serialize`]/[`Deserialize`] so they can be carried verbatim across the
//! transport layer that hosts the services.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Topology segment key carrying the availability zone of a share or node.
pub const ZONE_SEGMENT: &str = "topology.vpcfile.csi.io/zone";

/// Topology segment key carrying the region of a share or node.
pub const REGION_SEGMENT: &str = "topology.vpcfile.csi.io/region";

/// Describes how a volume may be accessed.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AccessMode {
    /// Single-node read-write.
    ReadWriteOnce,
    /// Multi-node read-only.
    ReadOnlyMany,
    /// Multi-node read-write.
    ReadWriteMany,
}

/// Capability requested for a volume by the orchestrator.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Additional mount flags (for example `"hard"` or `"noatime"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
}

/// Requested capacity bounds in bytes. A zero value means the bound is
/// unset, matching the wire protocol's optional-int semantics.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CapacityRange {
    /// Minimum capacity the volume must provide; zero when unset.
    pub required_bytes: u64,
    /// Maximum capacity the volume may provide; zero when unset.
    pub limit_bytes: u64,
}

/// Topology constraint expressed as key-value segments.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Topology {
    /// Topology segments, for example `{ZONE_SEGMENT: "us-south-1"}`.
    #[serde(default)]
    pub segments: HashMap<String, String>,
}

impl Topology {
    /// Builds a topology holding a single zone/region pair.
    #[must_use]
    pub fn zone_region(zone: &str, region: &str) -> Self {
        Self {
            segments: HashMap::from([
                (ZONE_SEGMENT.to_owned(), zone.to_owned()),
                (REGION_SEGMENT.to_owned(), region.to_owned()),
            ]),
        }
    }

    /// Returns the zone/region pair carried by this segment set, when both
    /// keys are present.
    #[must_use]
    pub fn zone_region_pair(&self) -> Option<(&str, &str)> {
        let zone = self.segments.get(ZONE_SEGMENT)?;
        let region = self.segments.get(REGION_SEGMENT)?;
        Some((zone.as_str(), region.as_str()))
    }
}

/// Request to provision a new volume.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CreateVolumeRequest {
    /// Orchestrator-assigned volume name; must be non-empty.
    pub name: String,
    /// Requested capacity bounds; backend minimum applies when absent.
    pub capacity_range: Option<CapacityRange>,
    /// Capabilities the volume must satisfy; must be non-empty.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Untyped storage-class parameters.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Untyped secret overrides; take precedence field-by-field.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    /// Preferred placement topology supplied by the orchestrator.
    #[serde(default)]
    pub accessibility_requirements: Vec<Topology>,
}

/// Description of a provisioned volume returned to the orchestrator.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Volume {
    /// Externally visible volume handle (`shareID:accessPointID`).
    pub volume_id: String,
    /// Provisioned capacity in bytes.
    pub capacity_bytes: u64,
    /// Normalized label set forwarded to node operations.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    /// Placement of the provisioned share.
    #[serde(default)]
    pub accessible_topology: Vec<Topology>,
}

/// One page of volume listings.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ListVolumesResponse {
    /// Capacity-bearing volumes on this page.
    pub entries: Vec<Volume>,
    /// Token resuming the listing, when more pages exist.
    pub next_token: Option<String>,
}

/// Outcome of a capability validation request.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ValidateVolumeCapabilitiesResponse {
    /// Whether the requested capabilities are all supported. An unsupported
    /// request yields `false`, not an error.
    pub confirmed: bool,
    /// Explanation when the capabilities could not be confirmed.
    pub message: String,
}

/// Request to publish a volume onto a node mount point.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NodePublishVolumeRequest {
    /// Compound volume handle.
    pub volume_id: String,
    /// Path on the host where the share must be mounted.
    pub target_path: String,
    /// Capability the mount must satisfy.
    pub volume_capability: Option<VolumeCapability>,
    /// Context produced at creation time; must carry the NFS server path.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    /// Whether the mount must be read-only.
    #[serde(default)]
    pub readonly: bool,
}

/// Information about the node on which the node service runs.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NodeInfo {
    /// Cluster-unique worker identifier.
    pub node_id: String,
    /// Maximum number of shares this node will mount concurrently.
    pub max_volumes_per_node: u64,
    /// Zone/region placement of the node.
    pub accessible_topology: Topology,
}

/// Operations advertised by the controller service.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ControllerCapability {
    /// Create and delete volumes.
    CreateDeleteVolume,
    /// Paged volume listing.
    ListVolumes,
}

/// Operations advertised by the node service.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum NodeCapability {
    /// Byte and inode usage reporting for mounted volumes.
    GetVolumeStats,
}
