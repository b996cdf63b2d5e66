//! Static identity and capability advertisement.
//!
//! Everything here is negotiated once at plugin registration and never
//! changes at runtime, so it is a set of constants and pure functions.

use crate::types::{AccessMode, ControllerCapability, NodeCapability};

/// Registered driver name advertised to the orchestrator.
pub const PLUGIN_NAME: &str = "vpcfile.csi.io";

/// Driver version advertised to the orchestrator.
pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Access modes this driver can satisfy. A requested capability is
/// supported iff its access mode appears here.
pub const SUPPORTED_ACCESS_MODES: [AccessMode; 3] = [
    AccessMode::ReadWriteOnce,
    AccessMode::ReadOnlyMany,
    AccessMode::ReadWriteMany,
];

/// Plugin-level capabilities advertised at registration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PluginCapability {
    /// The driver runs a controller service.
    ControllerService,
    /// Volumes are constrained to the topology they were created in.
    VolumeAccessibilityConstraints,
}

/// Name/version pair reported by `GetPluginInfo`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PluginInfo {
    /// Registered driver name.
    pub name: String,
    /// Driver version string.
    pub version: String,
}

/// Identity reported to the orchestrator.
#[must_use]
pub fn plugin_info() -> PluginInfo {
    PluginInfo {
        name: PLUGIN_NAME.to_owned(),
        version: PLUGIN_VERSION.to_owned(),
    }
}

/// Plugin capabilities reported to the orchestrator.
#[must_use]
pub const fn plugin_capabilities() -> &'static [PluginCapability] {
    &[
        PluginCapability::ControllerService,
        PluginCapability::VolumeAccessibilityConstraints,
    ]
}

/// Controller capabilities reported to the orchestrator.
#[must_use]
pub const fn controller_capabilities() -> &'static [ControllerCapability] {
    &[
        ControllerCapability::CreateDeleteVolume,
        ControllerCapability::ListVolumes,
    ]
}

/// Node capabilities reported to the orchestrator.
#[must_use]
pub const fn node_capabilities() -> &'static [NodeCapability] {
    &[NodeCapability::GetVolumeStats]
}

/// Liveness probe. The driver holds no warm-up state, so it is ready as
/// soon as the process answers.
#[must_use]
pub const fn ready() -> bool {
    true
}

/// Whether every requested access mode is in the supported set.
#[must_use]
pub fn supports_access_mode(mode: AccessMode) -> bool {
    SUPPORTED_ACCESS_MODES.contains(&mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_file_share_access_modes_are_supported() {
        assert!(supports_access_mode(AccessMode::ReadWriteOnce));
        assert!(supports_access_mode(AccessMode::ReadOnlyMany));
        assert!(supports_access_mode(AccessMode::ReadWriteMany));
    }

    #[test]
    fn identity_reports_the_crate_version() {
        let info = plugin_info();
        assert_eq!(info.name, PLUGIN_NAME);
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    }
}
