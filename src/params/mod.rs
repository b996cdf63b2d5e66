//! Parameter resolver: turns untyped storage-class parameters and secrets
//! into a validated [`VolumeSpec`].
//!
//! The key set is closed and enumerated; unknown keys are a hard error in
//! both passes. Keys are processed over a fixed, explicitly ordered
//! descriptor list rather than the map's iteration order, so the first error
//! reported for a request with several invalid values is deterministic:
//! declared order wins. Secrets run as a second pass over the same key set
//! (minus the profile, which is not overridable), replacing values
//! field-by-field except tags, which are appended.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::profile::{GIB, Profile, ProfileError};
use crate::types::{CapacityRange, Topology};

/// Maximum accepted length of a zone name.
pub const MAX_ZONE_LEN: usize = 64;

/// Maximum accepted length of a region name.
pub const MAX_REGION_LEN: usize = 64;

/// Maximum accepted length of a resource-group id.
pub const MAX_RESOURCE_GROUP_LEN: usize = 64;

/// Maximum accepted length of a single tag.
pub const MAX_TAG_LEN: usize = 128;

/// Maximum accepted length of an encryption-key CRN.
pub const MAX_ENCRYPTION_KEY_LEN: usize = 256;

/// Access-control discipline for a share's mount targets.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum AccessControlMode {
    /// Traffic is admitted per attached security group (the default).
    #[default]
    SecurityGroup,
    /// Traffic is admitted for the whole VPC.
    Vpc,
}

/// Reference to a reserved primary IP, by id or by address but never both.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum PrimaryIp {
    /// Bind an existing reserved IP by its backend id.
    ById(String),
    /// Bind a literal address; requires a subnet id.
    ByAddress(String),
}

/// Validated, typed representation of a to-be-created share.
///
/// Constructed fresh per provisioning request, mutated by secret-supplied
/// overrides, consumed once to build the backend create request.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VolumeSpec {
    /// Share name; filled in by the controller from the request.
    pub name: String,
    /// Provisioned capacity in whole GiB, rounded up and clamped.
    pub capacity_gib: u64,
    /// Performance tier.
    pub profile: Profile,
    /// Placement zone; empty only in VPC access-control mode.
    pub zone: String,
    /// Placement region; empty only in VPC access-control mode.
    pub region: String,
    /// Owning resource group.
    pub resource_group_id: String,
    /// User tags, accumulated across both resolution passes.
    pub tags: Vec<String>,
    /// Whether the share is encrypted with a customer key.
    pub encrypted: bool,
    /// Customer encryption key CRN.
    pub encryption_key: Option<String>,
    /// Access-control discipline for the share's mount targets.
    pub access_control_mode: AccessControlMode,
    /// Security groups to attach to the access point.
    pub security_group_ids: Vec<String>,
    /// Reserved primary IP to bind, when requested.
    pub primary_ip: Option<PrimaryIp>,
    /// Subnet to bind the access point into, when requested.
    pub subnet_id: Option<String>,
    /// Initial owning uid for the share root.
    pub initial_uid: Option<u32>,
    /// Initial owning gid for the share root.
    pub initial_gid: Option<u32>,
    /// Requested IOPS; retained only for IOPS-tunable profiles.
    pub iops: Option<u64>,
    /// Whether traffic to the share is encrypted in transit.
    pub transit_encryption: bool,
}

impl VolumeSpec {
    /// Provisioned capacity in bytes.
    #[must_use]
    pub const fn capacity_bytes(&self) -> u64 {
        self.capacity_gib.saturating_mul(GIB)
    }
}

/// Closed set of accepted parameter keys, in validation-precedence order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ParamKey {
    Profile,
    Iops,
    Zone,
    Region,
    Tags,
    ResourceGroup,
    Encrypted,
    EncryptionKey,
    SecurityGroupIds,
    PrimaryIpId,
    PrimaryIpAddress,
    SubnetId,
    EniEnabled,
    TransitEncryption,
    Uid,
    Gid,
    ClassVersion,
    SizeRange,
    SizeIopsRange,
    Generation,
    BillingType,
}

impl ParamKey {
    /// Declared validation order; the first invalid key in this order wins.
    const ALL: [Self; 21] = [
        Self::Profile,
        Self::Iops,
        Self::Zone,
        Self::Region,
        Self::Tags,
        Self::ResourceGroup,
        Self::Encrypted,
        Self::EncryptionKey,
        Self::SecurityGroupIds,
        Self::PrimaryIpId,
        Self::PrimaryIpAddress,
        Self::SubnetId,
        Self::EniEnabled,
        Self::TransitEncryption,
        Self::Uid,
        Self::Gid,
        Self::ClassVersion,
        Self::SizeRange,
        Self::SizeIopsRange,
        Self::Generation,
        Self::BillingType,
    ];

    const fn name(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Iops => "iops",
            Self::Zone => "zone",
            Self::Region => "region",
            Self::Tags => "tags",
            Self::ResourceGroup => "resourceGroup",
            Self::Encrypted => "encrypted",
            Self::EncryptionKey => "encryptionKey",
            Self::SecurityGroupIds => "securityGroupIDs",
            Self::PrimaryIpId => "primaryIPID",
            Self::PrimaryIpAddress => "primaryIPAddress",
            Self::SubnetId => "subnetID",
            Self::EniEnabled => "isENIEnabled",
            Self::TransitEncryption => "encryptionInTransit",
            Self::Uid => "uid",
            Self::Gid => "gid",
            Self::ClassVersion => "classVersion",
            Self::SizeRange => "sizeRange",
            Self::SizeIopsRange => "sizeIOPSRange",
            Self::Generation => "generation",
            Self::BillingType => "billingType",
        }
    }

    /// Whether the key belongs to the secret pass. The profile is fixed by
    /// the class parameters and cannot be overridden.
    const fn allowed_in_secrets(self) -> bool {
        !matches!(self, Self::Profile)
    }
}

/// Errors raised while resolving parameters into a [`VolumeSpec`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ResolveError {
    /// Raised when a class parameter key is outside the accepted set.
    #[error("unknown storage class parameter '{key}'")]
    UnknownParameter {
        /// The offending key.
        key: String,
    },
    /// Raised when a secret key is outside the overridable set.
    #[error("unknown secret key '{key}'")]
    UnknownSecret {
        /// The offending key.
        key: String,
    },
    /// Raised when a bounded string field exceeds its limit.
    #[error("{field} '{value}' exceeds the {limit} character limit")]
    ValueTooLong {
        /// Field being validated.
        field: &'static str,
        /// Offending value.
        value: String,
        /// Fixed maximum for the field.
        limit: usize,
    },
    /// Raised when a boolean field is neither `true` nor `false`.
    #[error("{field} must be 'true' or 'false', got '{value}'")]
    InvalidBool {
        /// Field being validated.
        field: &'static str,
        /// Offending value.
        value: String,
    },
    /// Raised when a numeric field fails to parse.
    #[error("{field} must be a non-negative integer, got '{value}'")]
    InvalidNumber {
        /// Field being validated.
        field: &'static str,
        /// Offending value.
        value: String,
    },
    /// Profile, capacity-range, or IOPS-band violations.
    #[error(transparent)]
    Profile(#[from] ProfileError),
    /// Raised when the capacity limit is below the required capacity.
    #[error("capacity limit {limit_bytes} bytes is below the required {required_bytes} bytes")]
    LimitBelowRequired {
        /// Requested limit in bytes.
        limit_bytes: u64,
        /// Requested required capacity in bytes.
        required_bytes: u64,
    },
    /// Raised when the capacity limit is below the backend minimum.
    #[error("capacity limit {limit_bytes} bytes is below the minimum {min_bytes} bytes")]
    LimitBelowMinimum {
        /// Requested limit in bytes.
        limit_bytes: u64,
        /// Backend minimum in bytes.
        min_bytes: u64,
    },
    /// Raised when rounding the required capacity up to a whole GiB would
    /// exceed the capacity limit.
    #[error(
        "capacity limit {limit_bytes} bytes is below the {rounded_bytes} bytes \
         of the required capacity rounded up to a whole GiB"
    )]
    LimitBelowRounded {
        /// Requested limit in bytes.
        limit_bytes: u64,
        /// Required capacity after whole-GiB rounding, in bytes.
        rounded_bytes: u64,
    },
    /// Raised when no zone was supplied and no topology segment carries a
    /// zone/region pair to derive one from.
    #[error("no topology segment carries a zone and region to place the share")]
    MissingTopology,
    /// Raised when a subnet or primary IP is requested without placement.
    #[error("zone and region is mandatory when subnetID or a primary IP is requested")]
    ZoneRegionRequired,
    /// Raised when a primary IP is given both by id and by address.
    #[error("primaryIPID and primaryIPAddress are mutually exclusive")]
    PrimaryIpConflict,
    /// Raised when a primary IP address is given without a subnet.
    #[error("primaryIPAddress requires subnetID to be set")]
    PrimaryIpAddressRequiresSubnet,
    /// Raised when in-transit encryption is requested outside
    /// security-group mode.
    #[error("encryptionInTransit requires security-group access control")]
    TransitEncryptionRequiresSecurityGroup,
    /// Raised when neither the parameters nor the backend default supply a
    /// resource group.
    #[error("no resource group supplied and the account has no default")]
    MissingResourceGroup,
}

/// Working state accumulated over the two resolution passes.
struct Draft {
    profile: Profile,
    capacity_gib: u64,
    zone: Option<String>,
    region: Option<String>,
    resource_group_id: String,
    tags: Vec<String>,
    encrypted: bool,
    encryption_key: Option<String>,
    security_group_ids: Vec<String>,
    primary_ip_id: Option<String>,
    primary_ip_address: Option<String>,
    subnet_id: Option<String>,
    eni_enabled: Option<bool>,
    transit_encryption: Option<bool>,
    iops: Option<u64>,
    uid: Option<u32>,
    gid: Option<u32>,
}

/// Resolves class parameters and secret overrides into a [`VolumeSpec`].
///
/// The caller supplies the requested capacity range, the orchestrator's
/// preferred placement topology, and the account's default resource group.
/// The returned spec carries an empty `name`; the controller fills it from
/// the provisioning request.
///
/// # Errors
///
/// Returns [`ResolveError`] on the first invalid key in declared order;
/// validation never partially applies a field.
pub fn resolve(
    parameters: &HashMap<String, String>,
    secrets: &HashMap<String, String>,
    capacity_range: Option<&CapacityRange>,
    topology: &[Topology],
    default_resource_group: &str,
) -> Result<VolumeSpec, ResolveError> {
    reject_unknown_parameters(parameters)?;
    reject_unknown_secrets(secrets)?;

    let profile = parse_profile(parameters.get(ParamKey::Profile.name()))?;
    let capacity_gib = resolve_capacity_gib(capacity_range, profile)?;

    let mut draft = Draft {
        profile,
        capacity_gib,
        zone: None,
        region: None,
        resource_group_id: default_resource_group.trim().to_owned(),
        tags: Vec::new(),
        encrypted: false,
        encryption_key: None,
        security_group_ids: Vec::new(),
        primary_ip_id: None,
        primary_ip_address: None,
        subnet_id: None,
        eni_enabled: None,
        transit_encryption: None,
        iops: None,
        uid: None,
        gid: None,
    };

    for key in ParamKey::ALL {
        if let Some(value) = parameters.get(key.name()) {
            draft.apply(key, value)?;
        }
    }
    for key in ParamKey::ALL {
        if !key.allowed_in_secrets() {
            continue;
        }
        if let Some(value) = secrets.get(key.name()) {
            draft.apply(key, value)?;
        }
    }

    draft.finish(topology)
}

/// Rejects class-parameter keys outside the accepted set. Unknown keys are
/// reported in lexical order so the error is deterministic even though the
/// map's iteration order is not.
fn reject_unknown_parameters(parameters: &HashMap<String, String>) -> Result<(), ResolveError> {
    let mut unknown: Vec<&String> = parameters
        .keys()
        .filter(|key| !ParamKey::ALL.iter().any(|known| known.name() == key.as_str()))
        .collect();
    unknown.sort();
    match unknown.first() {
        Some(key) => Err(ResolveError::UnknownParameter {
            key: (*key).clone(),
        }),
        None => Ok(()),
    }
}

/// Rejects secret keys outside the overridable set, lexically first.
fn reject_unknown_secrets(secrets: &HashMap<String, String>) -> Result<(), ResolveError> {
    let mut unknown: Vec<&String> = secrets
        .keys()
        .filter(|key| {
            !ParamKey::ALL
                .iter()
                .any(|known| known.allowed_in_secrets() && known.name() == key.as_str())
        })
        .collect();
    unknown.sort();
    match unknown.first() {
        Some(key) => Err(ResolveError::UnknownSecret {
            key: (*key).clone(),
        }),
        None => Ok(()),
    }
}

fn parse_profile(value: Option<&String>) -> Result<Profile, ResolveError> {
    value.map_or(Ok(Profile::Dp2), |raw| Ok(raw.parse::<Profile>()?))
}

/// Applies the capacity-resolution rules: round the required value up to a
/// whole GiB, clamp to the profile minimum, honour the limit as a hard cap
/// that the resolved capacity never exceeds.
fn resolve_capacity_gib(
    range: Option<&CapacityRange>,
    profile: Profile,
) -> Result<u64, ResolveError> {
    let min_gib = profile.min_capacity_gib();
    let min_bytes = min_gib.saturating_mul(GIB);
    let Some(bounds) = range else {
        return Ok(min_gib);
    };

    if bounds.required_bytes == 0 && bounds.limit_bytes == 0 {
        return Ok(min_gib);
    }

    if bounds.required_bytes == 0 {
        // Only a limit: round down to the largest whole GiB under the cap.
        if bounds.limit_bytes < min_bytes {
            return Err(ResolveError::LimitBelowMinimum {
                limit_bytes: bounds.limit_bytes,
                min_bytes,
            });
        }
        let capped = whole_gib_under(bounds.limit_bytes);
        profile.validate_capacity(capped)?;
        return Ok(capped);
    }

    if bounds.limit_bytes != 0 {
        if bounds.limit_bytes < bounds.required_bytes {
            return Err(ResolveError::LimitBelowRequired {
                limit_bytes: bounds.limit_bytes,
                required_bytes: bounds.required_bytes,
            });
        }
        if bounds.limit_bytes < min_bytes {
            return Err(ResolveError::LimitBelowMinimum {
                limit_bytes: bounds.limit_bytes,
                min_bytes,
            });
        }
    }

    let rounded = bounds.required_bytes.div_ceil(GIB).max(min_gib);
    let rounded_bytes = rounded.saturating_mul(GIB);
    if bounds.limit_bytes != 0 && rounded_bytes > bounds.limit_bytes {
        return Err(ResolveError::LimitBelowRounded {
            limit_bytes: bounds.limit_bytes,
            rounded_bytes,
        });
    }
    profile.validate_capacity(rounded)?;
    Ok(rounded)
}

/// Largest whole-GiB capacity that does not exceed `bytes`.
const fn whole_gib_under(bytes: u64) -> u64 {
    let ceiled = bytes.div_ceil(GIB);
    if ceiled.saturating_mul(GIB) > bytes {
        ceiled.saturating_sub(1)
    } else {
        ceiled
    }
}

fn check_len(field: &'static str, value: &str, limit: usize) -> Result<(), ResolveError> {
    if value.len() > limit {
        return Err(ResolveError::ValueTooLong {
            field,
            value: value.to_owned(),
            limit,
        });
    }
    Ok(())
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ResolveError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ResolveError::InvalidBool {
            field,
            value: other.to_owned(),
        }),
    }
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, ResolveError> {
    value
        .parse::<u64>()
        .map_err(|_| ResolveError::InvalidNumber {
            field,
            value: value.to_owned(),
        })
}

fn parse_u32(field: &'static str, value: &str) -> Result<u32, ResolveError> {
    value
        .parse::<u32>()
        .map_err(|_| ResolveError::InvalidNumber {
            field,
            value: value.to_owned(),
        })
}

impl Draft {
    /// Applies one key to the draft; fully rejects or fully accepts the
    /// field before the caller moves to the next one.
    fn apply(&mut self, key: ParamKey, value: &str) -> Result<(), ResolveError> {
        match key {
            // Consumed before the passes run; capacity depends on it.
            ParamKey::Profile => Ok(()),
            ParamKey::Iops => {
                self.iops = Some(parse_u64("iops", value)?);
                Ok(())
            }
            ParamKey::Zone => {
                check_len("zone", value, MAX_ZONE_LEN)?;
                self.zone = Some(value.to_owned());
                Ok(())
            }
            ParamKey::Region => {
                check_len("region", value, MAX_REGION_LEN)?;
                self.region = Some(value.to_owned());
                Ok(())
            }
            ParamKey::Tags => self.append_tags(value),
            ParamKey::ResourceGroup => {
                check_len("resourceGroup", value, MAX_RESOURCE_GROUP_LEN)?;
                self.resource_group_id = value.to_owned();
                Ok(())
            }
            ParamKey::Encrypted => {
                self.encrypted = parse_bool("encrypted", value)?;
                Ok(())
            }
            ParamKey::EncryptionKey => {
                check_len("encryptionKey", value, MAX_ENCRYPTION_KEY_LEN)?;
                self.encryption_key = Some(value.to_owned());
                Ok(())
            }
            ParamKey::SecurityGroupIds => {
                self.security_group_ids = split_list(value);
                Ok(())
            }
            ParamKey::PrimaryIpId => {
                self.primary_ip_id = Some(value.to_owned());
                Ok(())
            }
            ParamKey::PrimaryIpAddress => {
                self.primary_ip_address = Some(value.to_owned());
                Ok(())
            }
            ParamKey::SubnetId => {
                self.subnet_id = Some(value.to_owned());
                Ok(())
            }
            ParamKey::EniEnabled => {
                self.eni_enabled = Some(parse_bool("isENIEnabled", value)?);
                Ok(())
            }
            ParamKey::TransitEncryption => {
                self.transit_encryption = Some(parse_bool("encryptionInTransit", value)?);
                Ok(())
            }
            ParamKey::Uid => {
                self.uid = Some(parse_u32("uid", value)?);
                Ok(())
            }
            ParamKey::Gid => {
                self.gid = Some(parse_u32("gid", value)?);
                Ok(())
            }
            // Informational keys: accepted and ignored.
            ParamKey::ClassVersion
            | ParamKey::SizeRange
            | ParamKey::SizeIopsRange
            | ParamKey::Generation
            | ParamKey::BillingType => Ok(()),
        }
    }

    /// Tags accumulate across passes instead of replacing each other.
    fn append_tags(&mut self, value: &str) -> Result<(), ResolveError> {
        for tag in split_list(value) {
            check_len("tag", &tag, MAX_TAG_LEN)?;
            self.tags.push(tag);
        }
        Ok(())
    }

    /// Cross-field validation and final assembly.
    fn finish(mut self, topology: &[Topology]) -> Result<VolumeSpec, ResolveError> {
        let access_control_mode = match self.eni_enabled {
            Some(false) => AccessControlMode::Vpc,
            _ => AccessControlMode::SecurityGroup,
        };

        let primary_ip = match (self.primary_ip_id.take(), self.primary_ip_address.take()) {
            (Some(_), Some(_)) => return Err(ResolveError::PrimaryIpConflict),
            (Some(id), None) => Some(PrimaryIp::ById(id)),
            (None, Some(address)) => {
                if self.subnet_id.is_none() {
                    return Err(ResolveError::PrimaryIpAddressRequiresSubnet);
                }
                Some(PrimaryIp::ByAddress(address))
            }
            (None, None) => None,
        };

        let (zone, region) = self.resolve_placement(
            topology,
            access_control_mode,
            primary_ip.is_some(),
        )?;

        if self.transit_encryption == Some(true)
            && access_control_mode == AccessControlMode::Vpc
        {
            return Err(ResolveError::TransitEncryptionRequiresSecurityGroup);
        }

        if self.resource_group_id.is_empty() {
            return Err(ResolveError::MissingResourceGroup);
        }

        let iops = self.resolve_iops()?;

        Ok(VolumeSpec {
            name: String::new(),
            capacity_gib: self.capacity_gib,
            profile: self.profile,
            zone,
            region,
            resource_group_id: self.resource_group_id,
            tags: self.tags,
            encrypted: self.encrypted,
            encryption_key: self.encryption_key,
            access_control_mode,
            security_group_ids: self.security_group_ids,
            primary_ip,
            subnet_id: self.subnet_id,
            initial_uid: self.uid,
            initial_gid: self.gid,
            iops,
            transit_encryption: self.transit_encryption.unwrap_or(false),
        })
    }

    /// Derives the zone/region pair, falling back to the orchestrator's
    /// preferred topology when the zone parameter is absent.
    fn resolve_placement(
        &mut self,
        topology: &[Topology],
        mode: AccessControlMode,
        has_primary_ip: bool,
    ) -> Result<(String, String), ResolveError> {
        if self.zone.is_none() {
            if let Some((zone, region)) = topology.iter().find_map(Topology::zone_region_pair) {
                self.zone = Some(zone.to_owned());
                if self.region.is_none() {
                    self.region = Some(region.to_owned());
                }
            }
        }

        let placement_requested = self.subnet_id.is_some() || has_primary_ip;
        let zone = self.zone.take().unwrap_or_default();
        let region = self.region.take().unwrap_or_default();

        if placement_requested && (zone.is_empty() || region.is_empty()) {
            return Err(ResolveError::ZoneRegionRequired);
        }
        if mode == AccessControlMode::SecurityGroup && (zone.is_empty() || region.is_empty()) {
            // Placement is only optional in VPC mode.
            return Err(ResolveError::MissingTopology);
        }

        Ok((zone, region))
    }

    /// IOPS is retained only for tunable profiles; otherwise any value is
    /// silently dropped. Retained values are checked against the band table.
    fn resolve_iops(&self) -> Result<Option<u64>, ResolveError> {
        let Some(iops) = self.iops else {
            return Ok(None);
        };
        if !self.profile.supports_custom_iops() {
            return Ok(None);
        }
        self.profile.validate_iops(self.capacity_gib, iops)?;
        Ok(Some(iops))
    }
}

/// Splits a comma-separated list, trimming whitespace and skipping empty
/// segments.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
        .collect()
}
