//! Compound volume identity codec.
//!
//! The externally visible volume handle binds a share to its access point as
//! `shareID:accessPointID`. Every consumer that needs either part alone
//! parses the handle back; a missing separator or the wrong segment count is
//! a hard validation error at each of those consumers.

use std::fmt;

use thiserror::Error;

/// Parsed form of the external volume handle.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct CompoundVolumeId {
    /// Backend-assigned share identifier.
    pub share_id: String,
    /// Backend-assigned access-point identifier.
    pub access_point_id: String,
}

impl CompoundVolumeId {
    /// Binds a share id and an access-point id into a compound handle.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeIdError::EmptySegment`] when either id is empty and
    /// [`VolumeIdError::EmbeddedSeparator`] when either id already contains
    /// the `:` separator, which would make the handle ambiguous.
    pub fn new(
        share_id: impl Into<String>,
        access_point_id: impl Into<String>,
    ) -> Result<Self, VolumeIdError> {
        let share = share_id.into();
        let access_point = access_point_id.into();
        if share.is_empty() || access_point.is_empty() {
            return Err(VolumeIdError::EmptySegment);
        }
        if share.contains(':') || access_point.contains(':') {
            return Err(VolumeIdError::EmbeddedSeparator);
        }
        Ok(Self {
            share_id: share,
            access_point_id: access_point,
        })
    }

    /// Parses an external volume handle back into its two segments.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeIdError::Malformed`] unless the value splits into
    /// exactly two non-empty `:`-separated segments.
    pub fn parse(value: &str) -> Result<Self, VolumeIdError> {
        let mut segments = value.split(':');
        let share = segments.next().unwrap_or_default();
        let access_point = segments.next().unwrap_or_default();
        if share.is_empty() || access_point.is_empty() || segments.next().is_some() {
            return Err(VolumeIdError::Malformed {
                value: value.to_owned(),
            });
        }
        Ok(Self {
            share_id: share.to_owned(),
            access_point_id: access_point.to_owned(),
        })
    }
}

impl fmt::Display for CompoundVolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.share_id, self.access_point_id)
    }
}

/// Errors raised by the compound volume identity codec.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VolumeIdError {
    /// Raised when a handle does not hold exactly two non-empty segments.
    #[error("volume id '{value}' is not of the form <shareID>:<accessPointID>")]
    Malformed {
        /// The handle that failed to parse.
        value: String,
    },
    /// Raised when an id supplied at encode time is empty.
    #[error("share id and access point id must be non-empty")]
    EmptySegment,
    /// Raised when an id supplied at encode time contains the separator.
    #[error("share id and access point id must not contain ':'")]
    EmbeddedSeparator,
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn round_trips_through_display() {
        let id = match CompoundVolumeId::new("share-1", "ap-1") {
            Ok(id) => id,
            Err(err) => panic!("encode failed: {err}"),
        };
        let parsed = match CompoundVolumeId::parse(&id.to_string()) {
            Ok(parsed) => parsed,
            Err(err) => panic!("parse failed: {err}"),
        };
        assert_eq!(parsed, id);
        assert_eq!(parsed.share_id, "share-1");
        assert_eq!(parsed.access_point_id, "ap-1");
    }

    #[rstest]
    #[case("share-only")]
    #[case("a:b:c")]
    #[case(":ap-1")]
    #[case("share-1:")]
    #[case("")]
    fn rejects_wrong_segment_counts(#[case] value: &str) {
        assert!(matches!(
            CompoundVolumeId::parse(value),
            Err(VolumeIdError::Malformed { .. })
        ));
    }

    #[test]
    fn rejects_ids_with_embedded_separator() {
        assert_eq!(
            CompoundVolumeId::new("share:1", "ap-1"),
            Err(VolumeIdError::EmbeddedSeparator)
        );
    }

    #[test]
    fn rejects_empty_ids_at_encode_time() {
        assert_eq!(
            CompoundVolumeId::new("", "ap-1"),
            Err(VolumeIdError::EmptySegment)
        );
    }
}
