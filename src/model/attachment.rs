//! Attachments: photographs of tally sheets awaiting identification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AttachmentId, GeoUnitId, IdentificationClaimId, PlaceId};
use crate::error::Error;

/// Identification state of an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentStatus {
    Unidentified,
    /// A quorum agreed on the polling place.
    Identified,
    /// A quorum reported a problem, or reporters disagree irreconcilably.
    Flagged,
}

impl AttachmentStatus {
    pub fn can_transition_to(self, to: AttachmentStatus) -> bool {
        use AttachmentStatus::*;
        matches!((self, to), (Unidentified, Identified) | (Unidentified, Flagged))
    }

    pub fn is_final(self) -> bool {
        match self {
            AttachmentStatus::Unidentified => false,
            AttachmentStatus::Identified | AttachmentStatus::Flagged => true,
        }
    }
}

impl std::fmt::Display for AttachmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AttachmentStatus::Unidentified => "unidentified",
            AttachmentStatus::Identified => "identified",
            AttachmentStatus::Flagged => "flagged",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AttachmentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unidentified" => Ok(AttachmentStatus::Unidentified),
            "identified" => Ok(AttachmentStatus::Identified),
            "flagged" => Ok(AttachmentStatus::Flagged),
            other => Err(Error::Other(format!("unknown attachment status: {other}"))),
        }
    }
}

/// An uploaded photograph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    pub status: AttachmentStatus,
    /// Place the attachment was identified as, once identified.
    pub place: Option<PlaceId>,
    pub confirmed_identification: Option<IdentificationClaimId>,
    /// Geographic unit the uploader said the photo comes from, if any.
    /// Only used to pick an identification priority curve.
    pub geo_unit_hint: Option<GeoUnitId>,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Attachment {
    pub fn new(geo_unit_hint: Option<GeoUnitId>) -> Self {
        let now = Utc::now();
        Self {
            id: AttachmentId::new(),
            status: AttachmentStatus::Unidentified,
            place: None,
            confirmed_identification: None,
            geo_unit_hint,
            uploaded_at: now,
            updated_at: now,
        }
    }
}
