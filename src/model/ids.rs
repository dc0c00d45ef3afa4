//! Identifier newtypes.
//!
//! Entities created by the engine get UUID identifiers. Reference data owned
//! by collaborators (geographic units, ballot categories, submitters) is
//! addressed by the collaborator's own stable code.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                // Short display: first 8 chars of UUID
                write!(f, "{}", &self.0.to_string()[..8])
            }
        }
    };
}

macro_rules! code_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

uuid_id!(
    /// A polling place.
    PlaceId
);
uuid_id!(
    /// A (polling place, category) work unit.
    WorkUnitId
);
uuid_id!(
    /// An uploaded photograph of a tally sheet.
    AttachmentId
);
uuid_id!(
    /// An identification claim in the ledger.
    IdentificationClaimId
);
uuid_id!(
    /// A count claim in the ledger.
    CountClaimId
);
uuid_id!(
    /// A configured priority curve segment.
    SegmentId
);

code_id!(
    /// Geographic unit a polling place belongs to (e.g. an electoral section).
    GeoUnitId
);
code_id!(
    /// Ballot category (e.g. "president").
    CategoryId
);
code_id!(
    /// Ballot option within a category.
    OptionId
);
code_id!(
    /// Stable submitter identity resolved by the authentication collaborator.
    SubmitterId
);
