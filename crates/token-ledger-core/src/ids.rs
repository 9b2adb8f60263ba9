//! Identifier types for the ledger.
//!
//! Organizations, subscriptions and notification thresholds use UUIDs.
//! Purchases and balance-history entries use ULIDs so that their natural key
//! order is also their chronological order, which the store relies on for
//! range scans.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Define a UUID-based identifier newtype with the standard trait set:
/// `Copy`, `Hash`, string-based serde, `FromStr`, `Display`, `Debug`,
/// `TryFrom<String>`, `Into<String>` and `AsRef<[u8]>` for key encoding.
macro_rules! uuid_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Create an identifier from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Generate a new random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Return the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }

            /// Return the 16 raw bytes of the UUID.
            #[must_use]
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = uuid::Uuid::parse_str(s).map_err(|_| IdError::InvalidUuid)?;
                Ok(Self(uuid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                self.0.as_bytes()
            }
        }
    };
}

uuid_id_type!(
    OrganizationId,
    "An organization identifier.\n\nOne wallet exists per organization; the id is assigned at onboarding by the surrounding platform."
);
uuid_id_type!(SubscriptionId, "A recurring-purchase subscription identifier.");
uuid_id_type!(
    ThresholdId,
    "A low-balance notification threshold identifier."
);

/// Define a ULID-based identifier newtype.
///
/// ULIDs carry a millisecond timestamp prefix, so lexicographic byte order is
/// chronological order.
macro_rules! ulid_id_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Ulid);

        impl $name {
            /// Create an identifier from an existing ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Generate a new identifier stamped with the current time.
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            /// Return the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> &Ulid {
                &self.0
            }

            /// Return the 16 raw bytes of the ULID.
            #[must_use]
            pub fn to_bytes(&self) -> [u8; 16] {
                self.0.to_bytes()
            }

            /// Reconstruct an identifier from its raw bytes.
            #[must_use]
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Ulid::from_bytes(bytes))
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let ulid = Ulid::from_string(s).map_err(|_| IdError::InvalidUlid)?;
                Ok(Self(ulid))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0.to_string()
            }
        }
    };
}

ulid_id_type!(
    PurchaseId,
    "A purchase identifier (ULID).\n\nTime-ordered so that per-organization purchase listings come back chronologically without a secondary sort key. The *idempotency* key of a purchase is its separate caller-facing `reference_id` string."
);
ulid_id_type!(
    EntryId,
    "A balance-history entry identifier (ULID).\n\nTime-ordered; history scans over a key range are chronological."
);

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input is not a valid UUID.
    #[error("invalid UUID format")]
    InvalidUuid,

    /// The input is not a valid ULID.
    #[error("invalid ULID format")]
    InvalidUlid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn organization_id_roundtrip() {
        let id = OrganizationId::generate();
        let parsed = OrganizationId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn organization_id_serde_json() {
        let id = OrganizationId::generate();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: OrganizationId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn purchase_id_roundtrip() {
        let id = PurchaseId::generate();
        let parsed = PurchaseId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn purchase_id_bytes_roundtrip() {
        let id = PurchaseId::generate();
        assert_eq!(PurchaseId::from_bytes(id.to_bytes()), id);
    }

    #[test]
    fn entry_ids_are_time_ordered() {
        let first = EntryId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = EntryId::generate();
        assert!(first < second);
        assert!(first.to_bytes() < second.to_bytes());
    }

    #[test]
    fn invalid_uuid_rejected() {
        assert_eq!(
            OrganizationId::from_str("not-a-uuid").unwrap_err(),
            IdError::InvalidUuid
        );
    }
}
