//! Identifier newtypes and timestamps.
//!
//! Every aggregate is addressed by an opaque UUID behind its own newtype
//! so that a task id can never be passed where a user id is expected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Mint a fresh random identifier.
            #[must_use]
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
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id! {
    /// Identifier of a task on the board.
    TaskId
}

uuid_id! {
    /// Canonical identifier of a user. Users are created externally;
    /// the board core only ever reads them.
    UserId
}

uuid_id! {
    /// Identifier of one live duplex connection from one client.
    SessionId
}

uuid_id! {
    /// Identifier of a detected version conflict. Minted when a stale
    /// write is rejected and quoted back by the client on resolution.
    ConflictId
}

uuid_id! {
    /// Identifier of an activity record.
    ActivityId
}

/// A UTC instant with serde support.
///
/// Thin wrapper around [`chrono::DateTime<Utc>`] so domain types do not
/// spell out the chrono generics everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    /// The current instant.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Whether this instant lies strictly in the future.
    #[must_use]
    pub fn is_future(&self) -> bool {
        self.0 > Utc::now()
    }

    /// The instant `days` days before now.
    #[must_use]
    pub fn days_ago(days: u32) -> Self {
        Self(Utc::now() - chrono::Duration::days(i64::from(days)))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn id_round_trips_through_serde() {
        let id = TaskId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn id_parses_from_display() {
        let id = UserId::new();
        let parsed: UserId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn timestamp_ordering() {
        let earlier = Timestamp::days_ago(1);
        let now = Timestamp::now();
        assert!(earlier < now);
        assert!(!earlier.is_future());
    }
}
