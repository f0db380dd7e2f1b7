//! Time-ordered unique identifiers.
//!
//! Both session and conversation ids are ULID-style: lexicographically
//! sortable by creation time without needing a separate sequence. We realize
//! this with UUIDv7, the same choice `skynet-core` makes for `UserId`.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! time_ordered_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh, time-ordered id.
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

time_ordered_id!(SessionId);
time_ordered_id!(ConversationId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn from_str_round_trips() {
        let id = SessionId::from("01930000-0000-7000-8000-000000000000");
        assert_eq!(id.as_str(), "01930000-0000-7000-8000-000000000000");
    }

    #[test]
    fn display_matches_as_str() {
        let id = ConversationId::new();
        assert_eq!(id.to_string(), id.as_str());
    }
}
