use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a string id whose generated values read `<tag>_<uuid v7>`, so
/// they sort by creation time. Ids received from outside are kept as given.
macro_rules! tagged_id {
    ($(#[$doc:meta])* $name:ident => $tag:literal) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!(concat!($tag, "_{}"), Uuid::now_v7()))
            }

            pub fn from_raw(raw: impl Into<String>) -> Self {
                Self(raw.into())
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
    };
}

tagged_id!(
    /// One conversation between a user and the agents.
    SessionId => "sess"
);
tagged_id!(
    /// Pairs a model's function call with its result.
    ToolCallId => "call"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_their_tag() {
        assert!(SessionId::new().as_str().starts_with("sess_"));
        assert!(ToolCallId::new().to_string().starts_with("call_"));
    }

    #[test]
    fn provider_ids_are_kept_verbatim() {
        let id = ToolCallId::from_raw("call_abc123");
        assert_eq!(id.as_str(), "call_abc123");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""call_abc123""#);
    }

    #[test]
    fn session_ids_sort_by_creation() {
        let ids: Vec<SessionId> = (0..50).map(|_| SessionId::new()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
