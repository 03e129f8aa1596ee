//! Client identifiers.

use std::borrow::Borrow;
use std::fmt;

use crate::ProtocolError;

/// Default upper bound on identifier length, in bytes.
pub const DEFAULT_MAX_ID_LEN: usize = 64;

/// The name a peer registers under.
///
/// Chosen by the peer, not the server. Comparison is case-sensitive and
/// the value is never empty. Only [`ClientId::parse`] constructs one, so
/// every `ClientId` in the system has passed the same checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    /// Builds an identifier from a registration frame.
    ///
    /// Surrounding whitespace is trimmed first. The trimmed value must be
    /// non-empty and at most `max_len` bytes.
    pub fn parse(raw: &str, max_len: usize) -> Result<Self, ProtocolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::EmptyId);
        }
        if trimmed.len() > max_len {
            return Err(ProtocolError::IdTooLong { max: max_len });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lets a `HashMap<ClientId, _>` be queried with a plain `&str`.
impl Borrow<str> for ClientId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_whitespace() {
        let id = ClientId::parse("  alice \t", DEFAULT_MAX_ID_LEN).unwrap();
        assert_eq!(id.as_str(), "alice");
    }

    #[test]
    fn test_parse_rejects_empty_and_blank() {
        assert_eq!(
            ClientId::parse("", DEFAULT_MAX_ID_LEN),
            Err(ProtocolError::EmptyId)
        );
        assert_eq!(
            ClientId::parse("   ", DEFAULT_MAX_ID_LEN),
            Err(ProtocolError::EmptyId)
        );
    }

    #[test]
    fn test_parse_caps_length_after_trim() {
        assert!(ClientId::parse("  abcd  ", 4).is_ok());
        assert_eq!(
            ClientId::parse("abcde", 4),
            Err(ProtocolError::IdTooLong { max: 4 })
        );
    }

    #[test]
    fn test_ids_are_case_sensitive() {
        let lower = ClientId::parse("bob", DEFAULT_MAX_ID_LEN).unwrap();
        let upper = ClientId::parse("Bob", DEFAULT_MAX_ID_LEN).unwrap();
        assert_ne!(lower, upper);
    }

    #[test]
    fn test_borrow_allows_str_lookup() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ClientId::parse("carol", 64).unwrap(), 1);
        assert_eq!(map.get("carol"), Some(&1));
    }
}
