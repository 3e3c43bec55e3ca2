//! Anonymous identity and its generation strategy.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::IdentityError;

/// Prefix of every anonymous identity.
pub const IDENTITY_PREFIX: &str = "User-";

/// Number of hex characters after the prefix.
pub const SUFFIX_LEN: usize = 8;

/// Stable pseudonymous label for the local user, e.g. `User-1a2b3c4d`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AnonymousIdentity(String);

impl AnonymousIdentity {
    /// Parse a stored identity string.
    ///
    /// # Errors
    /// Returns [`IdentityError::Malformed`] unless the value is `User-`
    /// followed by exactly eight hex characters.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let suffix = raw
            .strip_prefix(IDENTITY_PREFIX)
            .ok_or_else(|| IdentityError::Malformed(raw.to_string()))?;
        Self::from_suffix(suffix).map_err(|_| IdentityError::Malformed(raw.to_string()))
    }

    /// Build an identity from its hex suffix.
    ///
    /// # Errors
    /// Returns [`IdentityError::Malformed`] if the suffix is not eight hex characters.
    pub fn from_suffix(suffix: &str) -> Result<Self, IdentityError> {
        if suffix.len() != SUFFIX_LEN || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IdentityError::Malformed(suffix.to_string()));
        }
        Ok(Self(format!("{IDENTITY_PREFIX}{}", suffix.to_ascii_lowercase())))
    }

    /// The identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnonymousIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AnonymousIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AnonymousIdentity> for String {
    fn from(identity: AnonymousIdentity) -> Self {
        identity.0
    }
}

/// Strategy for minting new identities.
///
/// Collisions are cheap and non-adversarial, so any reasonably random
/// source works.
pub trait IdentityGenerator: Send + Sync {
    /// Produce a fresh identity.
    fn generate(&self) -> AnonymousIdentity;
}

/// Default generator: a random UUID v4 truncated to eight hex characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdentityGenerator;

impl IdentityGenerator for RandomIdentityGenerator {
    fn generate(&self) -> AnonymousIdentity {
        let hex = Uuid::new_v4().simple().to_string();
        AnonymousIdentity(format!("{IDENTITY_PREFIX}{}", &hex[..SUFFIX_LEN]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identity_format() {
        let id = RandomIdentityGenerator.generate();
        let s = id.as_str();
        assert!(s.starts_with("User-"));
        assert_eq!(s.len(), IDENTITY_PREFIX.len() + SUFFIX_LEN);
        assert!(AnonymousIdentity::parse(s).is_ok());
    }

    #[test]
    fn test_parse_rejects_bad_values() {
        for raw in ["", "User-", "User-1234567", "User-123456789", "User-zzzzzzzz", "user-12345678"] {
            assert!(AnonymousIdentity::parse(raw).is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn test_parse_normalizes_case() {
        let id = AnonymousIdentity::parse("User-ABCDEF12").unwrap();
        assert_eq!(id.as_str(), "User-abcdef12");
    }

    #[test]
    fn test_serde_validates() {
        let id: AnonymousIdentity = serde_json::from_str("\"User-0a1b2c3d\"").unwrap();
        assert_eq!(id.to_string(), "User-0a1b2c3d");
        assert!(serde_json::from_str::<AnonymousIdentity>("\"someone\"").is_err());
    }
}
