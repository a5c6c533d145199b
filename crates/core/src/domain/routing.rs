use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Caller-supplied key selecting which handler and guardrail set process a message.
///
/// Keys are case-normalized on construction, so `"Bank"` and `" bank "` resolve to the
/// same registration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainKey(String);

impl DomainKey {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_lowercase())
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let key = Self::new(raw);
        if key.0.is_empty() {
            return Err(DomainError::InvalidRequest("domain key must not be blank".to_string()));
        }
        Ok(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::DomainKey;
    use crate::errors::DomainError;

    #[test]
    fn domain_key_normalizes_case_and_whitespace() {
        assert_eq!(DomainKey::new("  Bank "), DomainKey::new("bank"));
        assert_eq!(DomainKey::new("HOSPITAL").as_str(), "hospital");
    }

    #[test]
    fn blank_domain_key_is_rejected() {
        let error = DomainKey::parse("   ").expect_err("blank key should fail");
        assert!(matches!(error, DomainError::InvalidRequest(ref message) if message.contains("domain key")));
    }
}
