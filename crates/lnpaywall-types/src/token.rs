//! Correlation tokens binding a minted invoice to later resource requests.
//!
//! A [`CorrelationToken`] is generated when a payment challenge is issued, travels
//! inside the invoice memo to the payment network, comes back on the settlement feed,
//! and is finally presented by the client in a request header. It is therefore
//! restricted to visible ASCII so it is always a valid HTTP header value.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

/// Upper bound on accepted token length, in bytes.
pub const MAX_TOKEN_LEN: usize = 128;

/// Opaque, globally unique identifier of a single payment challenge.
///
/// # Example
///
/// ```
/// use lnpaywall_types::token::CorrelationToken;
///
/// let token = CorrelationToken::generate();
/// let parsed: CorrelationToken = token.to_string().parse().unwrap();
/// assert_eq!(token, parsed);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationToken(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Correlation token is empty")]
    Empty,
    #[error("Correlation token is longer than {MAX_TOKEN_LEN} bytes")]
    TooLong,
    #[error("Correlation token contains a character that is not visible ASCII")]
    InvalidCharacter,
}

impl CorrelationToken {
    /// Generates a fresh random token: a UUIDv4 (122 random bits) in hyphenated form.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl FromStr for CorrelationToken {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TokenError::Empty);
        }
        if s.len() > MAX_TOKEN_LEN {
            return Err(TokenError::TooLong);
        }
        if !s.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(TokenError::InvalidCharacter);
        }
        Ok(Self(s.to_string()))
    }
}

impl Display for CorrelationToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CorrelationToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for CorrelationToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CorrelationToken {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
