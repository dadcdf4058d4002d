//! Encoding of correlation tokens into invoice memos.
//!
//! The memo is the only free-text field that survives the round trip through the
//! payment network, so the token is carried there next to a human-readable
//! description:
//!
//! ```text
//! memo = description SP separator SP token
//! ```
//!
//! The separator is a reserved sequence (`||` by default) that must not appear in
//! the description. Decoding splits at the first separator and trims the remainder.

use std::fmt::{Display, Formatter};

use crate::token::{CorrelationToken, TokenError};

pub const DEFAULT_SEPARATOR: &str = "||";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoError {
    #[error("Memo separator must be non-empty and free of whitespace")]
    InvalidSeparator,
    #[error("Description contains the reserved separator {0:?}")]
    SeparatorInDescription(String),
    #[error("Memo does not contain the separator {0:?}")]
    MissingSeparator(String),
    #[error("Memo carries no token after the separator")]
    EmptyToken,
    #[error("Memo contains the separator more than once")]
    AmbiguousSeparator,
    #[error("Memo carries an invalid token: {0}")]
    InvalidToken(#[from] TokenError),
}

/// Result of [`MemoCodec::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMemo<'a> {
    pub description: &'a str,
    pub token: CorrelationToken,
}

/// Strict encoder/decoder for token-carrying memos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoCodec {
    separator: String,
}

impl Default for MemoCodec {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }
}

impl MemoCodec {
    pub fn new(separator: impl Into<String>) -> Result<Self, MemoError> {
        let separator = separator.into();
        if separator.is_empty() || separator.chars().any(char::is_whitespace) {
            return Err(MemoError::InvalidSeparator);
        }
        Ok(Self { separator })
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Builds the memo for `token`.
    ///
    /// Fails if `description` contains the separator, since the decoder could not
    /// tell where the token starts.
    pub fn encode(&self, description: &str, token: &CorrelationToken) -> Result<String, MemoError> {
        if description.contains(&self.separator) {
            return Err(MemoError::SeparatorInDescription(self.separator.clone()));
        }
        Ok(format!("{} {} {}", description.trim_end(), self.separator, token))
    }

    pub fn decode<'a>(&self, memo: &'a str) -> Result<DecodedMemo<'a>, MemoError> {
        let (description, rest) = memo
            .split_once(self.separator.as_str())
            .ok_or_else(|| MemoError::MissingSeparator(self.separator.clone()))?;
        if rest.contains(&self.separator) {
            return Err(MemoError::AmbiguousSeparator);
        }
        let token = match rest.parse::<CorrelationToken>() {
            Ok(token) => token,
            Err(TokenError::Empty) => return Err(MemoError::EmptyToken),
            Err(e) => return Err(MemoError::InvalidToken(e)),
        };
        Ok(DecodedMemo {
            description: description.trim(),
            token,
        })
    }
}

impl Display for MemoCodec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(s: &str) -> CorrelationToken {
        s.parse().unwrap()
    }

    #[test]
    fn encodes_description_separator_and_token() {
        let codec = MemoCodec::default();
        let memo = codec.encode("Weather report", &token("abc123")).unwrap();
        assert_eq!(memo, "Weather report || abc123");
    }

    #[test]
    fn decodes_reference_memo() {
        let codec = MemoCodec::default();
        let decoded = codec.decode("Weather report || abc123").unwrap();
        assert_eq!(decoded.description, "Weather report");
        assert_eq!(decoded.token, token("abc123"));
    }

    #[test]
    fn decode_trims_token_whitespace() {
        let codec = MemoCodec::default();
        let decoded = codec.decode("Weather report ||   abc123  \n").unwrap();
        assert_eq!(decoded.token, token("abc123"));
    }

    #[test]
    fn round_trips_generated_token_with_date_description() {
        let codec = MemoCodec::default();
        let t = CorrelationToken::generate();
        let memo = codec
            .encode("Weather report at Thu, 15 Oct 2026 10:00:00 +0000", &t)
            .unwrap();
        assert_eq!(codec.decode(&memo).unwrap().token, t);
    }

    #[test]
    fn alternative_separator() {
        let codec = MemoCodec::new("//").unwrap();
        let decoded = codec.decode("Rain report at noon // xyz").unwrap();
        assert_eq!(decoded.token, token("xyz"));
        assert_eq!(
            codec.decode("Weather report || abc123"),
            Err(MemoError::MissingSeparator("//".to_string()))
        );
    }

    #[test]
    fn rejects_bad_separators() {
        assert_eq!(MemoCodec::new(""), Err(MemoError::InvalidSeparator));
        assert_eq!(MemoCodec::new("| |"), Err(MemoError::InvalidSeparator));
    }

    #[test]
    fn encode_rejects_separator_in_description() {
        let codec = MemoCodec::default();
        assert_eq!(
            codec.encode("a || b", &token("abc")),
            Err(MemoError::SeparatorInDescription("||".to_string()))
        );
    }

    #[test]
    fn decode_reports_malformed_memos() {
        let codec = MemoCodec::default();
        assert_eq!(
            codec.decode("Weather report abc123"),
            Err(MemoError::MissingSeparator("||".to_string()))
        );
        assert_eq!(codec.decode("Weather report ||   "), Err(MemoError::EmptyToken));
        assert_eq!(codec.decode("Weather report ||"), Err(MemoError::EmptyToken));
        assert_eq!(
            codec.decode("a || b || c"),
            Err(MemoError::AmbiguousSeparator)
        );
        assert_eq!(
            codec.decode("a || b c"),
            Err(MemoError::InvalidToken(TokenError::InvalidCharacter))
        );
    }
}
