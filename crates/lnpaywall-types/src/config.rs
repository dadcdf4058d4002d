//! Configuration helpers shared by the paywall crates.
//!
//! [`LiteralOrEnv`] lets a configuration value be written literally or as a
//! reference to an environment variable, which keeps node URLs and credential
//! paths out of checked-in config files:
//!
//! ```json
//! {
//!   "rest_url": "https://localhost:8080",
//!   "macaroon": "$LND_MACAROON_PATH",
//!   "tls_cert": "${LND_TLS_CERT}"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::str::FromStr;

/// A value resolved from a literal or from `$VAR` / `${VAR}` at deserialization time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralOrEnv<T>(T);

impl<T> LiteralOrEnv<T> {
    pub fn from_literal(value: T) -> Self {
        Self(value)
    }

    pub fn inner(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Returns the variable name if `s` is written as `$VAR` or `${VAR}`.
fn env_var_name(s: &str) -> Option<&str> {
    if let Some(braced) = s.strip_prefix("${") {
        return braced.strip_suffix('}').filter(|name| !name.is_empty());
    }
    let name = s.strip_prefix('$')?;
    let is_name = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    is_name.then_some(name)
}

impl<T> Deref for LiteralOrEnv<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de, T> Deserialize<'de> for LiteralOrEnv<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let value = match env_var_name(&raw) {
            Some(name) => std::env::var(name).map_err(|_| {
                serde::de::Error::custom(format!(
                    "Environment variable '{name}' not found (referenced as '{raw}')"
                ))
            })?,
            None => raw,
        };
        value
            .parse::<T>()
            .map(LiteralOrEnv)
            .map_err(|e| serde::de::Error::custom(format!("Failed to parse value: {e}")))
    }
}

impl<T: Serialize> Serialize for LiteralOrEnv<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_env_syntax() {
        assert_eq!(env_var_name("$LND_HOST"), Some("LND_HOST"));
        assert_eq!(env_var_name("${LND_HOST}"), Some("LND_HOST"));
        assert_eq!(env_var_name("$"), None);
        assert_eq!(env_var_name("${}"), None);
        assert_eq!(env_var_name("$not/a/var"), None);
        assert_eq!(env_var_name("https://localhost:8080"), None);
    }

    #[test]
    fn literal_value_parses() {
        let value: LiteralOrEnv<u64> = serde_json::from_str("\"21\"").unwrap();
        assert_eq!(*value, 21);
    }

    #[test]
    fn resolves_from_environment() {
        // PATH is set in every test environment this runs in.
        let expected = std::env::var("PATH").unwrap();
        let value: LiteralOrEnv<String> = serde_json::from_str("\"$PATH\"").unwrap();
        assert_eq!(value.into_inner(), expected);
    }

    #[test]
    fn missing_variable_is_an_error() {
        let result =
            serde_json::from_str::<LiteralOrEnv<String>>("\"${LNPAYWALL_SURELY_UNSET_VAR}\"");
        assert!(result.is_err());
    }
}
