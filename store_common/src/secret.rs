use std::{
    fmt,
    fmt::{Debug, Display},
};

use serde::Deserialize;

/// A wrapper that keeps credentials out of logs. Both `Debug` and `Display` render as `****`; the only way to get at
/// the inner value is an explicit [`Secret::reveal`] call, which makes every use grep-able.
///
/// Deserialization is transparent so secrets can sit directly in config structs read from the environment or JSON.
/// Serialization is deliberately not implemented.
#[derive(Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct Secret<T>(T);

impl<T> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn reveal(&self) -> &T {
        &self.0
    }
}

impl<T> From<T> for Secret<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T> Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

impl<T> Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn secrets_are_redacted() {
        let secret = Secret::new("whsec_supersecret".to_string());
        assert_eq!(format!("{secret}"), "****");
        assert_eq!(format!("{secret:?}"), "****");
        assert_eq!(secret.reveal(), "whsec_supersecret");
    }

    #[test]
    fn secrets_deserialize_from_plain_values() {
        #[derive(Deserialize)]
        struct Config {
            api_key: Secret<String>,
        }
        let config: Config = serde_json::from_str(r#"{"api_key": "sk_test_123"}"#).unwrap();
        assert_eq!(config.api_key.reveal(), "sk_test_123");
        assert_eq!(format!("{:?}", config.api_key), "****");
    }
}
