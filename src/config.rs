//! Bridge configuration.
//!
//! Deserializable with serde so it can live in the host application's own
//! config file:
//!
//! ```toml
//! base_uri = "https://api.example.com/v1/"
//! continue_per_chunk = false
//! ```

use serde::Deserialize;
use url::Url;

/// Default base URI for resolving request targets.
pub const DEFAULT_BASE_URI: &str = "http://localhost/";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base against which every request target is resolved.
    pub base_uri: Url,

    /// Send an informational `100 Continue` after every non-terminal chunk
    /// of an `Expect: 100-continue` request, not only after the head.
    pub continue_per_chunk: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_uri: Url::parse(DEFAULT_BASE_URI).expect("default base URI is valid"),
            continue_per_chunk: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_keys() {
        let config: BridgeConfig = toml::from_str("continue_per_chunk = true").unwrap();
        assert!(config.continue_per_chunk);
        assert_eq!(config.base_uri.as_str(), DEFAULT_BASE_URI);
    }

    #[test]
    fn parses_base_uri() {
        let config: BridgeConfig =
            toml::from_str(r#"base_uri = "https://api.example.com/v1/""#).unwrap();
        assert_eq!(config.base_uri.scheme(), "https");
        assert!(!config.continue_per_chunk);
    }

    #[test]
    fn rejects_relative_base_uri() {
        assert!(toml::from_str::<BridgeConfig>(r#"base_uri = "/v1/""#).is_err());
    }
}
