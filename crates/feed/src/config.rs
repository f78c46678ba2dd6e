//! Feed client configuration
//!
//! [`FeedOptions`] is the loosely-typed form read from YAML or assembled from
//! CLI flags; [`FeedOptions::resolve`] applies defaults and validation and
//! yields the [`FeedConfig`] the client runs with.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::websocket::GDAX_WS_URL;

pub const DEFAULT_PRODUCT: &str = "BTC-USD";
pub const DEFAULT_SAVE_FILE_PREFIX: &str = "default.txt";
pub const DEFAULT_SAVE_MAX_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionMode {
    #[default]
    Subscribe,
    /// Subscribe and additionally ask the feed for heartbeat messages
    Heartbeat,
}

/// What the receive loop does with a frame that is not a JSON object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodePolicy {
    /// Report it and tear the connection down
    #[default]
    Close,
    /// Report it and keep listening
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveConfig {
    pub directory: PathBuf,
    pub file_prefix: String,
    pub max_bytes: u64,
}

/// Validated client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    /// Feed URL without trailing slash
    pub url: String,
    /// Ordered, de-duplicated, never empty
    pub products: Vec<String>,
    pub mode: SubscriptionMode,
    pub save: Option<SaveConfig>,
    pub decode_policy: DecodePolicy,
}

impl FeedConfig {
    pub fn heartbeat(&self) -> bool {
        self.mode == SubscriptionMode::Heartbeat
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: GDAX_WS_URL.to_string(),
            products: vec![DEFAULT_PRODUCT.to_string()],
            mode: SubscriptionMode::default(),
            save: None,
            decode_policy: DecodePolicy::default(),
        }
    }
}

/// Construction-time options; every field is optional.
///
/// ```yaml
/// url: wss://ws-feed.gdax.com
/// products: [BTC-USD, ETH-USD]   # or a single string
/// subscription_mode: heartbeat
/// save_directory: /var/log/gdax
/// save_file_prefix: feed.txt
/// save_max_bytes: 1048576
/// decode_errors: close
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedOptions {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub products: Option<Vec<String>>,
    #[serde(default)]
    pub subscription_mode: Option<SubscriptionMode>,
    #[serde(default)]
    pub save_directory: Option<PathBuf>,
    #[serde(default)]
    pub save_file_prefix: Option<String>,
    #[serde(default)]
    pub save_max_bytes: Option<u64>,
    #[serde(default)]
    pub decode_errors: Option<DecodePolicy>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<OneOrMany>::deserialize(deserializer)?.map(|value| match value {
        OneOrMany::One(product) => vec![product],
        OneOrMany::Many(products) => products,
    }))
}

impl FeedOptions {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply defaults and validate.
    pub fn resolve(self) -> Result<FeedConfig, ConfigError> {
        let url = normalize_url(self.url.as_deref().unwrap_or(GDAX_WS_URL))?;
        let products = normalize_products(self.products.unwrap_or_default())?;

        let save = match (self.save_directory, self.save_file_prefix) {
            (Some(directory), prefix) => Some(SaveConfig {
                directory,
                file_prefix: prefix.unwrap_or_else(|| DEFAULT_SAVE_FILE_PREFIX.to_string()),
                max_bytes: self.save_max_bytes.unwrap_or(DEFAULT_SAVE_MAX_BYTES),
            }),
            (None, Some(_)) => return Err(ConfigError::SaveDirectoryRequired),
            (None, None) => None,
        };

        Ok(FeedConfig {
            url,
            products,
            mode: self.subscription_mode.unwrap_or_default(),
            save,
            decode_policy: self.decode_errors.unwrap_or_default(),
        })
    }
}

fn normalize_url(raw: &str) -> Result<String, ConfigError> {
    let url = raw.trim();
    let url = url.strip_suffix('/').unwrap_or(url);
    Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    Ok(url.to_string())
}

fn normalize_products(raw: Vec<String>) -> Result<Vec<String>, ConfigError> {
    let mut products: Vec<String> = Vec::with_capacity(raw.len().max(1));
    for product in raw {
        let product = product.trim();
        if product.is_empty() {
            return Err(ConfigError::InvalidProduct(product.to_string()));
        }
        if !products.iter().any(|p| p == product) {
            products.push(product.to_string());
        }
    }
    if products.is_empty() {
        products.push(DEFAULT_PRODUCT.to_string());
    }
    Ok(products)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FeedOptions::default().resolve().unwrap();
        assert_eq!(config, FeedConfig::default());
        assert_eq!(config.url, "wss://ws-feed.gdax.com");
        assert_eq!(config.products, vec!["BTC-USD"]);
        assert_eq!(config.mode, SubscriptionMode::Subscribe);
        assert_eq!(config.decode_policy, DecodePolicy::Close);
        assert!(config.save.is_none());
        assert!(!config.heartbeat());
    }

    #[test]
    fn test_url_trailing_slash_stripped() {
        let config = FeedOptions {
            url: Some("wss://ws-feed.example.com/".to_string()),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(config.url, "wss://ws-feed.example.com");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = FeedOptions {
            url: Some("no scheme here".to_string()),
            ..Default::default()
        }
        .resolve()
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn test_products_deduplicated_in_order() {
        let config = FeedOptions {
            products: Some(vec![
                "ETH-USD".to_string(),
                "BTC-USD".to_string(),
                "ETH-USD".to_string(),
            ]),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(config.products, vec!["ETH-USD", "BTC-USD"]);
    }

    #[test]
    fn test_empty_products_default() {
        let config = FeedOptions {
            products: Some(vec![]),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(config.products, vec!["BTC-USD"]);

        let err = FeedOptions {
            products: Some(vec!["  ".to_string()]),
            ..Default::default()
        }
        .resolve()
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProduct(_)));
    }

    #[test]
    fn test_save_defaults_only_with_directory() {
        let config = FeedOptions {
            save_directory: Some(PathBuf::from("/tmp")),
            ..Default::default()
        }
        .resolve()
        .unwrap();
        assert_eq!(
            config.save,
            Some(SaveConfig {
                directory: PathBuf::from("/tmp"),
                file_prefix: "default.txt".to_string(),
                max_bytes: 1_048_576,
            })
        );

        let err = FeedOptions {
            save_file_prefix: Some("feed.txt".to_string()),
            ..Default::default()
        }
        .resolve()
        .unwrap_err();
        assert!(matches!(err, ConfigError::SaveDirectoryRequired));
    }

    #[test]
    fn test_load_yaml_single_product() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
url: wss://ws-feed.gdax.com/
products: ETH-USD
subscription_mode: heartbeat
save_directory: /var/log/gdax
save_max_bytes: 2048
decode_errors: skip
"#
        )
        .unwrap();

        let config = FeedOptions::load(file.path()).unwrap().resolve().unwrap();
        assert_eq!(config.url, "wss://ws-feed.gdax.com");
        assert_eq!(config.products, vec!["ETH-USD"]);
        assert!(config.heartbeat());
        assert_eq!(config.decode_policy, DecodePolicy::Skip);
        let save = config.save.unwrap();
        assert_eq!(save.max_bytes, 2048);
        assert_eq!(save.file_prefix, "default.txt");
    }

    #[test]
    fn test_load_yaml_product_list() {
        let options = FeedOptions::from_yaml("products: [BTC-USD, LTC-USD]\n").unwrap();
        assert_eq!(
            options.products,
            Some(vec!["BTC-USD".to_string(), "LTC-USD".to_string()])
        );
    }

    #[test]
    fn test_unknown_yaml_field_rejected() {
        let result = FeedOptions::from_yaml("type: subscribe\n");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }
}
