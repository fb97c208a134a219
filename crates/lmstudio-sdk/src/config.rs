use std::time::Duration;

use reqwest::Url;

use crate::credentials::ClientCredentials;
use crate::discovery::{DEFAULT_DISCOVERY_PORTS, DEFAULT_DISCOVERY_TIMEOUT};
use crate::error::LmStudioError;

/// Configuration for the [LmStudioClient](crate::LmStudioClient). Can be created using
/// [ClientConfigBuilder], which is created using the [ClientConfig::builder] method.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket base URL of the server, e.g. `ws://127.0.0.1:1234`. Discovered when absent.
    pub base_url: Option<String>,
    /// Identifier and passkey presented on every port.
    pub credentials: ClientCredentials,
    /// Local ports tried during discovery, in order.
    pub discovery_ports: Vec<u16>,
    /// Upper bound on the whole discovery search.
    pub discovery_timeout: Duration,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Reads `LMSTUDIO_BASE_URL`, `LMSTUDIO_CLIENT_IDENTIFIER` and
    /// `LMSTUDIO_CLIENT_PASSKEY`. Every variable is optional.
    pub fn from_env() -> Result<Self, LmStudioError> {
        let mut builder = ClientConfigBuilder::new().with_credentials(ClientCredentials::from_env());
        if let Ok(base_url) = std::env::var("LMSTUDIO_BASE_URL") {
            builder = builder.with_base_url(base_url);
        }
        builder.build()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfigBuilder::new().config
    }
}

/// Builder for the ClientConfig
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub(crate) fn new() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: ClientConfig {
                base_url: None,
                credentials: ClientCredentials::random(),
                discovery_ports: DEFAULT_DISCOVERY_PORTS.to_vec(),
                discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            },
        }
    }

    /// Set the WebSocket base URL, skipping discovery
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> ClientConfigBuilder {
        self.config.base_url = Some(base_url.into());
        self
    }

    pub fn with_credentials(mut self, credentials: ClientCredentials) -> ClientConfigBuilder {
        self.config.credentials = credentials;
        self
    }

    pub fn with_client_identifier(mut self, identifier: impl Into<String>) -> ClientConfigBuilder {
        let passkey = self.config.credentials.passkey().to_string();
        self.config.credentials = ClientCredentials::new(identifier, passkey);
        self
    }

    pub fn with_client_passkey(mut self, passkey: impl Into<String>) -> ClientConfigBuilder {
        let identifier = self.config.credentials.identifier().to_string();
        self.config.credentials = ClientCredentials::new(identifier, passkey);
        self
    }

    /// Set the local ports tried when no base URL is given
    pub fn with_discovery_ports(mut self, ports: impl Into<Vec<u16>>) -> ClientConfigBuilder {
        self.config.discovery_ports = ports.into();
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> ClientConfigBuilder {
        self.config.discovery_timeout = timeout;
        self
    }

    /// Build the ClientConfig, validating the base URL if one was set.
    pub fn build(self) -> Result<ClientConfig, LmStudioError> {
        if let Some(base_url) = &self.config.base_url {
            validate_base_url(base_url)?;
        }
        Ok(self.config)
    }
}

/// Accepts `ws` and `wss` URLs without query, fragment, credentials or trailing slash.
pub fn validate_base_url(base_url: &str) -> Result<(), LmStudioError> {
    let invalid = |reason: &str| LmStudioError::invalid_base_url(base_url, reason);

    let url = Url::parse(base_url).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(invalid("scheme must be 'ws' or 'wss'"));
    }
    if url.query().is_some() {
        return Err(invalid("query parameters are not allowed"));
    }
    if url.fragment().is_some() {
        return Err(invalid("fragments are not allowed"));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(invalid("user credentials are not allowed"));
    }
    if base_url.ends_with('/') {
        return Err(invalid("trailing slash is not allowed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ws://127.0.0.1:1234")]
    #[case("wss://example.com")]
    #[case("ws://localhost:1234/prefix")]
    fn accepts_valid_base_urls(#[case] url: &str) {
        assert!(validate_base_url(url).is_ok());
    }

    #[rstest]
    #[case("not a url")]
    #[case("http://127.0.0.1:1234")]
    #[case("ws://127.0.0.1:1234/")]
    #[case("ws://127.0.0.1:1234?x=1")]
    #[case("ws://127.0.0.1:1234#frag")]
    #[case("ws://user:pass@127.0.0.1:1234")]
    #[case("ws://user@127.0.0.1:1234")]
    fn rejects_invalid_base_urls(#[case] url: &str) {
        assert!(matches!(
            validate_base_url(url),
            Err(LmStudioError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn builder_fails_eagerly_on_bad_url() {
        let result = ClientConfig::builder()
            .with_base_url("http://localhost:1234")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_defaults() {
        let config = ClientConfig::builder()
            .with_client_identifier("me")
            .with_client_passkey("key")
            .build()
            .unwrap();
        assert_eq!(config.base_url, None);
        assert_eq!(config.discovery_ports, vec![1234]);
        assert_eq!(config.discovery_timeout, Duration::from_secs(10));
        assert_eq!(config.credentials, ClientCredentials::new("me", "key"));
    }
}
