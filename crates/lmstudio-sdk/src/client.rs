use crate::config::ClientConfig;
use crate::discovery::discover_base_url;
use crate::error::LmStudioError;
use crate::namespaces::{DiagnosticsNamespace, EmbeddingNamespace, LlmNamespace, SystemNamespace};
use crate::port::{ClientPort, PortEndpoint};

/// A connection to an LM Studio server: one port per endpoint family.
///
/// Model handles created from the namespaces only hold weak references to
/// the ports, so they stop working once the client is closed or dropped.
#[derive(Debug)]
pub struct LmStudioClient {
    base_url: String,
    llm: LlmNamespace,
    embedding: EmbeddingNamespace,
    system: SystemNamespace,
    diagnostics: DiagnosticsNamespace,
}

impl LmStudioClient {
    /// Connects with optional overrides. Missing credentials are generated and a
    /// missing base URL is discovered on the local machine.
    pub fn new(
        base_url: Option<&str>,
        client_identifier: Option<&str>,
        client_passkey: Option<&str>,
    ) -> Result<LmStudioClient, LmStudioError> {
        let mut builder = ClientConfig::builder();
        if let Some(base_url) = base_url {
            builder = builder.with_base_url(base_url);
        }
        if let Some(identifier) = client_identifier {
            builder = builder.with_client_identifier(identifier);
        }
        if let Some(passkey) = client_passkey {
            builder = builder.with_client_passkey(passkey);
        }
        Self::connect(builder.build()?)
    }

    /// Connects using [`ClientConfig::from_env`].
    pub fn from_env() -> Result<LmStudioClient, LmStudioError> {
        Self::connect(ClientConfig::from_env()?)
    }

    /// Opens the four ports. Fails as a whole if any of them cannot connect.
    pub fn connect(config: ClientConfig) -> Result<LmStudioClient, LmStudioError> {
        let base_url = match config.base_url {
            Some(base_url) => base_url,
            None => discover_base_url(&config.discovery_ports, config.discovery_timeout)?,
        };
        let credentials = &config.credentials;

        let endpoints = [
            PortEndpoint::Llm,
            PortEndpoint::Embedding,
            PortEndpoint::System,
            PortEndpoint::Diagnostics,
        ];
        let results: Vec<Result<ClientPort, LmStudioError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = endpoints
                .iter()
                .map(|&endpoint| {
                    let base_url = base_url.as_str();
                    scope.spawn(move || ClientPort::connect(base_url, endpoint, credentials))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(LmStudioError::Connection("connect thread panicked".to_string()))
                    })
                })
                .collect()
        });

        let mut ports = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(port) => ports.push(port),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            log::error!("Failed to connect to {base_url}: {e}");
            for port in ports.iter().rev() {
                if let Err(e) = port.close() {
                    log::debug!("Failed to close port '{}': {e}", port.endpoint());
                }
            }
            return Err(e);
        }

        let [llm, embedding, system, diagnostics]: [ClientPort; 4] = ports
            .try_into()
            .map_err(|_| LmStudioError::Unknown("unexpected number of ports".to_string()))?;

        Ok(LmStudioClient {
            base_url,
            llm: LlmNamespace::new(llm),
            embedding: EmbeddingNamespace::new(embedding),
            system: SystemNamespace::new(system),
            diagnostics: DiagnosticsNamespace::new(diagnostics),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn llm(&self) -> &LlmNamespace {
        &self.llm
    }

    pub fn embedding(&self) -> &EmbeddingNamespace {
        &self.embedding
    }

    pub fn system(&self) -> &SystemNamespace {
        &self.system
    }

    pub fn diagnostics(&self) -> &DiagnosticsNamespace {
        &self.diagnostics
    }

    /// Closes the ports in reverse opening order. Pending calls fail with
    /// [`LmStudioError::ConnectionClosed`]. Returns the first close error.
    pub fn close(&self) -> Result<(), LmStudioError> {
        let ports = [
            self.diagnostics.port(),
            self.system.port(),
            self.embedding.port(),
            self.llm.port(),
        ];
        let mut result = Ok(());
        for port in ports {
            if let Err(e) = port.close() {
                log::warn!("Failed to close port '{}': {e}", port.endpoint());
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        log::info!("Disconnected from {}", self.base_url);
        result
    }
}
