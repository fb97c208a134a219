use lmstudio_protocol::DownloadedModel;

use crate::error::LmStudioError;
use crate::port::ClientPort;

/// Server-wide queries on the `system` port.
#[derive(Debug)]
pub struct SystemNamespace {
    port: ClientPort,
}

impl SystemNamespace {
    pub(crate) fn new(port: ClientPort) -> Self {
        Self { port }
    }

    pub(crate) fn port(&self) -> &ClientPort {
        &self.port
    }

    /// Every model file present on the server's disk.
    pub fn list_downloaded_models(&self) -> Result<Vec<DownloadedModel>, LmStudioError> {
        self.port.call_rpc_as("listDownloadedModels", None)
    }
}
