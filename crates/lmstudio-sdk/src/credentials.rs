use base64::Engine as _;
use rand::RngCore;

const RANDOM_CREDENTIAL_BYTES: usize = 18;

/// Identifier and passkey presented on every port's handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    identifier: String,
    passkey: String,
}

impl ClientCredentials {
    pub fn new(identifier: impl Into<String>, passkey: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            passkey: passkey.into(),
        }
    }

    /// Fresh random identifier and passkey.
    pub fn random() -> Self {
        Self::new(
            random_base64(RANDOM_CREDENTIAL_BYTES),
            random_base64(RANDOM_CREDENTIAL_BYTES),
        )
    }

    /// Reads `LMSTUDIO_CLIENT_IDENTIFIER` and `LMSTUDIO_CLIENT_PASSKEY`, generating
    /// whichever is missing.
    pub fn from_env() -> Self {
        let identifier = std::env::var("LMSTUDIO_CLIENT_IDENTIFIER")
            .unwrap_or_else(|_| random_base64(RANDOM_CREDENTIAL_BYTES));
        let passkey = std::env::var("LMSTUDIO_CLIENT_PASSKEY")
            .unwrap_or_else(|_| random_base64(RANDOM_CREDENTIAL_BYTES));
        Self::new(identifier, passkey)
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn passkey(&self) -> &str {
        &self.passkey
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("identifier", &self.identifier)
            .field("passkey", &"<redacted>")
            .finish()
    }
}

pub(crate) fn random_base64(bytes: usize) -> String {
    let mut buffer = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buffer);
    base64::engine::general_purpose::STANDARD.encode(buffer)
}
