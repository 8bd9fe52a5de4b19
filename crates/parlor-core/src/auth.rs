use std::fmt;
use std::path::Path;

use serde_json::{Value, json};

use crate::errors::ChatError;

/// Opaque bearer credential presented during the connection handshake.
///
/// The core never writes credentials; they are produced by the login flow of the
/// host application and handed to the session at construction.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token. Blank tokens are treated as absent.
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Auth object sent with the Socket.IO CONNECT packet.
///
/// An absent credential is still sent as `{"token": null}`; the server answers
/// with an unauthorized status.
pub fn auth_payload(credential: Option<&Credential>) -> Value {
    json!({ "token": credential.map(Credential::as_str) })
}

/// Loads the credential written by the login flow.
pub struct CredentialStore;

impl CredentialStore {
    /// Read a token file. A missing or blank file means no credential.
    pub fn from_file(path: &Path) -> Result<Option<Credential>, ChatError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(Credential::new(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no credential file at {}", path.display());
                Ok(None)
            }
            Err(e) => Err(ChatError::Credential(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }

    /// Read a token from the OS keychain.
    #[cfg(not(any(target_os = "android", target_os = "ios")))]
    pub fn from_keyring(service: &str, user: &str) -> Result<Option<Credential>, ChatError> {
        let entry = keyring::Entry::new(service, user)
            .map_err(|e| ChatError::Credential(format!("keyring entry: {e}")))?;
        match entry.get_password() {
            Ok(token) => Ok(Credential::new(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(ChatError::Credential(format!("keyring read: {e}"))),
        }
    }
}
