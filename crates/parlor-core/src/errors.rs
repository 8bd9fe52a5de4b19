use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("local user identity is required")]
    MissingIdentity,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("credential error: {0}")]
    Credential(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_concern() {
        assert_eq!(
            ChatError::MissingIdentity.to_string(),
            "local user identity is required"
        );
        assert_eq!(
            ChatError::Connection("unsupported scheme \"ftp\"".into()).to_string(),
            "connection failed: unsupported scheme \"ftp\""
        );
        assert_eq!(
            ChatError::Credential("keyring read: denied".into()).to_string(),
            "credential error: keyring read: denied"
        );
    }
}
