use chatrelay_store::StoreError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors surfaced while starting the relay or serving a request.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts() {
        let err: ServerError =
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use").into();
        assert!(matches!(err, ServerError::Io(_)));
        assert!(err.to_string().contains("address in use"));
    }

    #[test]
    fn config_error_is_transparent() {
        let err: ServerError = ConfigError::Invalid("bad port".into()).into();
        assert_eq!(err.to_string(), "invalid config value: bad port");
    }

    #[test]
    fn store_error_converts() {
        let err: ServerError = StoreError::Validation("name must not be empty".into()).into();
        assert!(matches!(err, ServerError::Store(_)));
        assert_eq!(err.to_string(), "store: validation failed: name must not be empty");
    }

    #[tokio::test]
    async fn panicked_task_converts() {
        let join = tokio::task::spawn_blocking(|| panic!("boom")).await;
        let err: ServerError = join.unwrap_err().into();
        assert!(matches!(err, ServerError::Task(_)));
        assert!(err.to_string().starts_with("blocking task failed"));
    }
}
