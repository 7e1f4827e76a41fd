use crate::config::ConsentConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ConsentError {
    #[error("Storage is unavailable")]
    StorageUnavailable,

    #[error("Failed to read {key} from storage: {source}")]
    StorageRead {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to write {key} to storage: {source}")]
    StorageWrite {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to remove {key} from storage: {source}")]
    StorageRemove {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Another consent change is still in progress")]
    MutationInProgress,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConsentConfigError),
}

impl ConsentError {
    /// True for errors that mean the choice was not recorded durably.
    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            ConsentError::StorageUnavailable
                | ConsentError::StorageRead { .. }
                | ConsentError::StorageWrite { .. }
                | ConsentError::StorageRemove { .. }
                | ConsentError::Serialize(_)
        )
    }
}

pub type Result<T, E = ConsentError> = std::result::Result<T, E>;
