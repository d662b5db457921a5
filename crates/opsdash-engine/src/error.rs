use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("capability '{0}' not present in the manifest")]
    UnknownCapability(String),
    #[error("capability '{running}' is already running")]
    AlreadyRunning { running: String },
    #[error("failed to spawn '{entrypoint}': {source}")]
    Spawn {
        entrypoint: String,
        #[source]
        source: std::io::Error,
    },
}
