use thiserror::Error;

#[derive(Error, Debug)]
pub enum SidecarError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] snapcar_db::Error),

    #[error("Streaming error: {0}")]
    Stream(#[from] StreamError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Missing required setting {field} (set it in the config file or via {env})")]
    Missing {
        field: &'static str,
        env: &'static str,
    },

    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },

    #[error("Failed to set up remote store: {0}")]
    RemoteStore(#[from] object_store::Error),
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Server startup failed: {reason}")]
    Startup { reason: String },

    #[error("Snapshot task failed: {reason}")]
    Blocking { reason: String },
}

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Failed to open artifact {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to open artifact {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid object key {key}: {source}")]
    InvalidKey {
        key: String,
        #[source]
        source: object_store::path::Error,
    },

    #[error("Failed to read artifact {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to upload {key} to {store}: {source}")]
    Transfer {
        store: String,
        key: String,
        #[source]
        source: object_store::Error,
    },

    #[error("Upload of {key} to {store} timed out after {secs}s")]
    Timeout {
        store: String,
        key: String,
        secs: u64,
    },
}

pub type Result<T> = std::result::Result<T, SidecarError>;

/// Extension trait for adding context to IO errors
pub trait IoErrorContext<T> {
    fn io_context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> IoErrorContext<T> for std::result::Result<T, std::io::Error> {
    fn io_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| SidecarError::Io {
            context: context.into(),
            source: e,
        })
    }
}
