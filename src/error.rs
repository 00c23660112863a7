use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid configuration: {message}")]
    Configuration { message: String },
    #[error("decoder not ready: {message}")]
    NotReady { message: String },
    #[error("unsupported configuration: {message}")]
    UnsupportedConfiguration { message: String },
    #[error("resource not found at {path}: {message}")]
    ResourceNotFound { path: PathBuf, message: String },
    #[error("missing dependency: {message}")]
    DependencyMissing { message: String },
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON parse error while {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{context}: {message}")]
    Runtime {
        context: &'static str,
        message: String,
    },
}

impl DecodeError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn not_ready(message: impl Into<String>) -> Self {
        Self::NotReady {
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedConfiguration {
            message: message.into(),
        }
    }

    pub(crate) fn resource_not_found(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn dependency_missing(message: impl Into<String>) -> Self {
        Self::DependencyMissing {
            message: message.into(),
        }
    }

    pub(crate) fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    pub(crate) fn json(context: &'static str, source: serde_json::Error) -> Self {
        Self::Json { context, source }
    }

    pub(crate) fn runtime(context: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Runtime {
            context,
            message: err.to_string(),
        }
    }
}
