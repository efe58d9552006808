use crate::workload::Kind;
use std::{io, path::PathBuf};
use thiserror::Error;

/// Errors that abort a manifest mutation or a configuration load.
///
/// No partial output accompanies an error: callers must not forward the original manifest in
/// its place.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid sidecar configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to decode manifest: {0}")]
    Decode(#[from] DecodeError),

    #[error("failed to encode manifest: {0}")]
    Encode(#[from] EncodeError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("sidecar configuration has not been loaded")]
    NotLoaded,

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("sidecar container definition is empty")]
    EmptyContainer,

    #[error("sidecar container must have a name")]
    UnnamedContainer,

    #[error("failed to parse sidecar container: {0}")]
    Container(#[source] serde_yaml::Error),

    #[error("failed to parse sidecar annotations: {0}")]
    Annotations(#[source] serde_yaml::Error),

    #[error("failed to parse configured init containers: {0}")]
    InitContainers(#[source] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{0}")]
    Syntax(#[from] yaml_rust2::ScanError),

    #[error("unsupported document structure: {0}")]
    Structure(&'static str),

    #[error("document has no kind")]
    MissingKind,

    #[error("document kind is not a string")]
    InvalidKind,

    #[error("{kind} field `{path}` is not a {expected}")]
    Shape {
        kind: Kind,
        path: String,
        expected: &'static str,
    },

    #[error("annotation {0} is not a string")]
    Annotation(String),

    #[error("invalid init containers annotation: {0}")]
    InitContainers(#[source] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("{0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

// === impl Error ===

impl Error {
    /// Indicates that the sidecar configuration, not the manifest, is at fault.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}
