use crate::ConfigError;
use k8s_openapi::api::core::v1::Container;
use parking_lot::RwLock;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

/// The annotation whose value is a serialized list of init containers.
pub const INIT_CONTAINERS_ANNOTATION: &str = "pod.beta.kubernetes.io/init-containers";

/// Everything injected into a workload's pod template.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SidecarConfig {
    /// Appended to every pod template's container list.
    pub container: Container,

    /// Appended, in order, after the init containers a document already declares.
    pub init_containers: Vec<Container>,

    /// Set on every pod template, replacing existing values.
    pub annotations: BTreeMap<String, String>,
}

/// Locates the two files a [`SidecarConfig`] is loaded from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SidecarSource {
    /// A single container specification (YAML or JSON).
    pub container: PathBuf,

    /// A map of annotations (YAML or JSON), optionally holding init containers under
    /// [`INIT_CONTAINERS_ANNOTATION`].
    pub annotations: PathBuf,
}

/// A handle to the current sidecar configuration, shared by every mutation.
///
/// Loads replace the snapshot wholesale while holding the write lock, so readers see either the
/// previous configuration or the new one and never a mix of the two.
#[derive(Clone, Debug, Default)]
pub struct SharedSidecarConfig(Arc<RwLock<Option<Arc<SidecarConfig>>>>);

// === impl SidecarConfig ===

impl SidecarConfig {
    /// Decodes a configuration from a container specification and an annotation map.
    pub fn decode(container: &[u8], annotations: &[u8]) -> Result<Self, ConfigError> {
        if is_blank(container) {
            return Err(ConfigError::EmptyContainer);
        }
        let container =
            serde_yaml::from_slice::<Container>(container).map_err(ConfigError::Container)?;
        if container.name.is_empty() {
            return Err(ConfigError::UnnamedContainer);
        }

        let mut annotations = if is_blank(annotations) {
            BTreeMap::new()
        } else {
            serde_yaml::from_slice::<BTreeMap<String, String>>(annotations)
                .map_err(ConfigError::Annotations)?
        };

        // Init containers travel in the annotation file for compatibility with the beta
        // annotation, but they are merged into documents separately.
        let init_containers = match annotations.remove(INIT_CONTAINERS_ANNOTATION) {
            Some(containers) => {
                decode_containers(&containers).map_err(ConfigError::InitContainers)?
            }
            None => Vec::new(),
        };

        Ok(Self {
            container,
            init_containers,
            annotations,
        })
    }
}

/// Decodes a serialized container list, treating a blank value as empty.
pub(crate) fn decode_containers(value: &str) -> Result<Vec<Container>, serde_yaml::Error> {
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml::from_str(value)
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

// === impl SidecarSource ===

impl SidecarSource {
    pub fn new(container: impl Into<PathBuf>, annotations: impl Into<PathBuf>) -> Self {
        Self {
            container: container.into(),
            annotations: annotations.into(),
        }
    }
}

fn read(path: &Path) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

// === impl SharedSidecarConfig ===

impl SharedSidecarConfig {
    /// Reads and decodes the configuration files, replacing the current snapshot.
    ///
    /// The write lock is held for the whole read-decode-assign sequence. On error, the previous
    /// snapshot (if any) remains in effect.
    pub fn load(&self, source: &SidecarSource) -> Result<(), ConfigError> {
        let mut current = self.0.write();
        let container = read(&source.container)?;
        let annotations = read(&source.annotations)?;
        let config = SidecarConfig::decode(&container, &annotations)?;
        info!(
            container = %source.container.display(),
            annotations = %source.annotations.display(),
            sidecar = %config.container.name,
            init_containers = config.init_containers.len(),
            "Loaded sidecar configuration"
        );
        *current = Some(Arc::new(config));
        Ok(())
    }

    /// Decodes a configuration from in-memory sources, replacing the current snapshot.
    pub fn load_from(&self, container: &[u8], annotations: &[u8]) -> Result<(), ConfigError> {
        let mut current = self.0.write();
        let config = SidecarConfig::decode(container, annotations)?;
        *current = Some(Arc::new(config));
        Ok(())
    }

    /// Returns the current snapshot.
    ///
    /// Fails until a load has succeeded; mutation never falls back to an empty sidecar.
    pub fn snapshot(&self) -> Result<Arc<SidecarConfig>, ConfigError> {
        self.0.read().clone().ok_or(ConfigError::NotLoaded)
    }

    pub fn is_loaded(&self) -> bool {
        self.0.read().is_some()
    }
}

impl From<SidecarConfig> for SharedSidecarConfig {
    fn from(config: SidecarConfig) -> Self {
        Self(Arc::new(RwLock::new(Some(Arc::new(config)))))
    }
}
