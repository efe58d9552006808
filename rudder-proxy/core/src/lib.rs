#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod error;
pub mod filter;
pub mod manifest;
pub mod mutate;
pub mod sidecar;
pub mod workload;
mod yaml;

#[cfg(test)]
mod tests;

pub use self::{
    error::{ConfigError, DecodeError, EncodeError, Error},
    filter::Split,
    mutate::WorkloadMutator,
    sidecar::{SharedSidecarConfig, SidecarConfig, SidecarSource, INIT_CONTAINERS_ANNOTATION},
    workload::Kind,
};
pub use k8s_openapi::api::core::v1::Container;

use tracing::debug;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The annotation that exempts a document from mutation unless another key is configured.
pub const DEFAULT_SKIP_ANNOTATION: &str = "istio.skip";

/// Rewrites a release manifest before it is handed to the release module.
pub trait MutateManifest {
    fn mutate_manifest(&self, manifest: &str) -> Result<String>;
}

/// Injects the current sidecar configuration into every document of a manifest that does not
/// carry the skip annotation.
#[derive(Clone, Debug)]
pub struct ManifestMutator {
    skip_annotation: String,
    config: SharedSidecarConfig,
}

// === impl ManifestMutator ===

impl ManifestMutator {
    pub fn new(skip_annotation: impl Into<String>, config: SharedSidecarConfig) -> Self {
        Self {
            skip_annotation: skip_annotation.into(),
            config,
        }
    }
}

impl MutateManifest for ManifestMutator {
    /// Exempted documents are emitted first, byte-for-byte, followed by the mutated candidates.
    /// Relative order is preserved within each group.
    fn mutate_manifest(&self, manifest: &str) -> Result<String> {
        let Split {
            mut skip,
            candidates,
        } = filter::split(&self.skip_annotation, manifest)?;

        // The snapshot is held for the whole pass so that a concurrent reload cannot be observed
        // halfway through a manifest.
        let config = self.config.snapshot()?;
        let mutated = WorkloadMutator::new(&config)?.mutate(&candidates)?;
        debug!(
            skipped = manifest::documents(&skip).count(),
            mutated = manifest::documents(&mutated).count(),
            "Mutated manifest"
        );

        skip.push_str(&mutated);
        Ok(skip)
    }
}

impl<M: MutateManifest + ?Sized> MutateManifest for std::sync::Arc<M> {
    fn mutate_manifest(&self, manifest: &str) -> Result<String> {
        (**self).mutate_manifest(manifest)
    }
}
