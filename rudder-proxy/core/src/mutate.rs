use crate::{
    manifest,
    sidecar::{decode_containers, SidecarConfig, INIT_CONTAINERS_ANNOTATION},
    yaml, DecodeError, EncodeError, Kind, Result,
};
use serde_yaml::{Mapping, Value};
use tracing::{debug, trace};

/// Injects a sidecar configuration into the workloads of a manifest.
///
/// The mutator borrows a single configuration snapshot, so every document of a pass sees the
/// same sidecar.
#[derive(Debug)]
pub struct WorkloadMutator<'c> {
    config: &'c SidecarConfig,
    sidecar: Value,
}

// === impl WorkloadMutator ===

impl<'c> WorkloadMutator<'c> {
    pub fn new(config: &'c SidecarConfig) -> Result<Self> {
        let sidecar = serde_yaml::to_value(&config.container).map_err(EncodeError::Yaml)?;
        Ok(Self { config, sidecar })
    }

    /// Mutates every document of `manifest`, emitting each followed by a separator.
    ///
    /// Any error aborts the whole pass.
    pub fn mutate(&self, manifest: &str) -> Result<String> {
        let mut out = String::with_capacity(manifest.len());
        for doc in manifest::documents(manifest) {
            let doc = self.mutate_document(doc)?;
            manifest::push_document(&mut out, &doc);
        }
        Ok(out)
    }

    /// Mutates a single document, returning its re-serialized form.
    ///
    /// Documents of unsupported kinds are returned as they were given. Workloads are emitted as
    /// JSON, which YAML 1.1 and 1.2 readers decode alike.
    pub fn mutate_document(&self, doc: &str) -> Result<String> {
        let mut value = yaml::from_str(doc)?;
        let obj = value.as_mapping_mut().ok_or(DecodeError::MissingKind)?;
        let kind = match obj.get("kind") {
            Some(Value::String(kind)) => kind.clone(),
            Some(_) => return Err(DecodeError::InvalidKind.into()),
            None => return Err(DecodeError::MissingKind.into()),
        };

        let Some(kind) = Kind::from_kind(&kind) else {
            trace!(%kind, name = ?name(obj), "Passing through unsupported kind");
            return Ok(doc.to_string());
        };
        debug!(%kind, name = ?name(obj), "Injecting sidecar");
        self.inject(kind, obj)?;

        let out = serde_json::to_string_pretty(&value).map_err(EncodeError::Json)?;
        Ok(out)
    }

    fn inject(&self, kind: Kind, obj: &mut Mapping) -> Result<()> {
        // The sidecar is always the last container.
        kind.containers(obj)?.push(self.sidecar.clone());

        let annotations = kind.annotations(obj)?;
        let init_containers =
            self.merge_init_containers(annotations.get(INIT_CONTAINERS_ANNOTATION))?;
        annotations.insert(
            Value::String(INIT_CONTAINERS_ANNOTATION.to_string()),
            Value::String(init_containers),
        );

        for (key, value) in &self.config.annotations {
            annotations.insert(Value::String(key.clone()), Value::String(value.clone()));
        }
        Ok(())
    }

    /// Appends the configured init containers after those the document already declares and
    /// returns the combined list, serialized.
    fn merge_init_containers(&self, declared: Option<&Value>) -> Result<String> {
        let mut containers = match declared {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(declared)) => {
                decode_containers(declared).map_err(DecodeError::InitContainers)?
            }
            Some(_) => {
                return Err(DecodeError::Annotation(INIT_CONTAINERS_ANNOTATION.to_string()).into())
            }
        };
        containers.extend(self.config.init_containers.iter().cloned());
        let merged = serde_json::to_string(&containers).map_err(EncodeError::Json)?;
        Ok(merged)
    }
}

fn name(obj: &Mapping) -> Option<&str> {
    obj.get("metadata")
        .and_then(|meta| meta.get("name"))
        .and_then(Value::as_str)
}
