use crate::DecodeError;
use serde_yaml::{Mapping, Sequence, Value};
use std::fmt;

/// A workload kind whose pod template can receive a sidecar.
///
/// Each kind knows where its pod template keeps the container list and the annotation map.
/// Documents of any other kind are passed through untouched.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Pod,
    Deployment,
    StatefulSet,
    DaemonSet,
    ReplicaSet,
}

const POD_SPEC: &[&str] = &["spec"];
const POD_ANNOTATIONS: &[&str] = &["metadata", "annotations"];
const TEMPLATE_SPEC: &[&str] = &["spec", "template", "spec"];
const TEMPLATE_ANNOTATIONS: &[&str] = &["spec", "template", "metadata", "annotations"];

// === impl Kind ===

impl Kind {
    /// Matches a document's `kind` field, ignoring case.
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind.to_ascii_lowercase().as_str() {
            "pod" => Some(Self::Pod),
            "deployment" => Some(Self::Deployment),
            "statefulset" => Some(Self::StatefulSet),
            "daemonset" => Some(Self::DaemonSet),
            "replicaset" => Some(Self::ReplicaSet),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pod => "Pod",
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
            Self::ReplicaSet => "ReplicaSet",
        }
    }

    /// Returns the pod template's container list, creating it (and any missing parents) if
    /// absent.
    pub fn containers(self, doc: &mut Mapping) -> Result<&mut Sequence, DecodeError> {
        let spec = match self {
            Self::Pod => POD_SPEC,
            _ => TEMPLATE_SPEC,
        };
        let value = entry(self.mapping_at(doc, spec)?, "containers");
        if value.is_null() {
            *value = Value::Sequence(Sequence::new());
        }
        value.as_sequence_mut().ok_or_else(|| {
            let mut path = spec.to_vec();
            path.push("containers");
            self.shape_error(&path, "sequence")
        })
    }

    /// Returns the pod template's annotation map, creating it (and any missing parents) if
    /// absent.
    pub fn annotations(self, doc: &mut Mapping) -> Result<&mut Mapping, DecodeError> {
        let path = match self {
            Self::Pod => POD_ANNOTATIONS,
            _ => TEMPLATE_ANNOTATIONS,
        };
        self.mapping_at(doc, path)
    }

    fn mapping_at<'d>(
        self,
        mut map: &'d mut Mapping,
        path: &[&str],
    ) -> Result<&'d mut Mapping, DecodeError> {
        for (i, key) in path.iter().enumerate() {
            let value = entry(map, key);
            if value.is_null() {
                *value = Value::Mapping(Mapping::new());
            }
            map = value
                .as_mapping_mut()
                .ok_or_else(|| self.shape_error(&path[..=i], "mapping"))?;
        }
        Ok(map)
    }

    fn shape_error(self, path: &[&str], expected: &'static str) -> DecodeError {
        DecodeError::Shape {
            kind: self,
            path: path.join("."),
            expected,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn entry<'m>(map: &'m mut Mapping, key: &str) -> &'m mut Value {
    map.entry(Value::String(key.to_string()))
        .or_insert(Value::Null)
}
