//! Partitions a manifest by the presence of a skip annotation.

use crate::{manifest, yaml, Result};
use serde_yaml::Value;
use tracing::trace;

/// A manifest split into exempted documents and mutation candidates.
///
/// Each stream keeps the input order of its documents and terminates every document with
/// [`manifest::SEPARATOR`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Split {
    /// Documents that already carry the skip annotation, unmodified.
    pub skip: String,

    /// All other documents.
    pub candidates: String,
}

/// Splits `manifest` on whether each document's `metadata.annotations` contains `annotation`.
///
/// A document that fails to decode aborts the whole split.
pub fn split(annotation: &str, manifest: &str) -> Result<Split> {
    let mut split = Split::default();
    for doc in manifest::documents(manifest) {
        let value = yaml::from_str(doc)?;
        if has_annotation(&value, annotation) {
            trace!(%annotation, "Skipping annotated document");
            manifest::push_document(&mut split.skip, doc);
        } else {
            manifest::push_document(&mut split.candidates, doc);
        }
    }
    Ok(split)
}

fn has_annotation(doc: &Value, annotation: &str) -> bool {
    doc.get("metadata")
        .and_then(|meta| meta.get("annotations"))
        .and_then(Value::as_mapping)
        .map(|annotations| annotations.contains_key(annotation))
        .unwrap_or(false)
}
