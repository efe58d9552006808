//! Framing for multi-document manifests.
//!
//! A manifest is a sequence of YAML (or JSON) documents, each terminated by a line consisting
//! solely of `---`. Every document this crate emits is followed by [`SEPARATOR`].

/// Terminates each emitted document.
pub const SEPARATOR: &str = "---\n";

const MARKER: &str = "---";

/// Returns an iterator over the raw text of each document in `manifest`.
///
/// Chunks between separators that hold only whitespace or comments are not documents and are
/// skipped, so a leading `---` or a trailing separator never yields an empty document.
pub fn documents(manifest: &str) -> Documents<'_> {
    Documents { rest: manifest }
}

/// Appends `doc` to `out`, followed by a separator line.
pub fn push_document(out: &mut String, doc: &str) {
    out.push_str(doc);
    if !doc.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(SEPARATOR);
}

#[derive(Clone, Debug)]
pub struct Documents<'m> {
    rest: &'m str,
}

// === impl Documents ===

impl<'m> Iterator for Documents<'m> {
    type Item = &'m str;

    fn next(&mut self) -> Option<&'m str> {
        while !self.rest.is_empty() {
            let (doc, rest) = split_first(self.rest);
            self.rest = rest;
            if !is_blank(doc) {
                return Some(doc);
            }
        }
        None
    }
}

fn split_first(input: &str) -> (&str, &str) {
    let mut offset = 0;
    for line in input.split_inclusive('\n') {
        if is_separator(line) {
            return (&input[..offset], &input[offset + line.len()..]);
        }
        offset += line.len();
    }
    (input, "")
}

fn is_separator(line: &str) -> bool {
    line.strip_prefix(MARKER)
        .map(|rest| rest.trim().is_empty())
        .unwrap_or(false)
}

fn is_blank(doc: &str) -> bool {
    doc.lines().all(|line| {
        let line = line.trim();
        line.is_empty() || line.starts_with('#')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_separator_lines() {
        let manifest = "a: 1\n---\nb: 2\n---\n";
        assert_eq!(documents(manifest).collect::<Vec<_>>(), vec!["a: 1\n", "b: 2\n"]);
    }

    #[test]
    fn last_document_needs_no_separator() {
        let manifest = "a: 1\n---\nb: 2";
        assert_eq!(documents(manifest).collect::<Vec<_>>(), vec!["a: 1\n", "b: 2"]);
    }

    #[test]
    fn skips_blank_and_comment_chunks() {
        let manifest = "---\n# Source: chart/templates/empty.yaml\n---\n\n  \n---\na: 1\n---\n";
        assert_eq!(documents(manifest).collect::<Vec<_>>(), vec!["a: 1\n"]);
        assert_eq!(documents("").count(), 0);
        assert_eq!(documents("\n\n").count(), 0);
    }

    #[test]
    fn separator_allows_trailing_whitespace_only() {
        assert!(is_separator("---\n"));
        assert!(is_separator("---"));
        assert!(is_separator("---  \r\n"));
        assert!(!is_separator("----\n"));
        assert!(!is_separator(" ---\n"));
        assert!(!is_separator("--- # comment\n"));
    }

    #[test]
    fn separators_inside_documents_are_indented() {
        let manifest = "data:\n  script: |\n    echo ---\n    ---\n---\nb: 2\n";
        let docs = documents(manifest).collect::<Vec<_>>();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0], "data:\n  script: |\n    echo ---\n    ---\n");
    }

    #[test]
    fn push_document_terminates_lines() {
        let mut out = String::new();
        push_document(&mut out, "a: 1");
        push_document(&mut out, "b: 2\n");
        assert_eq!(out, "a: 1\n---\nb: 2\n---\n");
    }
}
