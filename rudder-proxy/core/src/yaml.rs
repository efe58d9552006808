//! Decodes manifest documents the way Tiller's YAML 1.1 parser reads them.
//!
//! Plain scalars resolve with YAML 1.1 rules, so `0644` is the octal integer 420 and `on` is
//! `true`. Quoted and block scalars are always strings. Mapping keys keep their source text.

use crate::DecodeError;
use serde_yaml::{Mapping, Sequence, Value};
use std::collections::HashMap;
use yaml_rust2::{
    parser::{Event, EventReceiver, Parser, Tag},
    scanner::TScalarStyle,
};

const MERGE_KEY: &str = "<<";

/// Decodes the first document of `doc`. An empty document decodes as null.
pub(crate) fn from_str(doc: &str) -> Result<Value, DecodeError> {
    let mut builder = Builder::default();
    Parser::new(doc.chars()).load(&mut builder, false)?;
    match builder.error {
        Some(error) => Err(error),
        None => Ok(builder.doc.unwrap_or(Value::Null)),
    }
}

#[derive(Default)]
struct Builder {
    stack: Vec<Node>,
    anchors: HashMap<usize, Value>,
    doc: Option<Value>,
    error: Option<DecodeError>,
}

enum Node {
    Seq {
        anchor: usize,
        items: Sequence,
    },
    Map {
        anchor: usize,
        map: Mapping,
        key: Option<String>,
        merges: Vec<Value>,
    },
}

// === impl Builder ===

impl EventReceiver for Builder {
    fn on_event(&mut self, event: Event) {
        if self.error.is_some() {
            return;
        }
        if let Err(error) = self.handle(event) {
            self.error = Some(error);
        }
    }
}

impl Builder {
    fn handle(&mut self, event: Event) -> Result<(), DecodeError> {
        match event {
            Event::Scalar(text, style, anchor, tag) => {
                // Keys are taken verbatim; only values are resolved.
                if let Some(Node::Map { key: key @ None, .. }) = self.stack.last_mut() {
                    if anchor != 0 {
                        self.anchors.insert(anchor, Value::String(text.clone()));
                    }
                    *key = Some(text);
                    return Ok(());
                }
                let value = if style == TScalarStyle::Plain && !is_str(tag.as_ref()) {
                    resolve(&text)
                } else {
                    Value::String(text)
                };
                self.complete(value, anchor)
            }
            Event::SequenceStart(anchor, _) => {
                self.stack.push(Node::Seq {
                    anchor,
                    items: Sequence::new(),
                });
                Ok(())
            }
            Event::MappingStart(anchor, _) => {
                self.stack.push(Node::Map {
                    anchor,
                    map: Mapping::new(),
                    key: None,
                    merges: Vec::new(),
                });
                Ok(())
            }
            Event::SequenceEnd => match self.stack.pop() {
                Some(Node::Seq { anchor, items }) => self.complete(Value::Sequence(items), anchor),
                _ => Err(DecodeError::Structure("unbalanced sequence")),
            },
            Event::MappingEnd => match self.stack.pop() {
                Some(Node::Map {
                    anchor,
                    mut map,
                    merges,
                    ..
                }) => {
                    for source in merges {
                        merge(&mut map, source)?;
                    }
                    self.complete(Value::Mapping(map), anchor)
                }
                _ => Err(DecodeError::Structure("unbalanced mapping")),
            },
            Event::Alias(id) => {
                let value = self
                    .anchors
                    .get(&id)
                    .cloned()
                    .ok_or(DecodeError::Structure("alias to an unknown anchor"))?;
                self.complete(value, 0)
            }
            _ => Ok(()),
        }
    }

    /// Attaches a finished node to its parent.
    fn complete(&mut self, value: Value, anchor: usize) -> Result<(), DecodeError> {
        if anchor != 0 {
            self.anchors.insert(anchor, value.clone());
        }
        match self.stack.last_mut() {
            None if self.doc.is_none() => self.doc = Some(value),
            None => {}
            Some(Node::Seq { items, .. }) => items.push(value),
            Some(Node::Map { key: key @ None, .. }) => match value {
                Value::String(text) => *key = Some(text),
                _ => return Err(DecodeError::Structure("mapping keys must be scalars")),
            },
            Some(Node::Map {
                map, key, merges, ..
            }) => match key.take() {
                Some(key) if key == MERGE_KEY => merges.push(value),
                Some(key) => {
                    map.insert(Value::String(key), value);
                }
                None => {}
            },
        }
        Ok(())
    }
}

/// Inserts the entries of a `<<` value that `map` does not already define. A sequence of
/// mappings merges in order, so earlier mappings take precedence.
fn merge(map: &mut Mapping, source: Value) -> Result<(), DecodeError> {
    match source {
        Value::Mapping(source) => {
            for (key, value) in source {
                if !map.contains_key(&key) {
                    map.insert(key, value);
                }
            }
            Ok(())
        }
        Value::Sequence(sources) => {
            for source in sources {
                if !source.is_mapping() {
                    return Err(DecodeError::Structure("merge values must be mappings"));
                }
                merge(map, source)?;
            }
            Ok(())
        }
        _ => Err(DecodeError::Structure("merge values must be mappings")),
    }
}

fn is_str(tag: Option<&Tag>) -> bool {
    tag.map(|tag| tag.suffix == "str").unwrap_or(false)
}

/// Resolves a plain scalar to a null, bool, int, float or string.
fn resolve(text: &str) -> Value {
    match text {
        "" | "~" | "null" | "Null" | "NULL" => return Value::Null,
        "y" | "Y" | "yes" | "Yes" | "YES" | "true" | "True" | "TRUE" | "on" | "On" | "ON" => {
            return Value::Bool(true)
        }
        "n" | "N" | "no" | "No" | "NO" | "false" | "False" | "FALSE" | "off" | "Off" | "OFF" => {
            return Value::Bool(false)
        }
        ".inf" | ".Inf" | ".INF" | "+.inf" | "+.Inf" | "+.INF" => {
            return Value::Number(f64::INFINITY.into())
        }
        "-.inf" | "-.Inf" | "-.INF" => return Value::Number(f64::NEG_INFINITY.into()),
        ".nan" | ".NaN" | ".NAN" => return Value::Number(f64::NAN.into()),
        _ => {}
    }

    if !text.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '-' | '+' | '.')) {
        return Value::String(text.to_string());
    }

    let plain = text.replace('_', "");
    if let Some(int) = resolve_int(&plain) {
        return int;
    }
    if is_float(&plain) {
        if let Ok(float) = plain.parse::<f64>() {
            return Value::Number(float.into());
        }
    }
    Value::String(text.to_string())
}

fn resolve_int(plain: &str) -> Option<Value> {
    let (negative, digits) = match plain.as_bytes().first()? {
        b'-' => (true, &plain[1..]),
        b'+' => (false, &plain[1..]),
        _ => (false, plain),
    };

    let (radix, body) = if let Some(hex) = strip_prefix(digits, "0x") {
        (16, hex)
    } else if let Some(bin) = strip_prefix(digits, "0b") {
        (2, bin)
    } else if let Some(oct) = strip_prefix(digits, "0o") {
        (8, oct)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };
    if body.is_empty() || body.starts_with(['+', '-']) {
        return None;
    }

    let magnitude = u64::from_str_radix(body, radix).ok()?;
    if negative {
        let int = i64::try_from(-i128::from(magnitude)).ok()?;
        Some(Value::Number(int.into()))
    } else {
        Some(Value::Number(magnitude.into()))
    }
}

fn strip_prefix<'s>(digits: &'s str, prefix: &str) -> Option<&'s str> {
    digits
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &digits[prefix.len()..])
}

/// Matches `[-+]?(\.[0-9]+|[0-9]+(\.[0-9]*)?)([eE][-+]?[0-9]+)?`.
fn is_float(plain: &str) -> bool {
    fn digits(s: &[u8]) -> usize {
        s.iter().take_while(|b| b.is_ascii_digit()).count()
    }

    let mut s = plain.as_bytes();
    if let [b'-' | b'+', rest @ ..] = s {
        s = rest;
    }

    if let [b'.', rest @ ..] = s {
        let n = digits(rest);
        if n == 0 {
            return false;
        }
        s = &rest[n..];
    } else {
        let n = digits(s);
        if n == 0 {
            return false;
        }
        s = &s[n..];
        if let [b'.', rest @ ..] = s {
            s = &rest[digits(rest)..];
        }
    }

    if let [b'e' | b'E', rest @ ..] = s {
        s = rest;
        if let [b'-' | b'+', rest @ ..] = s {
            s = rest;
        }
        let n = digits(s);
        if n == 0 {
            return false;
        }
        s = &s[n..];
    }

    s.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(text: &str) -> Value {
        let doc = from_str(&format!("v: {text}\n")).unwrap();
        doc["v"].clone()
    }

    #[test]
    fn plain_scalars_use_yaml_1_1_rules() {
        assert_eq!(scalar("0644").as_u64(), Some(420));
        assert_eq!(scalar("0o17").as_u64(), Some(15));
        assert_eq!(scalar("0x1F").as_u64(), Some(31));
        assert_eq!(scalar("0b101").as_u64(), Some(5));
        assert_eq!(scalar("1_000").as_u64(), Some(1000));
        assert_eq!(scalar("-12").as_i64(), Some(-12));
        assert_eq!(scalar("0").as_u64(), Some(0));
        assert_eq!(scalar("1.5").as_f64(), Some(1.5));
        assert_eq!(scalar("6.02e23").as_f64(), Some(6.02e23));
        assert_eq!(scalar("08").as_f64(), Some(8.0));

        for truthy in ["yes", "Yes", "on", "ON", "y", "true"] {
            assert_eq!(scalar(truthy), Value::Bool(true), "{truthy}");
        }
        for falsy in ["no", "off", "N", "False"] {
            assert_eq!(scalar(falsy), Value::Bool(false), "{falsy}");
        }
        for null in ["~", "null", "NULL"] {
            assert_eq!(scalar(null), Value::Null, "{null}");
        }
        assert!(scalar(".inf").as_f64().unwrap().is_infinite());
    }

    #[test]
    fn other_scalars_stay_strings() {
        assert_eq!(scalar("'0644'").as_str(), Some("0644"));
        assert_eq!(scalar("\"yes\"").as_str(), Some("yes"));
        assert_eq!(scalar("!!str on").as_str(), Some("on"));
        assert_eq!(scalar("|\n  on\n").as_str(), Some("on\n"));
        assert_eq!(scalar("v1.2.3").as_str(), Some("v1.2.3"));
        assert_eq!(scalar("1.2.3").as_str(), Some("1.2.3"));
        assert_eq!(scalar("0x").as_str(), Some("0x"));
        assert_eq!(scalar("-").as_str(), Some("-"));
        assert_eq!(scalar("2001-12-14").as_str(), Some("2001-12-14"));
        assert_eq!(scalar("busybox:1.36").as_str(), Some("busybox:1.36"));
    }

    #[test]
    fn keys_keep_their_text() {
        let doc = from_str("on: a\n0644: b\n'x': c\n").unwrap();
        let keys = doc
            .as_mapping()
            .unwrap()
            .keys()
            .map(|k| k.as_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["on", "0644", "x"]);
    }

    #[test]
    fn anchors_and_merge_keys() {
        let doc = from_str(
            "\
base: &base
  image: nginx
  port: 80
extra: &extra {port: 81, debug: on}
app:
  <<: [*base, *extra]
  port: 8080
copy: *base
",
        )
        .unwrap();
        assert_eq!(doc["app"]["image"].as_str(), Some("nginx"));
        assert_eq!(doc["app"]["port"].as_u64(), Some(8080));
        assert_eq!(doc["app"]["debug"].as_bool(), Some(true));
        assert!(doc["app"].get(MERGE_KEY).is_none());
        assert_eq!(doc["copy"], doc["base"]);
    }

    #[test]
    fn reads_json_documents() {
        let doc = from_str(r#"{"kind": "Pod", "spec": {"containers": [], "n": 1}}"#).unwrap();
        assert_eq!(doc["kind"].as_str(), Some("Pod"));
        assert!(doc["spec"]["containers"].as_sequence().unwrap().is_empty());
        assert_eq!(doc["spec"]["n"].as_u64(), Some(1));
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(matches!(
            from_str("a: [1, 2\n"),
            Err(DecodeError::Syntax(_))
        ));
        assert!(matches!(
            from_str("? [a, b]\n: c\n"),
            Err(DecodeError::Structure(_))
        ));
        assert!(matches!(
            from_str("a:\n  <<: 1\n"),
            Err(DecodeError::Structure(_))
        ));
        assert_eq!(from_str("").unwrap(), Value::Null);
    }
}
