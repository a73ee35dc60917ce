//! Canonical hashing of fact payloads.
//!
//! Facts are hashed over a canonical JSON rendering: object keys are sorted
//! lexicographically at every depth, arrays keep their order, and primitives
//! use their compact JSON text. Two values hash equal iff they are
//! structurally equal under that rendering.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{Result, entity::EntityKeys, fact::FactPayload};

/// Render `value` as canonical JSON.
pub fn canonical_json(value: &Value) -> String {
  let mut out = String::new();
  write_canonical(value, &mut out);
  out
}

fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<(&String, &Value)> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));
      out.push('{');
      for (i, (key, item)) in entries.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        // Keys go through the string encoder so escapes are canonical too.
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(item, out);
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    primitive => out.push_str(&primitive.to_string()),
  }
}

/// SHA-256 over the canonical rendering of `value`, as lowercase hex.
pub fn hash_value(value: &Value) -> String {
  let digest = Sha256::digest(canonical_json(value).as_bytes());
  hex::encode(digest)
}

/// Hash any serialisable value through its JSON form.
pub fn hash_serialize<T: Serialize>(value: &T) -> Result<String> {
  Ok(hash_value(&serde_json::to_value(value)?))
}

/// The fact core that is actually digested for a snapshot.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FactCore<'a> {
  entity:       &'a EntityKeys,
  fact_version: u32,
  data:         &'a Value,
}

/// Content hash of a computed fact for `entity`.
///
/// Entity identifiers are part of the digest, so two entities with identical
/// data never share a snapshot.
pub fn fact_hash(entity: &EntityKeys, payload: &FactPayload) -> Result<String> {
  hash_serialize(&FactCore {
    entity,
    fact_version: payload.fact_version,
    data: &payload.data,
  })
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn canonical_json_sorts_keys_at_every_depth() {
    let v = json!({ "b": 1, "a": { "z": [3, { "y": null, "x": "s" }], "c": true } });
    assert_eq!(
      canonical_json(&v),
      r#"{"a":{"c":true,"z":[3,{"x":"s","y":null}]},"b":1}"#
    );
  }

  #[test]
  fn key_order_does_not_change_the_hash() {
    let a: Value =
      serde_json::from_str(r#"{"score":75,"band":"AMBER","parts":{"x":1,"y":2}}"#)
        .unwrap();
    let b: Value =
      serde_json::from_str(r#"{"parts":{"y":2,"x":1},"band":"AMBER","score":75}"#)
        .unwrap();
    assert_eq!(hash_value(&a), hash_value(&b));
    assert_eq!(hash_value(&a).len(), 64);
  }

  #[test]
  fn any_field_difference_changes_the_hash() {
    let base = json!({ "score": 75, "band": "AMBER", "flags": ["a", "b"] });
    let variants = [
      json!({ "score": 76, "band": "AMBER", "flags": ["a", "b"] }),
      json!({ "score": 75, "band": "GREEN", "flags": ["a", "b"] }),
      json!({ "score": 75, "band": "AMBER", "flags": ["b", "a"] }),
      json!({ "score": 75, "band": "AMBER", "flags": ["a", "b"], "x": null }),
      json!({ "score": "75", "band": "AMBER", "flags": ["a", "b"] }),
    ];
    for v in variants {
      assert_ne!(hash_value(&base), hash_value(&v), "{v}");
    }
  }

  #[test]
  fn fact_hash_covers_entity_and_version() {
    let payload = FactPayload::new(1, json!({ "score": 75 }));
    let h1 = fact_hash(&EntityKeys::trading("loan-1"), &payload).unwrap();
    let h2 = fact_hash(&EntityKeys::trading("loan-2"), &payload).unwrap();
    let h3 =
      fact_hash(&EntityKeys::trading("loan-1"), &FactPayload::new(2, payload.data.clone()))
        .unwrap();
    assert_ne!(h1, h2);
    assert_ne!(h1, h3);
    assert_eq!(h1, fact_hash(&EntityKeys::trading("loan-1"), &payload).unwrap());
  }
}
