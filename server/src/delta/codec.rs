/*
 * Created on Thu Jan 19 2023
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2023, Sayan Nandan <ohsayan@outlook.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! Canonical, byte-deterministic encoding of a delta's hashed payload.
//!
//! See spec §4.1 and §6 "Canonical delta encoding". `id` is excluded from
//! the hashed payload and appended only after hashing.

use super::{Delta, Pointer, PrimitiveValue, Target};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

fn nfc(s: &str) -> String {
    s.nfc().collect()
}

fn primitive_to_value(p: &PrimitiveValue) -> Value {
    match p {
        PrimitiveValue::Str(s) => Value::String(nfc(s)),
        PrimitiveValue::Int(i) => Value::Number((*i).into()),
        PrimitiveValue::Bool(b) => Value::Bool(*b),
        PrimitiveValue::Null => Value::Null,
    }
}

fn target_to_value(t: &Target) -> Value {
    match t {
        Target::Primitive(p) => primitive_to_value(p),
        Target::Object { id, context } => {
            // serde_json's default Map is BTreeMap-backed (no `preserve_order`
            // feature), so keys always serialize in lexicographic order —
            // `context` before `id` — without any extra bookkeeping here.
            let mut map = Map::new();
            if let Some(ctx) = context {
                map.insert("context".to_string(), Value::String(nfc(ctx)));
            }
            map.insert("id".to_string(), Value::String(nfc(id)));
            Value::Object(map)
        }
    }
}

fn pointer_to_value(p: &Pointer) -> Value {
    let mut map = Map::new();
    map.insert("role".to_string(), Value::String(nfc(&p.role)));
    map.insert("target".to_string(), target_to_value(&p.target));
    Value::Object(map)
}

/// The hashed payload of a delta: everything except `id`.
pub fn canonical_payload(
    author: &str,
    system: &str,
    timestamp: i64,
    pointers: &[Pointer],
) -> Value {
    let mut map = Map::new();
    map.insert("author".to_string(), Value::String(nfc(author)));
    map.insert(
        "pointers".to_string(),
        Value::Array(pointers.iter().map(pointer_to_value).collect()),
    );
    map.insert("system".to_string(), Value::String(nfc(system)));
    map.insert("timestamp".to_string(), Value::Number(timestamp.into()));
    Value::Object(map)
}

/// Encode a delta's full canonical form, including its `id` (appended after
/// the payload was hashed to produce that id).
pub fn canonical_full(delta: &Delta) -> Value {
    let mut map = match canonical_payload(&delta.author, &delta.system, delta.timestamp, &delta.pointers) {
        Value::Object(m) => m,
        _ => unreachable!("canonical_payload always returns an object"),
    };
    map.insert("id".to_string(), Value::String(delta.id.clone()));
    Value::Object(map)
}

/// The lowercase hex content id: SHA-256 of the canonical payload's compact
/// JSON bytes, truncated to 32 hex characters (128 bits). See spec §3.
pub fn content_id(author: &str, system: &str, timestamp: i64, pointers: &[Pointer]) -> String {
    let payload = canonical_payload(author, system, timestamp, pointers);
    // serde_json::to_vec on a Value produces compact output with no
    // whitespace, matching the byte-deterministic requirement.
    let bytes = serde_json::to_vec(&payload).expect("canonical payload is always serializable");
    let digest = Sha256::digest(&bytes);
    let hex = hex_lower(&digest);
    hex[..32].to_string()
}

fn hex_lower(bytes: &[u8]) -> String {
    use core::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(s, "{:02x}", b).unwrap();
    }
    s
}
