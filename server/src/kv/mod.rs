/*
 * Created on Sat Jul 10 2021
 *
 * This file is a part of Skytable
 * Skytable (formerly known as TerrabaseDB or Skybase) is a free and open-source
 * NoSQL database written by Sayan Nandan ("the Author") with the
 * vision to provide flexibility in data modelling without compromising
 * on performance, queryability or scalability.
 *
 * Copyright (c) 2021, Sayan Nandan <ohsayan@outlook.com>
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

//! The KV backend interface: a minimal ordered byte store. See spec §4.2.
//!
//! The engine treats this as an opaque ordered byte store; the only shipped
//! implementations here are [`memory::MemoryBackend`] (ephemeral) and
//! [`log::LogBackend`] (a minimal durable log-structured store) — the full
//! durable backend's design is explicitly out of scope (spec §1); we ship
//! just enough of one to exercise the engine end to end.

pub mod log;
pub mod memory;

use crate::error::EngineResult;

pub const SEPARATOR: u8 = b'|';

/// One write in a [`KvBackend::batch`] call.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// An ordered byte store keyspace. All keys are UTF-8 byte strings; `|` is a
/// reserved separator that callers must not embed in user-supplied ids.
pub trait KvBackend: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<()>;
    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>>;
    fn delete(&self, key: &[u8]) -> EngineResult<()>;
    /// Lexicographically ordered scan of all keys carrying `prefix`.
    fn range_scan(&self, prefix: &[u8]) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>>;
    /// Apply `writes` atomically: either all of them land, or none do.
    fn batch(&self, writes: Vec<BatchOp>) -> EngineResult<()>;
    fn close(&self) -> EngineResult<()>;
}

#[cfg(test)]
/// Shared conformance tests run against every backend implementation.
pub(crate) fn conformance_suite(backend: &dyn KvBackend) {
    assert_eq!(backend.get(b"missing").unwrap(), None);

    backend.put(b"a", b"1").unwrap();
    assert_eq!(backend.get(b"a").unwrap(), Some(b"1".to_vec()));

    // idempotent re-put
    backend.put(b"a", b"1").unwrap();
    assert_eq!(backend.get(b"a").unwrap(), Some(b"1".to_vec()));

    backend.put(b"ix|1|x", b"").unwrap();
    backend.put(b"ix|1|y", b"").unwrap();
    backend.put(b"ix|2|z", b"").unwrap();
    let scanned = backend.range_scan(b"ix|1|").unwrap();
    assert_eq!(scanned.len(), 2);
    assert!(scanned.iter().all(|(k, _)| k.starts_with(b"ix|1|")));

    backend.delete(b"a").unwrap();
    assert_eq!(backend.get(b"a").unwrap(), None);

    backend
        .batch(vec![
            BatchOp::Put(b"batch1".to_vec(), b"v1".to_vec()),
            BatchOp::Put(b"batch2".to_vec(), b"v2".to_vec()),
        ])
        .unwrap();
    assert_eq!(backend.get(b"batch1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(backend.get(b"batch2").unwrap(), Some(b"v2".to_vec()));
}
