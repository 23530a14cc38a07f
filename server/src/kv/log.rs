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

//! A minimal durable backend: an append-only log of write batches, replayed
//! into an in-memory index on open. Grounded on `storage::v1`'s
//! buffered-writer-then-fsync flush pattern and its preload-on-open replay,
//! collapsed from Skytable's per-keyspace/per-table tree into one flat log
//! (this engine has a single flat keyspace; see spec §4.2).
//!
//! Each batch is written as one record so that `batch` is atomic even across
//! a crash: a truncated or checksum-mismatched tail record is treated as
//! never having happened, exactly as `storage::v1::preload` discards an
//! incomplete trailing write.

use super::{BatchOp, KvBackend};
use crate::error::{EngineResult, Error};
use crc::{Crc, CRC_32_ISO_HDLC};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
const TAG_PUT: u8 = 0;
const TAG_DELETE: u8 = 1;

pub struct LogBackend {
    path: PathBuf,
    file: Mutex<File>,
    index: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl LogBackend {
    /// Open (creating if absent) the log at `path`, replaying any existing
    /// records into the in-memory index.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let index = Mutex::new(replay(&path)?);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::backend_io(e.to_string()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            index,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn encode_batch(writes: &[BatchOp]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(writes.len() as u32).to_le_bytes());
    for op in writes {
        match op {
            BatchOp::Put(k, v) => {
                body.push(TAG_PUT);
                body.extend_from_slice(&(k.len() as u32).to_le_bytes());
                body.extend_from_slice(k);
                body.extend_from_slice(&(v.len() as u32).to_le_bytes());
                body.extend_from_slice(v);
            }
            BatchOp::Delete(k) => {
                body.push(TAG_DELETE);
                body.extend_from_slice(&(k.len() as u32).to_le_bytes());
                body.extend_from_slice(k);
            }
        }
    }
    let crc = CRC.checksum(&body);
    let mut record = Vec::with_capacity(body.len() + 8);
    record.extend_from_slice(&(body.len() as u32).to_le_bytes());
    record.extend_from_slice(&body);
    record.extend_from_slice(&crc.to_le_bytes());
    record
}

/// Replay every well-formed record in the log at `path` into a fresh index.
/// A record whose length/crc don't check out (a torn write from a crash
/// mid-append) ends replay at that point; nothing after it is trusted.
fn replay(path: &Path) -> EngineResult<BTreeMap<Vec<u8>, Vec<u8>>> {
    let mut index = BTreeMap::new();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
        Err(e) => return Err(Error::backend_io(e.to_string())),
    };
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .map_err(|e| Error::backend_io(e.to_string()))?;

    let mut pos = 0usize;
    while pos + 4 <= buf.len() {
        let body_len = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
        let body_start = pos + 4;
        let body_end = body_start + body_len;
        let crc_end = body_end + 4;
        if crc_end > buf.len() {
            break;
        }
        let body = &buf[body_start..body_end];
        let expected_crc = u32::from_le_bytes(buf[body_end..crc_end].try_into().unwrap());
        if CRC.checksum(body) != expected_crc {
            break;
        }
        if !apply_body(body, &mut index) {
            break;
        }
        pos = crc_end;
    }
    Ok(index)
}

fn apply_body(body: &[u8], index: &mut BTreeMap<Vec<u8>, Vec<u8>>) -> bool {
    let mut p = 0usize;
    macro_rules! need {
        ($n:expr) => {
            if p + $n > body.len() {
                return false;
            }
        };
    }
    need!(4);
    let num_ops = u32::from_le_bytes(body[p..p + 4].try_into().unwrap()) as usize;
    p += 4;
    let mut ops = Vec::with_capacity(num_ops);
    for _ in 0..num_ops {
        need!(1);
        let tag = body[p];
        p += 1;
        need!(4);
        let klen = u32::from_le_bytes(body[p..p + 4].try_into().unwrap()) as usize;
        p += 4;
        need!(klen);
        let key = body[p..p + klen].to_vec();
        p += klen;
        match tag {
            TAG_PUT => {
                need!(4);
                let vlen = u32::from_le_bytes(body[p..p + 4].try_into().unwrap()) as usize;
                p += 4;
                need!(vlen);
                let val = body[p..p + vlen].to_vec();
                p += vlen;
                ops.push(BatchOp::Put(key, val));
            }
            TAG_DELETE => ops.push(BatchOp::Delete(key)),
            _ => return false,
        }
    }
    for op in ops {
        match op {
            BatchOp::Put(k, v) => {
                index.insert(k, v);
            }
            BatchOp::Delete(k) => {
                index.remove(&k);
            }
        }
    }
    true
}

impl KvBackend for LogBackend {
    fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.batch(vec![BatchOp::Put(key.to_vec(), value.to_vec())])
    }

    fn get(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        Ok(self.index.lock().get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> EngineResult<()> {
        self.batch(vec![BatchOp::Delete(key.to_vec())])
    }

    fn range_scan(&self, prefix: &[u8]) -> EngineResult<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self
            .index
            .lock()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn batch(&self, writes: Vec<BatchOp>) -> EngineResult<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let record = encode_batch(&writes);
        {
            let mut file = self.file.lock();
            file.write_all(&record)
                .map_err(|e| Error::backend_io(e.to_string()))?;
            file.sync_data().map_err(|e| Error::backend_io(e.to_string()))?;
        }
        let mut index = self.index.lock();
        for op in writes {
            match op {
                BatchOp::Put(k, v) => {
                    index.insert(k, v);
                }
                BatchOp::Delete(k) => {
                    index.remove(&k);
                }
            }
        }
        Ok(())
    }

    fn close(&self) -> EngineResult<()> {
        Ok(())
    }
}
