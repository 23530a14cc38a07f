/*
 * Created on Sat Feb 04 2023
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

//! Instance configuration. See spec §6 "Configuration options".

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    Persistent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackpressurePolicy {
    DropNewest,
    DropOldest,
    BlockProducer,
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        Self::DropNewest
    }
}

fn default_cache_size() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_queue_size() -> usize {
    1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageKind,
    #[serde(default)]
    pub system_id: Option<String>,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
    #[serde(default = "default_true")]
    pub enable_indexing: bool,
    #[serde(default = "default_queue_size")]
    pub subscription_queue_size: usize,
    #[serde(default)]
    pub backpressure_policy: BackpressurePolicy,
    /// log file path; only consulted when `storage == Persistent`
    #[serde(default)]
    pub path: Option<String>,
}

impl Config {
    pub fn memory() -> Self {
        Self {
            storage: StorageKind::Memory,
            system_id: None,
            cache_size: default_cache_size(),
            enable_indexing: true,
            subscription_queue_size: default_queue_size(),
            backpressure_policy: BackpressurePolicy::default(),
            path: None,
        }
    }

    pub fn persistent(path: impl Into<String>) -> Self {
        Self {
            storage: StorageKind::Persistent,
            path: Some(path.into()),
            ..Self::memory()
        }
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }
}
