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

//! HyperDB: an embeddable, content-addressed delta database with typed
//! HyperView projections.
//!
//! A HyperDB instance stores immutable, content-addressed hyper-edges
//! ([`delta::Delta`]) and projects them into typed JSON views
//! ([`schema::materializer`]) through declared [`schema::HyperSchema`]s.
//! Deltas may negate one another; a delta is live iff it has an even number
//! of live negators. [`instance::Instance`] is the embedding surface: open
//! one per embedded database, register schemas against it, append deltas,
//! materialize views, and subscribe to live updates.

pub mod bus;
pub mod cache;
pub mod config;
pub mod delta;
pub mod error;
pub mod index;
pub mod instance;
pub mod kv;
pub mod schema;
pub mod store;

pub use config::Config;
pub use delta::{Delta, Pointer, Target};
pub use error::{EngineResult, Error, ErrorKind};
pub use instance::Instance;
pub use schema::{AttributeRule, Cardinality, HyperSchema, SchemaRegistry};
pub use store::DeltaFilter;
