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

//! Engine-wide error type

use core::fmt;
use std::error::Error as StdError;

pub type EngineResult<T> = Result<T, Error>;

#[derive(Debug, PartialEq, Eq, Clone)]
/// The classification of an engine failure. See spec §7 for where each kind is raised.
pub enum ErrorKind {
    /// delta construction failed validation
    InvalidDelta,
    /// the requested object/schema/delta has zero live referents
    NotFound,
    /// the KV backend failed
    BackendIo,
    /// `materialize`/`materializeAt` named a schema id that was never registered
    UnknownSchema,
    /// the instance was already closed
    Closed,
}

#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    detail: String,
}

impl Error {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
    pub fn invalid_delta(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidDelta, detail)
    }
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, detail)
    }
    pub fn backend_io(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendIo, detail)
    }
    pub fn unknown_schema(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownSchema, detail)
    }
    pub fn closed() -> Self {
        Self::new(ErrorKind::Closed, "the instance is closed")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

impl StdError for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::backend_io(e.to_string())
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}
