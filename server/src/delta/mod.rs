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

//! The delta data model: the immutable, content-addressed unit of state.
//!
//! See spec §3 and §4.1.

pub mod codec;

use crate::error::{Error, EngineResult};
use serde::{Deserialize, Serialize};

pub type ObjectId = String;
pub type DeltaId = String;
pub const ROLE_NEGATES: &str = "negates";
pub const ROLE_REASON: &str = "reason";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// The value a pointer may carry when it does not name another object.
pub enum PrimitiveValue {
    Str(String),
    Int(i64),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// What a pointer points at: either a primitive value, or a reference to
/// another object, optionally qualified with a context label.
pub enum Target {
    Primitive(PrimitiveValue),
    Object {
        id: ObjectId,
        context: Option<String>,
    },
}

impl Target {
    pub fn object(id: impl Into<String>) -> Self {
        Self::Object {
            id: id.into(),
            context: None,
        }
    }
    pub fn object_ctx(id: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Object {
            id: id.into(),
            context: Some(context.into()),
        }
    }
    pub fn str(s: impl Into<String>) -> Self {
        Self::Primitive(PrimitiveValue::Str(s.into()))
    }
    pub fn int(i: i64) -> Self {
        Self::Primitive(PrimitiveValue::Int(i))
    }
    pub fn bool(b: bool) -> Self {
        Self::Primitive(PrimitiveValue::Bool(b))
    }
    pub fn null() -> Self {
        Self::Primitive(PrimitiveValue::Null)
    }
    pub fn as_object(&self) -> Option<(&str, Option<&str>)> {
        match self {
            Self::Object { id, context } => Some((id.as_str(), context.as_deref())),
            Self::Primitive(_) => None,
        }
    }
    pub fn object_id(&self) -> Option<&str> {
        self.as_object().map(|(id, _)| id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One `(role, target)` element of a delta. Pointer order is caller-supplied
/// and preserved for display, but semantic equivalence (and therefore the
/// content hash) treats pointers as an ordered list in the order supplied —
/// see spec §4.1: pointers serialize in the order given by the caller.
pub struct Pointer {
    pub role: String,
    pub target: Target,
}

impl Pointer {
    pub fn new(role: impl Into<String>, target: Target) -> Self {
        Self {
            role: role.into(),
            target,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// An immutable hyper-edge record; the unit of state. See spec §3.
pub struct Delta {
    pub id: DeltaId,
    pub author: String,
    pub system: String,
    pub timestamp: i64,
    pub pointers: Vec<Pointer>,
}

impl Delta {
    /// Validate `pointers` per spec §4.1 and compute the content-addressed id.
    ///
    /// Rejects: an empty pointer list, an object target with an empty id, and
    /// a `negates`-role pointer whose target is not an object reference.
    pub fn create(
        author: impl Into<String>,
        system: impl Into<String>,
        timestamp: i64,
        pointers: Vec<Pointer>,
    ) -> EngineResult<Self> {
        if pointers.is_empty() {
            return Err(Error::invalid_delta("a delta must carry at least one pointer"));
        }
        for p in &pointers {
            match &p.target {
                Target::Object { id, .. } if id.is_empty() => {
                    return Err(Error::invalid_delta(format!(
                        "pointer with role `{}` has an empty object id",
                        p.role
                    )));
                }
                Target::Primitive(_) if p.role == ROLE_NEGATES => {
                    return Err(Error::invalid_delta(
                        "a `negates` pointer must target an object reference",
                    ));
                }
                _ => {}
            }
        }
        let author = author.into();
        let system = system.into();
        let id = codec::content_id(&author, &system, timestamp, &pointers);
        Ok(Self {
            id,
            author,
            system,
            timestamp,
            pointers,
        })
    }

    /// True iff this delta's pointers include a well-formed negation of `target_id`.
    pub fn negates(&self) -> Option<&str> {
        self.pointers.iter().find_map(|p| {
            if p.role == ROLE_NEGATES {
                p.target.object_id()
            } else {
                None
            }
        })
    }

    pub fn is_negation(&self) -> bool {
        self.negates().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_addressing_is_deterministic() {
        let mk = || {
            Delta::create(
                "alice",
                "sys1",
                100,
                vec![Pointer::new("name", Target::str("Alice"))],
            )
            .unwrap()
        };
        assert_eq!(mk().id, mk().id);
    }

    #[test]
    fn empty_pointers_rejected() {
        assert!(Delta::create("a", "s", 0, vec![]).is_err());
    }

    #[test]
    fn empty_object_id_rejected() {
        let err = Delta::create(
            "a",
            "s",
            0,
            vec![Pointer::new("ref", Target::object(""))],
        );
        assert!(err.is_err());
    }

    #[test]
    fn negates_on_primitive_rejected() {
        let err = Delta::create(
            "a",
            "s",
            0,
            vec![Pointer::new(ROLE_NEGATES, Target::str("not-an-object"))],
        );
        assert!(err.is_err());
    }

    #[test]
    fn distinct_content_distinct_id() {
        let d1 = Delta::create("a", "s", 0, vec![Pointer::new("x", Target::int(1))]).unwrap();
        let d2 = Delta::create("a", "s", 0, vec![Pointer::new("x", Target::int(2))]).unwrap();
        assert_ne!(d1.id, d2.id);
    }
}
