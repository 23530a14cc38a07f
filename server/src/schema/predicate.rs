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

//! `select`/`when` as a small declarative combinator language, per spec §9:
//! the antecedent project embeds source-language closures here; a portable
//! rendering represents them declaratively, with an escape hatch carrying a
//! real Rust closure for hosts embedding the engine directly.

use crate::delta::{Delta, Pointer, PrimitiveValue, Target};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    String,
    Integer,
    IntegerYear,
    Boolean,
    Number,
}

impl PrimitiveKind {
    /// Strict coercion per spec §6: a non-conforming primitive means "skip
    /// this pointer", never an error.
    pub fn coerce(&self, value: &PrimitiveValue) -> Option<serde_json::Value> {
        use serde_json::Value;
        match (self, value) {
            (Self::String, PrimitiveValue::Str(s)) => Some(Value::String(s.clone())),
            (Self::Integer, PrimitiveValue::Int(i)) => Some(Value::Number((*i).into())),
            (Self::IntegerYear, PrimitiveValue::Int(i)) if (1800..=2200).contains(i) => {
                Some(Value::Number((*i).into()))
            }
            (Self::Boolean, PrimitiveValue::Bool(b)) => Some(Value::Bool(*b)),
            // the data model has no native float target (spec §3); a double
            // schema accepts an integer target as its finite double value
            (Self::Number, PrimitiveValue::Int(i)) => {
                serde_json::Number::from_f64(*i as f64).map(Value::Number)
            }
            _ => None,
        }
    }
}

#[derive(Clone)]
pub enum SelectPredicate {
    /// the built-in `selectByTargetContext`: true iff the delta has a
    /// pointer whose target names `objectId` with a `context` equal to one
    /// of the schema's declared attribute names (spec §4.5)
    TargetContextEquals,
    Always,
    Not(Box<SelectPredicate>),
    And(Vec<SelectPredicate>),
    Or(Vec<SelectPredicate>),
    /// escape hatch for hosts embedding the engine directly in Rust
    Custom(Arc<dyn Fn(&str, &Delta) -> bool + Send + Sync>),
}

impl fmt::Debug for SelectPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetContextEquals => write!(f, "TargetContextEquals"),
            Self::Always => write!(f, "Always"),
            Self::Not(p) => write!(f, "Not({p:?})"),
            Self::And(v) => write!(f, "And({v:?})"),
            Self::Or(v) => write!(f, "Or({v:?})"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[derive(Clone)]
pub enum WhenPredicate {
    PrimitiveIs(PrimitiveKind),
    RoleEquals(String),
    Always,
    Not(Box<WhenPredicate>),
    And(Vec<WhenPredicate>),
    Or(Vec<WhenPredicate>),
    Custom(Arc<dyn Fn(&Pointer) -> bool + Send + Sync>),
}

impl fmt::Debug for WhenPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimitiveIs(k) => write!(f, "PrimitiveIs({k:?})"),
            Self::RoleEquals(r) => write!(f, "RoleEquals({r:?})"),
            Self::Always => write!(f, "Always"),
            Self::Not(p) => write!(f, "Not({p:?})"),
            Self::And(v) => write!(f, "And({v:?})"),
            Self::Or(v) => write!(f, "Or({v:?})"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

pub fn eval_when(pred: &WhenPredicate, pointer: &Pointer) -> bool {
    match pred {
        WhenPredicate::PrimitiveIs(kind) => match &pointer.target {
            Target::Primitive(p) => kind.coerce(p).is_some(),
            Target::Object { .. } => false,
        },
        WhenPredicate::RoleEquals(role) => &pointer.role == role,
        WhenPredicate::Always => true,
        WhenPredicate::Not(inner) => !eval_when(inner, pointer),
        WhenPredicate::And(preds) => preds.iter().all(|p| eval_when(p, pointer)),
        WhenPredicate::Or(preds) => preds.iter().any(|p| eval_when(p, pointer)),
        WhenPredicate::Custom(f) => f(pointer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_year_rejects_out_of_range() {
        assert!(PrimitiveKind::IntegerYear.coerce(&PrimitiveValue::Int(1999)).is_some());
        assert!(PrimitiveKind::IntegerYear.coerce(&PrimitiveValue::Int(1700)).is_none());
        assert!(PrimitiveKind::IntegerYear.coerce(&PrimitiveValue::Int(2300)).is_none());
    }

    #[test]
    fn non_conforming_primitive_is_none_not_error() {
        assert!(PrimitiveKind::Boolean.coerce(&PrimitiveValue::Str("x".into())).is_none());
    }
}
