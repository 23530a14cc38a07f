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

//! HyperSchema declarations and the process-local (instance-scoped, per
//! spec §9) schema registry. See spec §4.5.

pub mod materializer;
pub mod predicate;

use crate::delta::Delta;
use predicate::{SelectPredicate, WhenPredicate};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type SchemaId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Debug, Clone)]
pub enum ValueSchema {
    Primitive(predicate::PrimitiveKind),
    Nested(SchemaId),
}

#[derive(Debug, Clone)]
pub struct AttributeRule {
    pub schema: ValueSchema,
    pub when: WhenPredicate,
    pub cardinality: Option<Cardinality>,
}

impl AttributeRule {
    pub fn primitive(kind: predicate::PrimitiveKind, when: WhenPredicate) -> Self {
        Self {
            schema: ValueSchema::Primitive(kind),
            when,
            cardinality: None,
        }
    }
    pub fn nested(schema_id: impl Into<String>, when: WhenPredicate) -> Self {
        Self {
            schema: ValueSchema::Nested(schema_id.into()),
            when,
            cardinality: None,
        }
    }
    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = Some(cardinality);
        self
    }
}

#[derive(Debug, Clone)]
/// A projection recipe: how to assemble one object's HyperView. Attributes
/// are kept in a `BTreeMap` so that materialization iterates them in a
/// fixed order regardless of declaration order — required for the
/// "materialization determinism" property (spec §8).
pub struct HyperSchema {
    pub id: SchemaId,
    pub name: String,
    pub select: SelectPredicate,
    pub transform: BTreeMap<String, AttributeRule>,
}

impl HyperSchema {
    pub fn new(id: impl Into<String>, name: impl Into<String>, select: SelectPredicate) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            select,
            transform: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, attr: impl Into<String>, rule: AttributeRule) -> Self {
        self.transform.insert(attr.into(), rule);
        self
    }

    /// Evaluate this schema's `select` predicate for `delta` against
    /// `object_id`. Declared here (rather than on the predicate alone)
    /// because `TargetContextEquals` needs this schema's declared attribute
    /// names to check against.
    pub fn selects(&self, object_id: &str, delta: &Delta) -> bool {
        eval_select(&self.select, self, object_id, delta)
    }
}

fn eval_select(pred: &SelectPredicate, schema: &HyperSchema, object_id: &str, delta: &Delta) -> bool {
    use crate::delta::Target;
    match pred {
        SelectPredicate::TargetContextEquals => delta.pointers.iter().any(|p| {
            matches!(&p.target, Target::Object { id, context: Some(c) }
                if id == object_id && schema.transform.contains_key(c))
        }),
        SelectPredicate::Always => true,
        SelectPredicate::Not(inner) => !eval_select(inner, schema, object_id, delta),
        SelectPredicate::And(preds) => preds.iter().all(|p| eval_select(p, schema, object_id, delta)),
        SelectPredicate::Or(preds) => preds.iter().any(|p| eval_select(p, schema, object_id, delta)),
        SelectPredicate::Custom(f) => f(object_id, delta),
    }
}

/// Instance-scoped mapping from schema id to [`HyperSchema`] — deliberately
/// not a process-wide global (spec §9): two instances in one process have
/// independent registries.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: parking_lot::RwLock<std::collections::HashMap<SchemaId, Arc<HyperSchema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites any existing schema under the same id. Re-registering an
    /// unchanged schema is naturally idempotent — the map entry is replaced
    /// with an equivalent value, so observers see no difference.
    pub fn register(&self, schema: HyperSchema) {
        self.schemas.write().insert(schema.id.clone(), Arc::new(schema));
    }

    pub fn unregister(&self, id: &str) {
        self.schemas.write().remove(id);
    }

    pub fn get(&self, id: &str) -> Option<Arc<HyperSchema>> {
        self.schemas.read().get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use predicate::{PrimitiveKind, WhenPredicate};

    #[test]
    fn register_overwrites_and_unregister_removes() {
        let reg = SchemaRegistry::new();
        let s1 = HyperSchema::new("person", "Person", SelectPredicate::TargetContextEquals)
            .with_attribute(
                "name",
                AttributeRule::primitive(PrimitiveKind::String, WhenPredicate::Always),
            );
        reg.register(s1);
        assert!(reg.get("person").is_some());
        reg.unregister("person");
        assert!(reg.get("person").is_none());
    }
}
