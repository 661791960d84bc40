//! Per-session relation schemas.
//!
//! The server sends a Relation message before the first change for a table in
//! a session, and again whenever the table's definition changes. The latest
//! message always wins.

use std::collections::HashMap;

use super::pgoutput::{RelationBody, RelationColumn};

/// Schema of one relation as last described by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationSchema {
    pub namespace: String,
    pub name: String,
    pub columns: Vec<RelationColumn>,
}

impl RelationSchema {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Relation OID to schema mapping, owned by one replication session.
#[derive(Debug, Default)]
pub struct RelationCache {
    relations: HashMap<u32, RelationSchema>,
}

impl RelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the schema from a Relation message, replacing any previous one.
    ///
    /// Returns true if the relation was unknown or its columns changed.
    pub fn apply(&mut self, body: &RelationBody) -> bool {
        let schema = RelationSchema {
            namespace: body.namespace.clone(),
            name: body.name.clone(),
            columns: body.columns.clone(),
        };

        match self.relations.insert(body.relation_id, schema) {
            Some(previous) => previous.columns != body.columns,
            None => true,
        }
    }

    pub fn get(&self, relation_id: u32) -> Option<&RelationSchema> {
        self.relations.get(&relation_id)
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}
