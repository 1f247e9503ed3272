//! Entity tree for nested JSON structure.
//!
//! Entities live in an arena and refer to each other by [`EntityId`]. The
//! parent index is only used to qualify names; ownership runs strictly
//! from the arena.

use std::collections::HashMap;

use super::detect::KindDetector;

/// Index of an entity in its [`EntityTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub usize);

impl EntityId {
    pub const ROOT: EntityId = EntityId(0);
}

/// What a field name has been observed to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldShape {
    Scalar,
    Object(EntityId),
    Array,
}

impl FieldShape {
    pub fn describe(&self) -> &'static str {
        match self {
            FieldShape::Scalar => "scalar",
            FieldShape::Object(_) => "object",
            FieldShape::Array => "array",
        }
    }
}

/// The structure of one JSON object shape, top-level or nested.
#[derive(Debug, Clone)]
pub struct Entity {
    pub name: String,
    pub parent: Option<EntityId>,
    pub children: Vec<EntityId>,

    /// Every field name in first-seen order, nested fields included.
    pub field_names: Vec<String>,

    pub shapes: HashMap<String, FieldShape>,

    /// A detector per scalar field.
    pub detectors: HashMap<String, KindDetector>,
}

impl Entity {
    fn new(name: impl Into<String>, parent: Option<EntityId>) -> Self {
        Entity {
            name: name.into(),
            parent,
            children: Vec::new(),
            field_names: Vec::new(),
            shapes: HashMap::new(),
            detectors: HashMap::new(),
        }
    }

    pub fn shape(&self, field: &str) -> Option<FieldShape> {
        self.shapes.get(field).copied()
    }

    /// Record a field's shape the first time it is seen.
    pub fn add_field(&mut self, field: &str, shape: FieldShape) {
        if !self.field_names.iter().any(|f| f == field) {
            self.field_names.push(field.to_string());
        }
        self.shapes.insert(field.to_string(), shape);
        if shape == FieldShape::Scalar {
            self.detectors.entry(field.to_string()).or_default();
        }
    }
}

/// Arena of entities. Index 0 is always the root.
#[derive(Debug, Clone)]
pub struct EntityTree {
    entities: Vec<Entity>,
}

impl EntityTree {
    pub fn new(root_name: impl Into<String>) -> Self {
        EntityTree {
            entities: vec![Entity::new(root_name, None)],
        }
    }

    /// Number of entities. The root always exists, so this is at least 1.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn get(&self, id: EntityId) -> &Entity {
        &self.entities[id.0]
    }

    pub fn get_mut(&mut self, id: EntityId) -> &mut Entity {
        &mut self.entities[id.0]
    }

    /// Create a child entity for `field` under `parent` and register the
    /// field as an object.
    pub fn add_child(&mut self, parent: EntityId, field: &str) -> EntityId {
        let id = EntityId(self.entities.len());
        self.entities.push(Entity::new(field, Some(parent)));

        let p = self.get_mut(parent);
        p.children.push(id);
        p.add_field(field, FieldShape::Object(id));
        id
    }

    /// Entity ids in pre-order: parent before children, children in
    /// creation order.
    pub fn pre_order(&self) -> Vec<EntityId> {
        let mut out = Vec::with_capacity(self.entities.len());
        let mut stack = vec![EntityId::ROOT];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.get(id).children.iter().rev().copied());
        }
        out
    }

    /// Dotted path of the entity, e.g. `data.name.first`.
    pub fn qualified_name(&self, id: EntityId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let e = self.get(c);
            parts.push(e.name.as_str());
            cur = e.parent;
        }
        parts.reverse();
        parts.join(".")
    }

    /// Dotted path of a field, e.g. `data.name.first_name`.
    pub fn qualified_field(&self, id: EntityId, field: &str) -> String {
        format!("{}.{}", self.qualified_name(id), field)
    }

    /// Flattened column name of a field: the names of the enclosing
    /// entities below the root, then the field, joined by `sep`.
    pub fn column_name(&self, id: EntityId, field: &str, sep: &str) -> String {
        let mut parts = vec![field];
        let mut cur = id;
        while let Some(parent) = self.get(cur).parent {
            parts.push(self.get(cur).name.as_str());
            cur = parent;
        }
        parts.reverse();
        parts.join(sep)
    }
}
