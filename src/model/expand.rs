use std::collections::BTreeMap;

use crate::model::Item;

/// One relation to resolve, with the operations to apply to whatever it
/// resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpandOp {
    Parent { nested: Vec<ExpandOp> },
    Owner { nested: Vec<ExpandOp> },
    Children { collection: String, nested: Vec<ExpandOp> },
    /// A keyword the planner did not recognise. Resolves to nothing.
    Unknown { name: String, nested: Vec<ExpandOp> },
}

impl ExpandOp {
    pub fn parent() -> Self {
        ExpandOp::Parent { nested: Vec::new() }
    }

    pub fn owner() -> Self {
        ExpandOp::Owner { nested: Vec::new() }
    }

    pub fn children(collection: impl Into<String>) -> Self {
        ExpandOp::Children {
            collection: collection.into(),
            nested: Vec::new(),
        }
    }

    pub fn with_nested(mut self, ops: Vec<ExpandOp>) -> Self {
        match &mut self {
            ExpandOp::Parent { nested }
            | ExpandOp::Owner { nested }
            | ExpandOp::Children { nested, .. }
            | ExpandOp::Unknown { nested, .. } => *nested = ops,
        }
        self
    }
}

/// A resolved relation attached to an item.
#[derive(Debug, Clone, PartialEq)]
pub enum Relation {
    /// `parent` / `owner`; `None` when the referenced id did not resolve.
    One(Option<Box<ExpandedItem>>),
    /// `children:<collection>`, in order-key order.
    Many(Vec<ExpandedItem>),
}

/// An item plus the relations resolved for it. `expanded` is `None` for items
/// that were never run through an expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedItem {
    pub item: Item,
    pub expanded: Option<BTreeMap<String, Relation>>,
}

impl ExpandedItem {
    pub fn plain(item: Item) -> Self {
        Self {
            item,
            expanded: None,
        }
    }

    pub fn annotated(item: Item) -> Self {
        Self {
            item,
            expanded: Some(BTreeMap::new()),
        }
    }

    pub fn attach(&mut self, key: String, relation: Relation) {
        self.expanded
            .get_or_insert_with(BTreeMap::new)
            .insert(key, relation);
    }

    pub fn relation(&self, key: &str) -> Option<&Relation> {
        self.expanded.as_ref().and_then(|map| map.get(key))
    }
}
