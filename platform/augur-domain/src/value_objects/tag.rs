use serde::{Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Session,
    Event,
}

/// Registry handle for a configured session or economic event. Identity is the
/// registry slot; the name is carried for display and serialization only.
#[derive(Debug, Clone)]
pub struct Tag {
    kind: TagKind,
    id: u16,
    name: Arc<str>,
}

impl Tag {
    pub fn new(kind: TagKind, id: u16, name: &str) -> Self {
        Self {
            kind,
            id,
            name: Arc::from(name),
        }
    }

    pub fn kind(&self) -> TagKind {
        self.kind
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.id == other.id
    }
}

impl Eq for Tag {}

impl Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}
