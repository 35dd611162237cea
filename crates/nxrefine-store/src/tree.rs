//! A minimal in-memory model of the hierarchical (NeXus-like) file format.
//!
//! The real container format is an external collaborator (spec §1); this
//! module models only what the core needs from it: a tree of named nodes,
//! each either a [`Group`] (a namespace with attributes and children), a
//! [`Field`] (a typed value with attributes), or a [`Link`] (a reference to
//! another node, optionally in a different file). Attributes are a
//! string-keyed map of scalar/string/array values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A scalar, string, or array attribute/field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    StrArray(Vec<String>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_float_array(&self) -> Option<&[f64]> {
        match self {
            Value::FloatArray(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::FloatArray(v)
    }
}

pub type Attrs = BTreeMap<String, Value>;

/// A single field: a value plus attributes (e.g. `units`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Field {
    pub value: Option<Value>,
    #[serde(default)]
    pub attrs: Attrs,
}

impl Field {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
            attrs: Attrs::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }
}

/// A symbolic or external link to another node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    /// Path within the target file (e.g. `/entry/data/data`).
    pub target: String,
    /// `None` means an internal link within the same wrapper file.
    pub file: Option<String>,
}

/// A node in the wrapper tree: a group, a field, or a link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Node {
    Group(Group),
    Field(Field),
    Link(Link),
}

impl Node {
    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Node::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_group_mut(&mut self) -> Option<&mut Group> {
        match self {
            Node::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_field(&self) -> Option<&Field> {
        match self {
            Node::Field(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<&Link> {
        match self {
            Node::Link(l) => Some(l),
            _ => None,
        }
    }
}

/// A namespace node: attributes plus an ordered set of named children.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Group {
    #[serde(default)]
    pub attrs: Attrs,
    #[serde(default)]
    pub children: BTreeMap<String, Node>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.children.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.children.contains_key(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, node: Node) {
        self.children.insert(name.into(), node);
    }

    pub fn remove(&mut self, name: &str) -> Option<Node> {
        self.children.remove(name)
    }

    pub fn insert_field(&mut self, name: impl Into<String>, field: Field) {
        self.insert(name, Node::Field(field));
    }

    pub fn insert_group(&mut self, name: impl Into<String>, group: Group) {
        self.insert(name, Node::Group(group));
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.get(name).and_then(Node::as_field)
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.get(name).and_then(Node::as_group)
    }

    /// Names of immediate child groups (used by `entries()` in wrapper.rs).
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.children.iter().filter_map(|(k, v)| match v {
            Node::Group(_) => Some(k.as_str()),
            _ => None,
        })
    }
}

/// Path-style navigation: `tree.path("instrument/detector/distance")`.
pub fn walk<'a>(root: &'a Group, path: &str) -> Option<&'a Node> {
    let mut current_group = root;
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return None;
    }
    for (i, seg) in segments.iter().enumerate() {
        let node = current_group.get(seg)?;
        if i == segments.len() - 1 {
            return Some(node);
        }
        current_group = node.as_group()?;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_nested_path() {
        let mut root = Group::new();
        let mut instrument = Group::new();
        let mut detector = Group::new();
        detector.insert_field("distance", Field::new(150.0));
        instrument.insert_group("detector", detector);
        root.insert_group("instrument", instrument);

        let node = walk(&root, "instrument/detector/distance").unwrap();
        assert_eq!(node.as_field().unwrap().value, Some(Value::Float(150.0)));
    }

    #[test]
    fn group_names_excludes_fields() {
        let mut root = Group::new();
        root.insert_group("f1", Group::new());
        root.insert_group("f2", Group::new());
        root.insert_field("scalar", Field::new(1.0));
        let mut names: Vec<&str> = root.group_names().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["f1", "f2"]);
    }
}
