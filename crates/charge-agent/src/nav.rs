//! Ordered navigable trees.
//!
//! Field templates address values by dotted paths with optional `[N]`
//! indices. Branches preserve insertion order, which defines the
//! serialisation order of the charging event and of reply attributes.

use std::fmt;
use std::time::Duration;

/// A leaf value in a navigable tree.
#[derive(Debug, Clone, PartialEq)]
pub enum NavValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Duration(Duration),
}

impl NavValue {
    /// Empty values are skipped by non-mandatory templates.
    pub fn is_empty(&self) -> bool {
        matches!(self, NavValue::Text(s) if s.is_empty())
    }

    pub fn as_json(&self) -> serde_json::Value {
        match self {
            NavValue::Text(s) => serde_json::Value::String(s.clone()),
            NavValue::Integer(i) => serde_json::Value::from(*i),
            NavValue::Real(f) => serde_json::Value::from(*f),
            NavValue::Boolean(b) => serde_json::Value::Bool(*b),
            // durations travel as nanoseconds
            NavValue::Duration(d) => serde_json::Value::from(d.as_nanos() as i64),
        }
    }
}

impl fmt::Display for NavValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavValue::Text(s) => f.write_str(s),
            NavValue::Integer(i) => write!(f, "{i}"),
            NavValue::Real(v) => write!(f, "{v}"),
            NavValue::Boolean(b) => write!(f, "{b}"),
            NavValue::Duration(d) => write!(f, "{}", d.as_nanos()),
        }
    }
}

/// One path segment: a field name with an optional 0-based index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathItem {
    pub name: String,
    pub index: Option<usize>,
}

impl PathItem {
    pub fn new(name: impl Into<String>) -> Self {
        PathItem {
            name: name.into(),
            index: None,
        }
    }
}

/// Parse `A.B[2].C` into path items.
pub fn parse_path(path: &str) -> Vec<PathItem> {
    path.split('.')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            if let Some(open) = segment.find('[') {
                if segment.ends_with(']') {
                    if let Ok(index) = segment[open + 1..segment.len() - 1].parse::<usize>() {
                        return PathItem {
                            name: segment[..open].to_string(),
                            index: Some(index),
                        };
                    }
                }
            }
            PathItem::new(segment)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub enum NavNode {
    Leaf(NavValue),
    Branch(NavMap),
    List(Vec<NavNode>),
}

/// An insertion-ordered map of path segment to node.
#[derive(Debug, Clone, Default)]
pub struct NavMap {
    entries: Vec<(String, NavNode)>,
}

impl NavMap {
    pub fn new() -> Self {
        NavMap::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, name: &str) -> Option<&mut NavNode> {
        self.entries
            .iter_mut()
            .find(|(key, _)| key == name)
            .map(|(_, node)| node)
    }

    fn entry(&self, name: &str) -> Option<&NavNode> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, node)| node)
    }

    /// Write a value, creating intermediate branches (and list slots for
    /// indexed segments) as needed. Overwrites an existing leaf.
    pub fn set(&mut self, path: &[PathItem], value: NavValue) {
        if path.is_empty() {
            return;
        }
        let item = &path[0];
        if self.entry(&item.name).is_none() {
            let node = match item.index {
                Some(_) => NavNode::List(Vec::new()),
                None => NavNode::Branch(NavMap::new()),
            };
            self.entries.push((item.name.clone(), node));
        }
        let node = self.entry_mut(&item.name).expect("entry just ensured");
        let slot = match item.index {
            None => node,
            Some(index) => {
                if !matches!(node, NavNode::List(_)) {
                    *node = NavNode::List(Vec::new());
                }
                let NavNode::List(items) = node else { unreachable!() };
                while items.len() <= index {
                    items.push(NavNode::Branch(NavMap::new()));
                }
                &mut items[index]
            }
        };
        if path.len() == 1 {
            *slot = NavNode::Leaf(value);
        } else {
            if !matches!(slot, NavNode::Branch(_)) {
                *slot = NavNode::Branch(NavMap::new());
            }
            let NavNode::Branch(branch) = slot else { unreachable!() };
            branch.set(&path[1..], value);
        }
    }

    pub fn node(&self, path: &[PathItem]) -> Option<&NavNode> {
        let item = path.first()?;
        let mut node = self.entry(&item.name)?;
        if let Some(index) = item.index {
            let NavNode::List(items) = node else { return None };
            node = items.get(index)?;
        }
        if path.len() == 1 {
            Some(node)
        } else {
            match node {
                NavNode::Branch(branch) => branch.node(&path[1..]),
                _ => None,
            }
        }
    }

    pub fn field(&self, path: &[PathItem]) -> Option<&NavValue> {
        match self.node(path)? {
            NavNode::Leaf(value) => Some(value),
            NavNode::List(items) => match items.first()? {
                NavNode::Leaf(value) => Some(value),
                _ => None,
            },
            NavNode::Branch(_) => None,
        }
    }

    pub fn field_as_string(&self, path: &[PathItem]) -> Option<String> {
        self.field(path).map(NavValue::to_string)
    }

    /// Leaves in insertion order as (dotted path, value) pairs.
    pub fn ordered_fields(&self) -> Vec<(String, &NavValue)> {
        let mut fields = Vec::new();
        self.collect_fields("", &mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a NavValue)>) {
        for (name, node) in &self.entries {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };
            Self::collect_node(node, &path, out);
        }
    }

    fn collect_node<'a>(node: &'a NavNode, path: &str, out: &mut Vec<(String, &'a NavValue)>) {
        match node {
            NavNode::Leaf(value) => out.push((path.to_string(), value)),
            NavNode::Branch(branch) => branch.collect_fields(path, out),
            NavNode::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    Self::collect_node(item, &format!("{path}[{i}]"), out);
                }
            }
        }
    }

    /// Project the tree into a JSON object, preserving insertion order.
    pub fn as_json(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        for (name, node) in &self.entries {
            map.insert(name.clone(), Self::node_as_json(node));
        }
        map
    }

    fn node_as_json(node: &NavNode) -> serde_json::Value {
        match node {
            NavNode::Leaf(value) => value.as_json(),
            NavNode::Branch(branch) => serde_json::Value::Object(branch.as_json()),
            NavNode::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::node_as_json).collect())
            }
        }
    }

    /// Merge a JSON value into the tree (RPC reply decoding).
    pub fn merge_json(&mut self, prefix: &[PathItem], value: &serde_json::Value) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map {
                    let mut path = prefix.to_vec();
                    path.push(PathItem::new(key.clone()));
                    self.merge_json(&path, val);
                }
            }
            serde_json::Value::Array(items) => {
                if prefix.is_empty() {
                    return;
                }
                for (i, val) in items.iter().enumerate() {
                    let mut path = prefix.to_vec();
                    path.last_mut().expect("prefix checked above").index = Some(i);
                    self.merge_json(&path, val);
                }
            }
            serde_json::Value::Null => {}
            serde_json::Value::Bool(b) => self.set(prefix, NavValue::Boolean(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    self.set(prefix, NavValue::Integer(i));
                } else {
                    self.set(prefix, NavValue::Real(n.as_f64().unwrap_or_default()));
                }
            }
            serde_json::Value::String(s) => self.set(prefix, NavValue::Text(s.clone())),
        }
    }
}
