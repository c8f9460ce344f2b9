//! Dynamically shaped attribute bags.
//!
//! Resource attributes arrive as arbitrary JSON produced by the parsing
//! collaborator. They are held as a tagged union so that nested lookups
//! return an explicit absent instead of propagating nulls.
//!
//! Path syntax is dot-separated (`ip_configuration.subnet_id`). Terraform
//! renders nested blocks as lists, so a non-numeric segment applied to a list
//! descends into its first element; a numeric segment indexes the list.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::String(s) => write!(f, "{s}"),
        }
    }
}

/// A recursive attribute value: scalar, list, or mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum AttrValue {
    Scalar(Scalar),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    pub fn string(s: impl Into<String>) -> Self {
        AttrValue::Scalar(Scalar::String(s.into()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttrValue::Scalar(Scalar::Null))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Booleans, accepting the `"true"`/`"false"` strings HCL renders for
    /// interpolated values.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Scalar(Scalar::Bool(b)) => Some(*b),
            AttrValue::Scalar(Scalar::String(s)) => match s.to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Numbers, accepting numeric strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Scalar(Scalar::Number(n)) => Some(*n),
            AttrValue::Scalar(Scalar::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttrValue]> {
        match self {
            AttrValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, AttrValue>> {
        match self {
            AttrValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// True for null, empty lists, and empty maps.
    pub fn is_empty(&self) -> bool {
        match self {
            AttrValue::Scalar(Scalar::Null) => true,
            AttrValue::List(items) => items.is_empty(),
            AttrValue::Map(map) => map.is_empty(),
            AttrValue::Scalar(_) => false,
        }
    }

    /// Look up a dot-separated path. Null leaves are reported as absent.
    pub fn get_path(&self, path: &str) -> Option<&AttrValue> {
        let segments: Vec<&str> = split_path(path);
        descend(self, &segments)
    }

    /// Collect every value reachable at `path`, fanning out across lists of
    /// blocks instead of taking the first element.
    pub fn values_at(&self, path: &str) -> Vec<&AttrValue> {
        let segments = split_path(path);
        let mut out = Vec::new();
        fan_out(self, &segments, &mut out);
        out
    }

    /// Every string reachable at `path`, flattening string lists.
    pub fn strings_at(&self, path: &str) -> Vec<&str> {
        self.values_at(path)
            .into_iter()
            .flat_map(|v| match v {
                AttrValue::List(items) => items.iter().filter_map(|i| i.as_str()).collect::<Vec<_>>(),
                other => other.as_str().into_iter().collect::<Vec<_>>(),
            })
            .collect()
    }

    /// Render scalars (or a list of scalars) as a list of strings.
    pub fn string_list(&self) -> Vec<String> {
        match self {
            AttrValue::List(items) => items
                .iter()
                .filter(|i| !i.is_null())
                .map(|i| i.render())
                .collect(),
            AttrValue::Scalar(Scalar::Null) => Vec::new(),
            other => vec![other.render()],
        }
    }

    /// Human-readable rendering: scalars as text, collections as JSON.
    pub fn render(&self) -> String {
        match self {
            AttrValue::Scalar(s) => s.to_string(),
            other => serde_json::Value::from(other.clone()).to_string(),
        }
    }

    /// Visit every string leaf with its dot path.
    pub fn walk_strings(&self, prefix: &str, visit: &mut dyn FnMut(&str, &str)) {
        match self {
            AttrValue::Scalar(Scalar::String(s)) => visit(prefix, s),
            AttrValue::Scalar(_) => {}
            AttrValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.walk_strings(&join_path(prefix, &i.to_string()), visit);
                }
            }
            AttrValue::Map(map) => {
                for (k, v) in map {
                    v.walk_strings(&join_path(prefix, k), visit);
                }
            }
        }
    }
}

/// Path lookup rooted at a resource's top-level attribute map.
pub fn lookup<'a>(attrs: &'a BTreeMap<String, AttrValue>, path: &str) -> Option<&'a AttrValue> {
    let segments = split_path(path);
    let (first, rest) = segments.split_first()?;
    descend(attrs.get(*first)?, rest)
}

/// Fan-out lookup rooted at a resource's top-level attribute map.
pub fn lookup_all<'a>(attrs: &'a BTreeMap<String, AttrValue>, path: &str) -> Vec<&'a AttrValue> {
    let segments = split_path(path);
    let mut out = Vec::new();
    if let Some((first, rest)) = segments.split_first() {
        if let Some(root) = attrs.get(*first) {
            fan_out(root, rest, &mut out);
        }
    }
    out
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

fn descend<'a>(mut current: &'a AttrValue, segments: &[&str]) -> Option<&'a AttrValue> {
    for segment in segments {
        current = match current {
            AttrValue::Map(map) => map.get(*segment)?,
            AttrValue::List(items) => match segment.parse::<usize>() {
                Ok(i) => items.get(i)?,
                Err(_) => match items.first()? {
                    AttrValue::Map(map) => map.get(*segment)?,
                    _ => return None,
                },
            },
            AttrValue::Scalar(_) => return None,
        };
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

fn fan_out<'a>(current: &'a AttrValue, segments: &[&str], out: &mut Vec<&'a AttrValue>) {
    let Some((segment, rest)) = segments.split_first() else {
        if !current.is_null() {
            out.push(current);
        }
        return;
    };
    match current {
        AttrValue::Map(map) => {
            if let Some(next) = map.get(*segment) {
                fan_out(next, rest, out);
            }
        }
        AttrValue::List(items) => match segment.parse::<usize>() {
            Ok(i) => {
                if let Some(next) = items.get(i) {
                    fan_out(next, rest, out);
                }
            }
            Err(_) => {
                for item in items {
                    fan_out(item, segments, out);
                }
            }
        },
        AttrValue::Scalar(_) => {}
    }
}

impl From<serde_json::Value> for AttrValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => AttrValue::Scalar(Scalar::Null),
            serde_json::Value::Bool(b) => AttrValue::Scalar(Scalar::Bool(b)),
            serde_json::Value::Number(n) => {
                AttrValue::Scalar(Scalar::Number(n.as_f64().unwrap_or_default()))
            }
            serde_json::Value::String(s) => AttrValue::Scalar(Scalar::String(s)),
            serde_json::Value::Array(items) => {
                AttrValue::List(items.into_iter().map(AttrValue::from).collect())
            }
            serde_json::Value::Object(map) => {
                AttrValue::Map(map.into_iter().map(|(k, v)| (k, AttrValue::from(v))).collect())
            }
        }
    }
}

impl From<AttrValue> for serde_json::Value {
    fn from(value: AttrValue) -> Self {
        match value {
            AttrValue::Scalar(Scalar::Null) => serde_json::Value::Null,
            AttrValue::Scalar(Scalar::Bool(b)) => serde_json::Value::Bool(b),
            AttrValue::Scalar(Scalar::Number(n)) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    serde_json::Value::from(n as i64)
                } else {
                    serde_json::Number::from_f64(n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            AttrValue::Scalar(Scalar::String(s)) => serde_json::Value::String(s),
            AttrValue::List(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            AttrValue::Map(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}
