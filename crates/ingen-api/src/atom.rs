//! Typed values and property bags.
//!
//! An [`Atom`] is a self-describing value exchanged with clients and
//! stored as entity metadata. [`Properties`] is a multimap from URI keys
//! to atoms, the form in which entity state crosses the engine boundary.

use std::collections::BTreeMap;
use std::fmt;

/// A typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    /// 32-bit signed integer.
    Int(i32),
    /// 32-bit float.
    Float(f32),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    String(String),
    /// URI reference.
    Uri(String),
    /// Opaque bytes.
    Blob(Vec<u8>),
}

impl Atom {
    /// Returns the value as a float if it is numeric.
    pub fn as_float(&self) -> Option<f32> {
        match self {
            Atom::Float(f) => Some(*f),
            Atom::Int(i) => Some(*i as f32),
            _ => None,
        }
    }

    /// Returns the value as an integer if it is numeric.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Atom::Int(i) => Some(*i),
            Atom::Float(f) => Some(*f as i32),
            _ => None,
        }
    }

    /// Returns the value as a bool, if boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Atom::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value as a string slice for String and Uri atoms.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Atom::String(s) | Atom::Uri(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Int(i) => write!(f, "{}", i),
            Atom::Float(x) => write!(f, "{}", x),
            Atom::Bool(b) => write!(f, "{}", b),
            Atom::String(s) => write!(f, "\"{}\"", s),
            Atom::Uri(u) => write!(f, "<{}>", u),
            Atom::Blob(b) => write!(f, "blob({} bytes)", b.len()),
        }
    }
}

/// Well-known property keys.
pub mod keys {
    /// Entity type (graph, block, port).
    pub const TYPE: &str = "ingen:type";
    /// Plugin identity of a block.
    pub const PLUGIN: &str = "ingen:plugin";
    /// Polyphony of a graph.
    pub const POLYPHONY: &str = "ingen:polyphony";
    /// Whether a block is polyphonic.
    pub const POLYPHONIC: &str = "ingen:polyphonic";
    /// Port value (control ports).
    pub const VALUE: &str = "ingen:value";
    /// Minimum port value.
    pub const MINIMUM: &str = "ingen:minimum";
    /// Maximum port value.
    pub const MAXIMUM: &str = "ingen:maximum";
    /// Whether a port broadcasts its value/peak after each cycle.
    pub const BROADCAST: &str = "ingen:broadcast";
    /// Port signal class (audio, CV, control, atom).
    pub const PORT_TYPE: &str = "ingen:portType";
}

/// Well-known type and class URIs.
pub mod uris {
    /// A graph entity.
    pub const GRAPH: &str = "ingen:Graph";
    /// A leaf block entity.
    pub const BLOCK: &str = "ingen:Block";
    /// An input port entity.
    pub const INPUT_PORT: &str = "ingen:InputPort";
    /// An output port entity.
    pub const OUTPUT_PORT: &str = "ingen:OutputPort";
    /// Audio-rate port class.
    pub const AUDIO_PORT: &str = "ingen:AudioPort";
    /// Control-rate smooth port class.
    pub const CV_PORT: &str = "ingen:CVPort";
    /// Scalar control port class.
    pub const CONTROL_PORT: &str = "ingen:ControlPort";
    /// Timestamped event port class.
    pub const ATOM_PORT: &str = "ingen:AtomPort";
}

/// A multimap from URI keys to typed atoms.
///
/// Insertion order within one key is preserved; keys are sorted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    entries: BTreeMap<String, Vec<Atom>>,
}

impl Properties {
    /// Creates an empty property bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value under `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: Atom) {
        self.entries.entry(key.into()).or_default().push(value);
    }

    /// Replaces all values under `key` with a single value.
    pub fn set(&mut self, key: impl Into<String>, value: Atom) {
        self.entries.insert(key.into(), vec![value]);
    }

    /// Removes all values under `key`, returning them.
    pub fn remove(&mut self, key: &str) -> Vec<Atom> {
        self.entries.remove(key).unwrap_or_default()
    }

    /// Removes every occurrence of `value` under `key`, leaving other
    /// values of the key in place. Returns the number removed.
    pub fn remove_value(&mut self, key: &str, value: &Atom) -> usize {
        let removed = match self.entries.get_mut(key) {
            Some(values) => {
                let before = values.len();
                values.retain(|v| v != value);
                before - values.len()
            }
            None => 0,
        };
        if self.entries.get(key).is_some_and(Vec::is_empty) {
            self.entries.remove(key);
        }
        removed
    }

    /// Returns the first value under `key`.
    pub fn get(&self, key: &str) -> Option<&Atom> {
        self.entries.get(key).and_then(|v| v.first())
    }

    /// Returns all values under `key`.
    pub fn get_all(&self, key: &str) -> &[Atom] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Returns true if no entries are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates (key, value) pairs, one per value.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Atom)> {
        self.entries
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v)))
    }
}

impl FromIterator<(String, Atom)> for Properties {
    fn from_iter<T: IntoIterator<Item = (String, Atom)>>(iter: T) -> Self {
        let mut props = Properties::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}
