use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;

use bytes::Bytes;
use serde::Serialize;

use crate::svt::Svt;

/// One entry of an output status list: output id and dimmer percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OutputState {
    pub id: u8,
    pub dimmer: u8,
}

/// Error counter of one module, e.g. `O20` with 3 errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleErrors {
    /// Module type letter (`O`utput, `I`nput, `T`emperature, ...).
    pub module_type: char,
    /// Module number on the bus.
    pub module_number: u8,
    pub count: u16,
}

impl ModuleErrors {
    pub fn new(module_type: char, module_number: u8, count: u16) -> Self {
        Self {
            module_type,
            module_number,
            count,
        }
    }

    /// Module code as shown by the master, e.g. `O20`.
    pub fn code(&self) -> String {
        format!("{}{}", self.module_type, self.module_number)
    }
}

/// A decoded (or to-be-encoded) field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Padding and literals decode to nothing.
    Empty,
    Int(u32),
    Str(String),
    Bytes(Bytes),
    Svt(Svt),
    Outputs(Vec<OutputState>),
    Errors(Vec<ModuleErrors>),
}

impl FieldValue {
    /// Short kind name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Empty => "empty",
            FieldValue::Int(_) => "integer",
            FieldValue::Str(_) => "string",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::Svt(_) => "svt",
            FieldValue::Outputs(_) => "output list",
            FieldValue::Errors(_) => "error list",
        }
    }

    pub fn as_int(&self) -> Option<u32> {
        match self {
            FieldValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_svt(&self) -> Option<Svt> {
        match self {
            FieldValue::Svt(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_outputs(&self) -> Option<&[OutputState]> {
        match self {
            FieldValue::Outputs(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_errors(&self) -> Option<&[ModuleErrors]> {
        match self {
            FieldValue::Errors(value) => Some(value),
            _ => None,
        }
    }
}

impl From<u8> for FieldValue {
    fn from(value: u8) -> Self {
        FieldValue::Int(u32::from(value))
    }
}

impl From<u16> for FieldValue {
    fn from(value: u16) -> Self {
        FieldValue::Int(u32::from(value))
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Int(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(value: &[u8]) -> Self {
        FieldValue::Bytes(Bytes::copy_from_slice(value))
    }
}

impl<const N: usize> From<&[u8; N]> for FieldValue {
    fn from(value: &[u8; N]) -> Self {
        FieldValue::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        FieldValue::Bytes(Bytes::from(value))
    }
}

impl From<Bytes> for FieldValue {
    fn from(value: Bytes) -> Self {
        FieldValue::Bytes(value)
    }
}

impl From<Svt> for FieldValue {
    fn from(value: Svt) -> Self {
        FieldValue::Svt(value)
    }
}

impl From<Vec<ModuleErrors>> for FieldValue {
    fn from(value: Vec<ModuleErrors>) -> Self {
        FieldValue::Errors(value)
    }
}

/// Field values keyed by field name.
///
/// Used both as the input map for [`create_input`](crate::MasterCommandSpec::create_input)
/// and as the decoded output of a command.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Fields(BTreeMap<String, FieldValue>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Integer field, `None` if absent or not an integer.
    pub fn int(&self, name: &str) -> Option<u32> {
        self.get(name).and_then(FieldValue::as_int)
    }

    /// String field, `None` if absent or not a string.
    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_str)
    }

    /// Byte field, `None` if absent or not bytes.
    pub fn bytes(&self, name: &str) -> Option<&[u8]> {
        self.get(name).and_then(FieldValue::as_bytes)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Index<&str> for Fields {
    type Output = FieldValue;

    fn index(&self, name: &str) -> &Self::Output {
        match self.0.get(name) {
            Some(value) => value,
            None => panic!("no field named '{name}'"),
        }
    }
}

impl fmt::Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}
