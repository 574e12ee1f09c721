use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value as Json};

// ---------------------------------------------------------------------------
// Well-known context keys
// ---------------------------------------------------------------------------

pub const PLATE: &str = "plate";
pub const PLATE_RECOGNIZED: &str = "plate_recognized";
pub const FAILURES: &str = "failures";
/// Entry plates found in the ledger history for the current plate.
pub const ENTRY_PLATES: &str = "entry_plates";
pub const EXIT_PLATE: &str = "exit_plate";
pub const AMOUNT_OWED: &str = "amount_owed";
pub const PAYMENTS: &str = "payments";
pub const LAST_INPUT: &str = "last_input";
/// Tri-state: `Null` (unknown), `Bool(true)`, `Bool(false)`.
pub const CONFIRMED: &str = "confirmed";
pub const OUTCOME: &str = "outcome";

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A typed context variable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    /// Truthiness for bare-variable conditions: empty, zero and null are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

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

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }

    pub fn to_json(&self) -> Json {
        // Untagged serialization of these variants cannot fail.
        serde_json::to_value(self).unwrap_or(Json::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Option<bool>> for Value {
    fn from(b: Option<bool>) -> Self {
        b.map_or(Value::Null, Value::Bool)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items.into_iter().map(Value::Str).collect())
    }
}

// ---------------------------------------------------------------------------
// Context store
// ---------------------------------------------------------------------------

/// Mutable variables of one dialogue session.
#[derive(Debug, Clone)]
pub struct Context {
    vars: BTreeMap<String, Value>,
}

impl Context {
    /// A fresh session context with every well-known key present.
    pub fn new() -> Self {
        let mut vars = BTreeMap::new();
        vars.insert(PLATE.to_string(), Value::Str(String::new()));
        vars.insert(PLATE_RECOGNIZED.to_string(), Value::Bool(false));
        vars.insert(FAILURES.to_string(), Value::Int(0));
        vars.insert(ENTRY_PLATES.to_string(), Value::List(Vec::new()));
        vars.insert(EXIT_PLATE.to_string(), Value::Str(String::new()));
        vars.insert(AMOUNT_OWED.to_string(), Value::Float(0.0));
        vars.insert(PAYMENTS.to_string(), Value::Int(0));
        vars.insert(LAST_INPUT.to_string(), Value::Str(String::new()));
        vars.insert(CONFIRMED.to_string(), Value::Null);
        vars.insert(OUTCOME.to_string(), Value::Null);
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.vars.insert(key.to_string(), value.into());
    }

    pub fn plate(&self) -> &str {
        self.get(PLATE).and_then(Value::as_str).unwrap_or("")
    }

    pub fn failures(&self) -> i64 {
        match self.get(FAILURES) {
            Some(Value::Int(n)) => *n,
            _ => 0,
        }
    }

    pub fn amount_owed(&self) -> f64 {
        self.get(AMOUNT_OWED).and_then(Value::as_f64).unwrap_or(0.0)
    }

    pub fn confirmed(&self) -> Option<bool> {
        match self.get(CONFIRMED) {
            Some(Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Snapshot of every variable, persisted as the session's slots.
    pub fn to_slots(&self) -> Map<String, Json> {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
