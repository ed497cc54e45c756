//! Declarative validation of request data.
//!
//! Controllers describe the fields they accept; [`Schema::validate`] coerces
//! string input (query strings, form posts) to the declared type and collects
//! every failure into one [`AppError::InputErrorSchema`].

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};

use crate::error::{AppError, AppResult};

const MAX_STRING_LENGTH: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Any,
}

#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    kind: FieldKind,
    optional: bool,
    min_len: Option<usize>,
    max_len: Option<usize>,
    min: Option<f64>,
    max: Option<f64>,
    email: bool,
    one_of: Vec<String>,
    default: Option<Value>,
}

impl Field {
    fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            optional: false,
            min_len: None,
            max_len: None,
            min: None,
            max: None,
            email: false,
            one_of: Vec::new(),
            default: None,
        }
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn number(name: &str) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn any(name: &str) -> Self {
        Self::new(name, FieldKind::Any)
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn min_len(mut self, n: usize) -> Self {
        self.min_len = Some(n);
        self
    }

    pub fn max_len(mut self, n: usize) -> Self {
        self.max_len = Some(n);
        self
    }

    pub fn min(mut self, n: f64) -> Self {
        self.min = Some(n);
        self
    }

    pub fn max(mut self, n: f64) -> Self {
        self.max = Some(n);
        self
    }

    pub fn email(mut self) -> Self {
        self.email = true;
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.one_of = values.iter().map(|v| v.to_string()).collect();
        self
    }

    /// Used when the field is absent. Implies `optional`.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self.optional = true;
        self
    }

    fn check(&self, raw: &Value, errors: &mut Vec<String>) -> Option<Value> {
        match self.kind {
            FieldKind::String => {
                let s = match raw {
                    Value::String(s) => s.trim().to_string(),
                    Value::Number(n) => n.to_string(),
                    _ => {
                        errors.push("Must be a string".into());
                        return None;
                    }
                };
                if s.contains('\0') {
                    errors.push("Contains null characters".into());
                }
                if s.len() > self.max_len.unwrap_or(MAX_STRING_LENGTH) {
                    errors.push(format!("Must be at most {} characters", self.max_len.unwrap_or(MAX_STRING_LENGTH)));
                }
                if let Some(min) = self.min_len {
                    if s.chars().count() < min {
                        errors.push(format!("Must be at least {} characters", min));
                    }
                }
                if self.email && !looks_like_email(&s) {
                    errors.push("Must be a valid email address".into());
                }
                if !self.one_of.is_empty() && !self.one_of.contains(&s) {
                    errors.push(format!("Must be one of: {}", self.one_of.join(", ")));
                }
                Some(Value::String(s))
            }
            FieldKind::Number | FieldKind::Integer => {
                let n = match raw {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                let Some(n) = n.filter(|n| n.is_finite()) else {
                    errors.push("Must be a number".into());
                    return None;
                };
                if self.kind == FieldKind::Integer && n.fract() != 0.0 {
                    errors.push("Must be an integer".into());
                    return None;
                }
                if let Some(min) = self.min {
                    if n < min {
                        errors.push(format!("Must be at least {}", min));
                    }
                }
                if let Some(max) = self.max {
                    if n > max {
                        errors.push(format!("Must be at most {}", max));
                    }
                }
                if self.kind == FieldKind::Integer {
                    Some(Value::Number(Number::from(n as i64)))
                } else {
                    Number::from_f64(n).map(Value::Number)
                }
            }
            FieldKind::Boolean => match raw {
                Value::Bool(b) => Some(Value::Bool(*b)),
                Value::String(s) if matches!(s.as_str(), "true" | "1" | "on") => Some(Value::Bool(true)),
                Value::String(s) if matches!(s.as_str(), "false" | "0" | "off") => Some(Value::Bool(false)),
                _ => {
                    errors.push("Must be a boolean".into());
                    None
                }
            },
            FieldKind::Any => Some(raw.clone()),
        }
    }
}

fn looks_like_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Returns the typed subset of `input` the schema declares. Undeclared
    /// keys are dropped.
    pub fn validate(&self, input: &Map<String, Value>) -> AppResult<Map<String, Value>> {
        let mut out = Map::new();
        let mut failures: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for field in &self.fields {
            let raw = input.get(&field.name).filter(|v| match v {
                Value::Null => false,
                Value::String(s) => !s.trim().is_empty(),
                _ => true,
            });
            let Some(raw) = raw else {
                if let Some(default) = &field.default {
                    out.insert(field.name.clone(), default.clone());
                } else if !field.optional {
                    failures.entry(field.name.clone()).or_default().push("This field is required".into());
                }
                continue;
            };

            let mut errors = Vec::new();
            let value = field.check(raw, &mut errors);
            if errors.is_empty() {
                if let Some(value) = value {
                    out.insert(field.name.clone(), value);
                }
            } else {
                failures.insert(field.name.clone(), errors);
            }
        }

        if failures.is_empty() {
            Ok(out)
        } else {
            Err(AppError::InputErrorSchema { fields: failures })
        }
    }
}
