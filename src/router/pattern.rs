use std::collections::BTreeMap;

use crate::error::{AppError, AppResult};

/// Captured route parameters by name. A trailing wildcard is stored under `*`.
pub type Params = BTreeMap<String, String>;

pub const WILDCARD_KEY: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    Param(String),
    Wildcard,
}

/// A compiled path template such as `/user/:id` or `/docs/*`.
#[derive(Debug, Clone)]
pub struct PathPattern {
    template: String,
    segments: Vec<Segment>,
    keys: Vec<String>,
}

impl PathPattern {
    pub fn compile(template: &str) -> AppResult<Self> {
        let parts = split_path(template);
        let mut segments = Vec::with_capacity(parts.len());
        let mut keys: Vec<String> = Vec::new();

        for (i, part) in parts.iter().enumerate() {
            if *part == "*" {
                if i + 1 != parts.len() {
                    return Err(AppError::InputError(format!(
                        "Wildcard must be the last segment in route {}",
                        template
                    )));
                }
                keys.push(WILDCARD_KEY.to_string());
                segments.push(Segment::Wildcard);
            } else if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(AppError::InputError(format!(
                        "Invalid parameter name '{}' in route {}",
                        name, template
                    )));
                }
                if keys.iter().any(|k| k == name) {
                    return Err(AppError::InputError(format!(
                        "Duplicate parameter '{}' in route {}",
                        name, template
                    )));
                }
                keys.push(name.to_string());
                segments.push(Segment::Param(name.to_string()));
            } else {
                segments.push(Segment::Static(part.to_string()));
            }
        }

        Ok(Self { template: template.to_string(), segments, keys })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Parameter names in template order.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Matches `path` (query string allowed) against the template.
    pub fn matches(&self, path: &str) -> Option<Params> {
        let parts: Vec<String> = split_path(path).into_iter().map(decode_segment).collect();
        let mut params = Params::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Wildcard => {
                    params.insert(WILDCARD_KEY.to_string(), parts[i.min(parts.len())..].join("/"));
                    return Some(params);
                }
                Segment::Static(expected) => {
                    if parts.get(i) != Some(expected) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(i)?;
                    params.insert(name.clone(), value.clone());
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }
}

/// Splits a path into non-empty segments, ignoring any query string or fragment.
pub fn split_path(path: &str) -> Vec<&str> {
    let path = path.split(['?', '#']).next().unwrap_or("");
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn decode_segment(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}
