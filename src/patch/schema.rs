//! Declared parameter domains.
//!
//! A [`Schema`] is the single source of truth for what a problem's
//! parameter set may contain. It drives three things:
//!
//! | Operation   | Used by                                        |
//! |-------------|------------------------------------------------|
//! | `conform`   | the merger: coerce + clamp every declared field |
//! | `check`     | tests and terminal responses                   |
//! | `describe`  | the prompt builder's rules section             |
//!
//! ## Coercion rules
//!
//! - numbers accept JSON numbers, numeric strings and booleans (1/0)
//! - integers are rounded half away from zero
//! - booleans accept `true/false`, `1/0`, `"yes"/"no"`, `"on"/"off"`
//! - choices match case-insensitively and store the canonical spelling
//!
//! A value that cannot be coerced falls back to the pre-merge value. The
//! pre-merge value must itself be schema-valid; there are no built-in
//! defaults to fall back to.

use serde_json::{Map, Value};

/// Inclusive numeric range for a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
}

impl ParamRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// The type and domain of one field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Float(ParamRange),
    Int(ParamRange),
    Bool,
    Choice(&'static [&'static str]),
    /// Nested object with its own declared fields
    Record(Vec<Field>),
    /// Record-keyed sub-mapping. Keys are fixed by the base parameter set,
    /// every entry conforms to the inner kind.
    Table(Box<FieldKind>),
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub doc: &'static str,
}

impl Field {
    pub fn float(name: &'static str, min: f64, max: f64, doc: &'static str) -> Self {
        Self { name, kind: FieldKind::Float(ParamRange::new(min, max)), doc }
    }

    pub fn int(name: &'static str, min: i64, max: i64, doc: &'static str) -> Self {
        Self { name, kind: FieldKind::Int(ParamRange::new(min as f64, max as f64)), doc }
    }

    pub fn boolean(name: &'static str, doc: &'static str) -> Self {
        Self { name, kind: FieldKind::Bool, doc }
    }

    pub fn choice(name: &'static str, options: &'static [&'static str], doc: &'static str) -> Self {
        Self { name, kind: FieldKind::Choice(options), doc }
    }

    pub fn record(name: &'static str, fields: Vec<Field>, doc: &'static str) -> Self {
        Self { name, kind: FieldKind::Record(fields), doc }
    }

    pub fn table(name: &'static str, entry: Vec<Field>, doc: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Table(Box::new(FieldKind::Record(entry))),
            doc,
        }
    }
}

/// Declared domain of a problem's parameter set.
#[derive(Debug, Clone)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Coerce and clamp every declared field of `candidate`, falling back to
    /// `fallback` field by field. Undeclared fields are dropped.
    ///
    /// Fails with the violations of `fallback` when it is not schema-valid.
    pub fn conform(&self, candidate: &Value, fallback: &Value) -> Result<Value, Vec<String>> {
        let violations = self.check(fallback);
        if !violations.is_empty() {
            return Err(violations);
        }
        conform_record(&self.fields, Some(candidate), fallback)
            .ok_or_else(|| vec!["fallback does not conform".to_string()])
    }

    /// List every domain violation in `value`. Empty means schema-valid.
    pub fn check(&self, value: &Value) -> Vec<String> {
        let mut violations = Vec::new();
        check_record(&self.fields, value, "", &mut violations);
        violations
    }

    /// One line per leaf field: path, type, range and doc.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = Vec::new();
        describe_record(&self.fields, "", &mut lines);
        lines
    }
}

// `None` only when `fallback` itself is missing or out of domain.
fn conform_record(fields: &[Field], candidate: Option<&Value>, fallback: &Value) -> Option<Value> {
    let mut out = Map::new();
    for field in fields {
        let c = candidate.and_then(|v| v.get(field.name));
        let f = fallback.get(field.name)?;
        out.insert(field.name.to_string(), conform_kind(&field.kind, c, f)?);
    }
    Some(Value::Object(out))
}

fn conform_kind(kind: &FieldKind, candidate: Option<&Value>, fallback: &Value) -> Option<Value> {
    let value = match kind {
        FieldKind::Float(range) => {
            let value = candidate.and_then(coerce_f64).or_else(|| coerce_f64(fallback))?;
            number(range.clamp(value))
        }
        FieldKind::Int(range) => {
            let value = candidate.and_then(coerce_f64).or_else(|| coerce_f64(fallback))?;
            Value::from(range.clamp(value.round()) as i64)
        }
        FieldKind::Bool => Value::Bool(candidate.and_then(coerce_bool).or_else(|| coerce_bool(fallback))?),
        FieldKind::Choice(options) => {
            let value = candidate
                .and_then(|v| coerce_choice(v, options))
                .or_else(|| coerce_choice(fallback, options))?;
            Value::String(value.to_string())
        }
        FieldKind::Record(fields) => conform_record(fields, candidate, fallback)?,
        FieldKind::Table(entry) => {
            // Keys come from the base; patch-only keys were already ignored by the merge.
            let mut out = Map::new();
            for (key, f) in fallback.as_object()? {
                let c = candidate.and_then(|v| v.get(key));
                out.insert(key.clone(), conform_kind(entry, c, f)?);
            }
            Value::Object(out)
        }
    };
    Some(value)
}

fn number(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

pub(crate) fn coerce_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_choice(value: &Value, options: &[&'static str]) -> Option<&'static str> {
    let s = value.as_str()?.trim();
    options.iter().copied().find(|o| o.eq_ignore_ascii_case(s))
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn check_record(fields: &[Field], value: &Value, prefix: &str, out: &mut Vec<String>) {
    for field in fields {
        let path = join(prefix, field.name);
        match value.get(field.name) {
            Some(v) => check_kind(&field.kind, v, &path, out),
            None => out.push(format!("{}: missing", path)),
        }
    }
}

fn check_kind(kind: &FieldKind, value: &Value, path: &str, out: &mut Vec<String>) {
    match kind {
        FieldKind::Float(range) => match value.as_f64() {
            Some(n) if range.contains(n) => {}
            Some(n) => out.push(format!("{}: {} outside [{}, {}]", path, n, range.min, range.max)),
            None => out.push(format!("{}: expected number", path)),
        },
        FieldKind::Int(range) => match value.as_i64() {
            Some(n) if range.contains(n as f64) => {}
            Some(n) => out.push(format!("{}: {} outside [{}, {}]", path, n, range.min, range.max)),
            None => out.push(format!("{}: expected integer", path)),
        },
        FieldKind::Bool => {
            if !value.is_boolean() {
                out.push(format!("{}: expected boolean", path));
            }
        }
        FieldKind::Choice(options) => match value.as_str() {
            Some(s) if options.contains(&s) => {}
            _ => out.push(format!("{}: expected one of {}", path, options.join("|"))),
        },
        FieldKind::Record(fields) => check_record(fields, value, path, out),
        FieldKind::Table(entry) => match value.as_object() {
            Some(map) => {
                for (key, v) in map {
                    check_kind(entry, v, &join(path, key), out);
                }
            }
            None => out.push(format!("{}: expected table", path)),
        },
    }
}

fn describe_record(fields: &[Field], prefix: &str, out: &mut Vec<String>) {
    for field in fields {
        describe_kind(&field.kind, &join(prefix, field.name), field.doc, out);
    }
}

fn describe_kind(kind: &FieldKind, path: &str, doc: &str, out: &mut Vec<String>) {
    let line = |ty: String| {
        if doc.is_empty() {
            format!("{}: {}", path, ty)
        } else {
            format!("{}: {} - {}", path, ty, doc)
        }
    };
    match kind {
        FieldKind::Float(r) => out.push(line(format!("number in [{}, {}]", r.min, r.max))),
        FieldKind::Int(r) => out.push(line(format!("integer in [{}, {}]", r.min, r.max))),
        FieldKind::Bool => out.push(line("true or false".to_string())),
        FieldKind::Choice(options) => out.push(line(format!("one of {}", options.join(" | ")))),
        FieldKind::Record(fields) => describe_record(fields, path, out),
        FieldKind::Table(entry) => {
            if !doc.is_empty() {
                out.push(format!("{}.<key>: {}", path, doc));
            }
            describe_kind(entry, &format!("{}.<key>", path), "", out);
        }
    }
}
