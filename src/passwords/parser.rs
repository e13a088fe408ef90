//! Parsing and validation of the configured password list.

use std::collections::HashSet;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;
use zeroize::Zeroizing;

use crate::error::{FieldErrors, PasswordError};

const LABEL_LEN: (usize, usize) = (5, 20);
const SECRET_LEN: (usize, usize) = (20, 1024);

const MULTIPLE_PRIMARIES: &str = "expected exactly one primary, got multiple; mark one password as primary and others as non-primary but do not remove them";

/// One entry of the configured password list.
#[derive(Clone)]
pub struct PasswordEntry {
    pub label: String,
    pub secret: Zeroizing<String>,
    pub primary: bool,
}

impl PasswordEntry {
    pub fn new(label: impl Into<String>, secret: impl Into<String>, primary: bool) -> Self {
        Self {
            label: label.into(),
            secret: Zeroizing::new(secret.into()),
            primary,
        }
    }
}

impl fmt::Debug for PasswordEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordEntry")
            .field("label", &self.label)
            .field("secret", &"[REDACTED]")
            .field("primary", &self.primary)
            .finish()
    }
}

#[derive(Deserialize)]
struct RawEntry {
    #[serde(default)]
    label: String,
    #[serde(default)]
    primary: bool,
    #[serde(default)]
    password: RawPassword,
}

#[derive(Deserialize, Default)]
struct RawPassword {
    #[serde(default)]
    secret: String,
}

impl From<RawEntry> for PasswordEntry {
    fn from(raw: RawEntry) -> Self {
        PasswordEntry::new(raw.label, raw.password.secret, raw.primary)
    }
}

/// Parse a JSON password list. An empty string means "no passwords".
pub fn parse(input: &str) -> Result<Vec<PasswordEntry>, PasswordError> {
    if input.is_empty() {
        return Ok(Vec::new());
    }

    let raw: Vec<RawEntry> = serde_json::from_str(input).map_err(PasswordError::Parse)?;
    finish(raw)
}

/// Parse a password list that arrived as an already-decoded JSON value,
/// either a string holding JSON or the array itself.
pub fn parse_value(input: Value) -> Result<Vec<PasswordEntry>, PasswordError> {
    match input {
        Value::Null => Ok(Vec::new()),
        Value::String(s) => parse(&s),
        Value::Array(items) => {
            let raw: Vec<RawEntry> =
                serde_json::from_value(Value::Array(items)).map_err(PasswordError::Parse)?;
            finish(raw)
        }
        Value::Bool(_) => Err(PasswordError::Type("bool")),
        Value::Number(_) => Err(PasswordError::Type("number")),
        Value::Object(_) => Err(PasswordError::Type("object")),
    }
}

fn finish(raw: Vec<RawEntry>) -> Result<Vec<PasswordEntry>, PasswordError> {
    let entries: Vec<PasswordEntry> = raw.into_iter().map(PasswordEntry::from).collect();
    validate(&entries).map_err(PasswordError::Validation)?;
    Ok(entries)
}

fn validate(entries: &[PasswordEntry]) -> Result<(), FieldErrors> {
    let mut errs = FieldErrors::default();
    let mut seen = HashSet::new();
    let mut primaries = 0;

    for (i, entry) in entries.iter().enumerate() {
        if entry.primary {
            primaries += 1;
        }
        if let Some(reason) = outside_length(&entry.secret, SECRET_LEN) {
            errs.push(format!("[{i}].password.secret"), reason);
        }
        if let Some(reason) = outside_length(&entry.label, LABEL_LEN) {
            errs.push(format!("[{i}].label"), reason);
        }
        if !seen.insert(entry.label.as_str()) {
            errs.push(
                format!("[{i}].label"),
                format!("duplicated value, must be unique: {}", entry.label),
            );
        }
    }

    if primaries > 1 {
        errs.push("[].primary", MULTIPLE_PRIMARIES);
    }

    if errs.is_empty() { Ok(()) } else { Err(errs) }
}

fn outside_length(value: &str, (min, max): (usize, usize)) -> Option<String> {
    let len = value.chars().count();
    (len < min || len > max).then(|| format!("expected length {min}-{max}, got {len}"))
}
