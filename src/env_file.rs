//! Shell-style `export NAME=value` files and the cloud profile derived from them.

use crate::error::DeskError;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const PROFILE_NAME: &str = "PROFILE_NAME";
pub const PROJECT_ID: &str = "PROJECT_ID";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentBindings {
    vars: BTreeMap<String, String>,
}

impl EnvironmentBindings {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudProfile {
    pub profile_name: String,
    pub project_id: String,
}

pub fn load_environment(path: &Path) -> Result<EnvironmentBindings, DeskError> {
    if !path.exists() {
        return Err(DeskError::Config(format!(
            "environment file not found at {}",
            path.display()
        )));
    }
    let content = fs::read_to_string(path)?;
    let bindings = parse_environment(&content);
    tracing::info!(
        path = %path.display(),
        count = bindings.len(),
        "loaded environment file"
    );
    Ok(bindings)
}

pub fn parse_environment(content: &str) -> EnvironmentBindings {
    let mut bindings = EnvironmentBindings::default();
    for line in content.lines() {
        if let Some((name, value)) = parse_export_line(line) {
            bindings.insert(name, value);
        }
    }
    bindings
}

fn parse_export_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let rest = line.strip_prefix("export")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let (name, value) = rest.trim_start().split_once('=')?;
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((name.to_string(), unquote(value).to_string()))
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Fails with every absent or empty name at once.
pub fn validate_required(bindings: &EnvironmentBindings, names: &[&str]) -> Result<(), DeskError> {
    let missing: Vec<String> = names
        .iter()
        .filter(|name| {
            bindings
                .get(name)
                .map(|value| value.trim().is_empty())
                .unwrap_or(true)
        })
        .map(|name| name.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(DeskError::MissingEnvironment(missing))
    }
}

impl CloudProfile {
    pub fn from_bindings(bindings: &EnvironmentBindings) -> Result<Self, DeskError> {
        validate_required(bindings, &[PROFILE_NAME, PROJECT_ID])?;
        Ok(Self {
            profile_name: bindings.get(PROFILE_NAME).unwrap_or_default().to_string(),
            project_id: bindings.get(PROJECT_ID).unwrap_or_default().to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, DeskError> {
        let bindings = load_environment(path)?;
        Self::from_bindings(&bindings)
    }
}
