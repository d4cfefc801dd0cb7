//! Run configuration: the submitted options, their schema, and the
//! artifacts generated from them for the bundle
//!
//! # Examples
//!
//! ```ignore
//! use bundle_launcher::config::{ConfigSchema, RunRequest};
//!
//! let request = RunRequest::from_pairs([("SESSION_ID", "abc"), ("AUTO_REACT", "yes")]);
//! let settings = ConfigSchema::default().merge(&request);
//! assert_eq!(settings.get("AUTO_REACT"), Some("false"));
//! ```

pub mod format;
pub mod materialize;

pub use format::{ArtifactFormat, EnvFile, ModuleFile};
pub use materialize::{ConfigMaterializer, MaterializedConfig};

use crate::errors::{LauncherError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Option every request must carry
pub const SESSION_ID: &str = "SESSION_ID";

/// Canonical boolean literals
pub const TRUE: &str = "true";
pub const FALSE: &str = "false";

/// Options submitted for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunRequest {
    options: BTreeMap<String, String>,
}

impl RunRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            options: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    /// Reject the request when `required_key` is absent or blank, or when
    /// any option name is not a plain identifier (`[A-Za-z_][A-Za-z0-9_]*`).
    pub fn validate(&self, required_key: &str) -> Result<()> {
        if let Some(bad) = self.options.keys().find(|key| !is_option_name(key)) {
            return Err(LauncherError::Validation(format!(
                "Invalid option name {:?}",
                bad
            )));
        }

        match self.get(required_key) {
            Some(value) if !value.trim().is_empty() => Ok(()),
            _ => Err(LauncherError::Validation(format!(
                "{} is required",
                required_key
            ))),
        }
    }
}

/// Whether `name` can be written to and read back from the flat file unchanged.
pub fn is_option_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Value type of a recognised option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Text,
    Flag,
}

/// One recognised option and its fallback value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSpec {
    pub key: String,
    pub default: String,
    pub kind: OptionKind,
}

impl OptionSpec {
    pub fn text(key: &str, default: &str) -> Self {
        Self {
            key: key.to_string(),
            default: default.to_string(),
            kind: OptionKind::Text,
        }
    }

    pub fn flag(key: &str, default: bool) -> Self {
        Self {
            key: key.to_string(),
            default: canonical_flag(if default { TRUE } else { FALSE }).to_string(),
            kind: OptionKind::Flag,
        }
    }
}

/// Recognised options, in the order they are emitted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSchema {
    options: Vec<OptionSpec>,
}

impl Default for ConfigSchema {
    fn default() -> Self {
        Self::new(vec![
            OptionSpec::text(SESSION_ID, ""),
            OptionSpec::text("MODE", "private"),
            OptionSpec::text("PREFIX", "."),
            OptionSpec::flag("AUTO_REACT", false),
            OptionSpec::text("ANTI_DEL_PATH", "inbox"),
            OptionSpec::flag("READ_MESSAGE", false),
            OptionSpec::flag("AUTO_READ_STATUS", false),
            OptionSpec::flag("AUTO_STATUS_REPLY", false),
            OptionSpec::flag("AUTOLIKESTATUS", false),
        ])
    }
}

impl ConfigSchema {
    pub fn new(options: Vec<OptionSpec>) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &[OptionSpec] {
        &self.options
    }

    pub fn kind_of(&self, key: &str) -> Option<OptionKind> {
        self.options.iter().find(|o| o.key == key).map(|o| o.kind)
    }

    /// Supplied values over defaults.
    ///
    /// Schema options come first in schema order, then unrecognised keys
    /// in lexical order. Empty submissions fall back to the default and
    /// flag values are canonicalised.
    pub fn merge(&self, request: &RunRequest) -> Settings {
        let mut settings = Settings::default();

        for spec in &self.options {
            let value = match request.get(&spec.key) {
                Some(v) if !v.is_empty() => v,
                _ => spec.default.as_str(),
            };
            let value = match spec.kind {
                OptionKind::Flag => canonical_flag(value).to_string(),
                OptionKind::Text => value.to_string(),
            };
            settings.push(&spec.key, value);
        }

        for (key, value) in request.options() {
            if self.kind_of(key).is_none() {
                settings.push(key, value.clone());
            }
        }

        settings
    }
}

/// Exactly `true` stays true; anything else is false.
pub fn canonical_flag(value: &str) -> &'static str {
    if value == TRUE {
        TRUE
    } else {
        FALSE
    }
}

/// Ordered, fully-resolved key/value pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Settings {
    entries: Vec<(String, String)>,
}

impl Settings {
    /// Append, replacing an earlier value for the same key in place.
    pub fn push(&mut self, key: &str, value: String) {
        if let Some((_, existing)) = self.entries.iter_mut().find(|(k, _)| k == key) {
            *existing = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Settings {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut settings = Settings::default();
        for (k, v) in iter {
            let key: String = k.into();
            settings.push(&key, v.into());
        }
        settings
    }
}
