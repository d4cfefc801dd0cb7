//! Artifact formats the settings can be written in

use super::Settings;
use crate::errors::{LauncherError, Result};
use std::iter::Peekable;
use std::str::Chars;

/// A textual representation of [`Settings`]
pub trait ArtifactFormat: Send + Sync {
    /// File name the artifact is stored under
    fn file_name(&self) -> &str;

    fn render(&self, settings: &Settings) -> String;

    fn parse(&self, text: &str) -> Result<Settings>;
}

/// Flat `KEY=value` lines, the hand-editable form
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvFile;

impl ArtifactFormat for EnvFile {
    fn file_name(&self) -> &str {
        "config.env"
    }

    fn render(&self, settings: &Settings) -> String {
        let mut out = String::new();
        for (key, value) in settings.entries() {
            // One line per entry; the flat form cannot carry line breaks.
            let value = value.replace("\r\n", " ").replace(['\r', '\n'], " ");
            out.push_str(key);
            out.push('=');
            out.push_str(&value);
            out.push('\n');
        }
        out
    }

    fn parse(&self, text: &str) -> Result<Settings> {
        let mut settings = Settings::default();
        for (idx, line) in text.lines().enumerate() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                LauncherError::InvalidConfig(format!(
                    "{} line {}: expected KEY=value",
                    self.file_name(),
                    idx + 1
                ))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(LauncherError::InvalidConfig(format!(
                    "{} line {}: empty key",
                    self.file_name(),
                    idx + 1
                )));
            }
            settings.push(key, value.to_string());
        }
        Ok(settings)
    }
}

/// CommonJS module read by the bundle at startup
///
/// ```text
/// module.exports = {
///   SESSION_ID: `abc`,
///   "custom-key": `value`,
/// };
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuleFile;

const MODULE_HEADER: &str = "module.exports = {";
const MODULE_FOOTER: &str = "};";

impl ArtifactFormat for ModuleFile {
    fn file_name(&self) -> &str {
        "config.js"
    }

    fn render(&self, settings: &Settings) -> String {
        let mut out = String::from(MODULE_HEADER);
        out.push('\n');
        for (key, value) in settings.entries() {
            out.push_str("  ");
            out.push_str(&module_key(key));
            out.push_str(": `");
            out.push_str(&escape_template(value));
            out.push_str("`,\n");
        }
        out.push_str(MODULE_FOOTER);
        out.push('\n');
        out
    }

    fn parse(&self, text: &str) -> Result<Settings> {
        let body = text
            .trim()
            .strip_prefix(MODULE_HEADER)
            .and_then(|rest| rest.strip_suffix(MODULE_FOOTER))
            .ok_or_else(|| {
                LauncherError::InvalidConfig("config.js: not a settings module".to_string())
            })?;

        let mut settings = Settings::default();
        let mut chars = body.chars().peekable();

        loop {
            skip_whitespace(&mut chars);
            if chars.peek().is_none() {
                break;
            }
            let key = read_key(&mut chars)?;
            skip_whitespace(&mut chars);
            expect(&mut chars, ':')?;
            skip_whitespace(&mut chars);
            expect(&mut chars, '`')?;
            let value = read_template(&mut chars)?;
            skip_whitespace(&mut chars);
            expect(&mut chars, ',')?;
            settings.push(&key, value);
        }

        Ok(settings)
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn module_key(key: &str) -> String {
    if is_identifier(key) {
        key.to_string()
    } else {
        serde_json::Value::String(key.to_string()).to_string()
    }
}

/// Escape text for a template literal body.
fn escape_template(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '`' => out.push_str("\\`"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            _ => out.push(c),
        }
    }
    out
}

fn syntax_error(what: &str) -> LauncherError {
    LauncherError::InvalidConfig(format!("config.js: {}", what))
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn expect(chars: &mut Peekable<Chars<'_>>, wanted: char) -> Result<()> {
    match chars.next() {
        Some(c) if c == wanted => Ok(()),
        Some(c) => Err(syntax_error(&format!("expected '{}', found '{}'", wanted, c))),
        None => Err(syntax_error(&format!("expected '{}', found end of input", wanted))),
    }
}

fn read_key(chars: &mut Peekable<Chars<'_>>) -> Result<String> {
    if chars.peek() == Some(&'"') {
        let mut raw = String::from('"');
        chars.next();
        let mut escaped = false;
        for c in chars.by_ref() {
            raw.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                return serde_json::from_str::<String>(&raw)
                    .map_err(|e| syntax_error(&format!("bad quoted key: {}", e)));
            }
        }
        return Err(syntax_error("unterminated key"));
    }

    let mut key = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
            key.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if key.is_empty() {
        return Err(syntax_error("expected a key"));
    }
    Ok(key)
}

fn read_template(chars: &mut Peekable<Chars<'_>>) -> Result<String> {
    let mut value = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => value.push(next),
                None => return Err(syntax_error("dangling escape")),
            },
            '`' => return Ok(value),
            _ => value.push(c),
        }
    }
    Err(syntax_error("unterminated value"))
}
