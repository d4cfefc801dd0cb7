//! Writing the run configuration to disk
//!
//! The flat file is written first; the structured module in the bundle
//! root is then regenerated by reading that flat file back. The module is
//! never built from the in-memory request, so edits made to the flat file
//! between runs and any escaping applied on the way through are always
//! reflected in what the bundle sees.

use super::format::{ArtifactFormat, EnvFile, ModuleFile};
use super::{ConfigSchema, RunRequest, Settings};
use crate::errors::{LauncherError, Result};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// Paths and values produced by one materialization
#[derive(Debug, Clone)]
pub struct MaterializedConfig {
    pub flat_path: PathBuf,
    pub structured_path: PathBuf,
    pub settings: Settings,
}

/// Schema-agnostic writer of config artifacts
pub struct ConfigMaterializer {
    schema: ConfigSchema,
    flat: Box<dyn ArtifactFormat>,
    structured: Box<dyn ArtifactFormat>,
}

impl std::fmt::Debug for ConfigMaterializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigMaterializer")
            .field("schema", &self.schema)
            .field("flat", &self.flat.file_name())
            .field("structured", &self.structured.file_name())
            .finish()
    }
}

impl ConfigMaterializer {
    /// `config.env` as the flat form, `config.js` as the structured form
    pub fn new(schema: ConfigSchema) -> Self {
        Self::with_formats(schema, Box::new(EnvFile), Box::new(ModuleFile))
    }

    pub fn with_formats(
        schema: ConfigSchema,
        flat: Box<dyn ArtifactFormat>,
        structured: Box<dyn ArtifactFormat>,
    ) -> Self {
        Self {
            schema,
            flat,
            structured,
        }
    }

    pub fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    pub fn flat_format(&self) -> &dyn ArtifactFormat {
        self.flat.as_ref()
    }

    pub fn structured_format(&self) -> &dyn ArtifactFormat {
        self.structured.as_ref()
    }

    /// Merge `request` over the defaults, write the flat file at
    /// `flat_path`, then regenerate the structured artifact inside
    /// `bundle_root` from it.
    pub fn materialize(
        &self,
        request: &RunRequest,
        flat_path: &Path,
        bundle_root: &Path,
    ) -> Result<MaterializedConfig> {
        let settings = self.schema.merge(request);
        self.write_flat(&settings, flat_path)?;
        let (structured_path, settings) = self.regenerate(flat_path, bundle_root)?;

        Ok(MaterializedConfig {
            flat_path: flat_path.to_path_buf(),
            structured_path,
            settings,
        })
    }

    pub fn write_flat(&self, settings: &Settings, flat_path: &Path) -> Result<()> {
        if let Some(parent) = flat_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    LauncherError::ConfigWrite(format!(
                        "Failed to create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        fs::write(flat_path, self.flat.render(settings)).map_err(|e| {
            LauncherError::ConfigWrite(format!("Failed to write {}: {}", flat_path.display(), e))
        })?;
        debug!("Wrote {}", flat_path.display());
        Ok(())
    }

    /// Rebuild the structured artifact in `bundle_root` from the flat file.
    ///
    /// The flat file goes through the same merge as a request: blank or
    /// missing options fall back to their defaults and flags are
    /// canonicalised again, so a hand-edited `yes` still reaches the bundle
    /// as `false`.
    pub fn regenerate(&self, flat_path: &Path, bundle_root: &Path) -> Result<(PathBuf, Settings)> {
        let text = fs::read_to_string(flat_path).map_err(|e| {
            LauncherError::ConfigWrite(format!("Failed to read {}: {}", flat_path.display(), e))
        })?;

        let parsed = self.flat.parse(&text).map_err(|e| {
            LauncherError::ConfigWrite(format!("Unreadable {}: {}", flat_path.display(), e))
        })?;
        let settings = self
            .schema
            .merge(&RunRequest::from_pairs(parsed.entries().iter().cloned()));

        let structured_path = bundle_root.join(self.structured.file_name());
        fs::write(&structured_path, self.structured.render(&settings)).map_err(|e| {
            LauncherError::ConfigWrite(format!(
                "Failed to write {}: {}",
                structured_path.display(),
                e
            ))
        })?;
        debug!("Wrote {}", structured_path.display());

        Ok((structured_path, settings))
    }
}

impl Default for ConfigMaterializer {
    fn default() -> Self {
        Self::new(ConfigSchema::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SESSION_ID;
    use tempfile::tempdir;

    fn request() -> RunRequest {
        RunRequest::from_pairs([
            (SESSION_ID, "Byc#x`y\\z"),
            ("MODE", "public"),
            ("PREFIX", ""),
            ("AUTO_REACT", "true"),
            ("READ_MESSAGE", "yes"),
        ])
    }

    #[test]
    fn round_trip_matches_normalized_request() {
        let tmp = tempdir().unwrap();
        let bundle = tmp.path().join("bundle");
        fs::create_dir_all(&bundle).unwrap();
        let materializer = ConfigMaterializer::default();

        let out = materializer
            .materialize(&request(), &tmp.path().join("config.env"), &bundle)
            .unwrap();
        assert_eq!(out.structured_path, bundle.join("config.js"));

        let expected = materializer.schema().merge(&request());
        let module_text = fs::read_to_string(&out.structured_path).unwrap();
        let structured = ModuleFile.parse(&module_text).unwrap();

        assert_eq!(structured, expected);
        assert_eq!(out.settings, expected);
        assert_eq!(structured.get("PREFIX"), Some("."));
        assert_eq!(structured.get("AUTO_REACT"), Some("true"));
        assert_eq!(structured.get("READ_MESSAGE"), Some("false"));
        assert_eq!(structured.get(SESSION_ID), Some("Byc#x`y\\z"));
    }

    #[test]
    fn regenerate_picks_up_hand_edits() {
        let tmp = tempdir().unwrap();
        let flat = tmp.path().join("config.env");
        let materializer = ConfigMaterializer::default();
        materializer
            .materialize(&request(), &flat, tmp.path())
            .unwrap();

        let edited = fs::read_to_string(&flat)
            .unwrap()
            .replace("MODE=public", "MODE=groups")
            .replace("AUTO_REACT=true", "AUTO_REACT=yes");
        fs::write(&flat, edited).unwrap();

        let (path, settings) = materializer.regenerate(&flat, tmp.path()).unwrap();
        assert_eq!(settings.get("MODE"), Some("groups"));
        assert_eq!(settings.get("AUTO_REACT"), Some("false"));
        let structured = ModuleFile
            .parse(&fs::read_to_string(path).unwrap())
            .unwrap();
        assert_eq!(structured.get("MODE"), Some("groups"));
    }

    #[test]
    fn regenerate_restores_defaults_for_blanked_values() {
        let tmp = tempdir().unwrap();
        let flat = tmp.path().join("config.env");
        let materializer = ConfigMaterializer::default();
        materializer
            .materialize(&request(), &flat, tmp.path())
            .unwrap();

        let edited = fs::read_to_string(&flat)
            .unwrap()
            .replace("MODE=public", "MODE=")
            .replace("ANTI_DEL_PATH=inbox\n", "");
        fs::write(&flat, edited).unwrap();

        let (path, settings) = materializer.regenerate(&flat, tmp.path()).unwrap();
        assert_eq!(settings.get("MODE"), Some("private"));
        assert_eq!(settings.get("ANTI_DEL_PATH"), Some("inbox"));
        let structured = ModuleFile
            .parse(&fs::read_to_string(path).unwrap())
            .unwrap();
        assert_eq!(structured.get("MODE"), Some("private"));
    }

    #[test]
    fn malformed_flat_file_is_a_config_write_error() {
        let tmp = tempdir().unwrap();
        let flat = tmp.path().join("config.env");
        fs::write(&flat, "SESSION_ID=abc\nthis line has no separator\n").unwrap();

        let err = ConfigMaterializer::default()
            .regenerate(&flat, tmp.path())
            .unwrap_err();
        assert_eq!(err.kind(), "config_write");
        assert!(!tmp.path().join("config.js").exists());
    }

    #[test]
    fn flat_file_lives_outside_the_bundle() {
        let tmp = tempdir().unwrap();
        let flat = tmp.path().join("state/config.env");
        let bundle = tmp.path().join("bundle");
        fs::create_dir_all(&bundle).unwrap();

        ConfigMaterializer::default()
            .materialize(&request(), &flat, &bundle)
            .unwrap();
        assert!(flat.exists());
        assert!(!bundle.join("config.env").exists());
        assert!(bundle.join("config.js").exists());
    }

    #[test]
    fn unwritable_bundle_root_is_a_config_write_error() {
        let tmp = tempdir().unwrap();
        let err = ConfigMaterializer::default()
            .materialize(
                &request(),
                &tmp.path().join("config.env"),
                &tmp.path().join("missing-bundle"),
            )
            .unwrap_err();
        assert_eq!(err.kind(), "config_write");
    }
}
