//! Launcher: the archive-to-running-process pipeline
//!
//! One launch runs, in order: request validation, workspace reset,
//! archive acquisition, extraction, bundle root discovery, config
//! materialization, entry file discovery and finally the supervised
//! start. Any failing stage aborts the launch and leaves the currently
//! running child (if any) untouched.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::archive::{ArchiveSource, ExtractorHandle, DEFAULT_ARCHIVE_NAME};
use crate::config::{ConfigMaterializer, ConfigSchema, RunRequest, SESSION_ID};
use crate::errors::{LauncherError, Result};
use crate::execution::stream::DEFAULT_SUBSCRIBER_CAPACITY;
use crate::execution::{
    require_entry_file, resolve_bundle_root, LogBroadcaster, ProcessConfig, ProcessSupervisor,
    RunStatus, Subscription, DEFAULT_ENTRY_CANDIDATES,
};
use crate::storage::Workspace;

/// Launcher configuration
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Scratch directory, wiped at the start of every run
    pub workspace_root: PathBuf,
    /// Flat settings file; lives outside the workspace so it survives resets
    pub settings_file: PathBuf,
    /// Recognised options and their defaults
    pub schema: ConfigSchema,
    /// Option that must be present and non-blank
    pub required_option: String,
    /// Entry files tried in order inside the bundle root
    pub entry_candidates: Vec<String>,
    /// Program that runs the entry file
    pub program: String,
    /// Arguments placed before the entry file
    pub program_args: Vec<String>,
    /// Password for encrypted archives
    pub archive_password: Option<String>,
    /// Archive location used when no upload is supplied
    pub remote_archive_url: Option<String>,
    /// Extractor override; discovered when absent
    pub extractor: Option<ExtractorHandle>,
    /// Name the archive is saved under
    pub archive_name: String,
    /// Per-subscriber queue depth
    pub subscriber_capacity: usize,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("/tmp/bundle-launcher/workspace"),
            settings_file: PathBuf::from("/tmp/bundle-launcher/config.env"),
            schema: ConfigSchema::default(),
            required_option: SESSION_ID.to_string(),
            entry_candidates: DEFAULT_ENTRY_CANDIDATES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            program: "node".to_string(),
            program_args: Vec::new(),
            archive_password: None,
            remote_archive_url: None,
            extractor: None,
            archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

impl LauncherConfig {
    /// Check the configuration before anything touches the disk
    pub fn validate(&self) -> Result<()> {
        if self.workspace_root.as_os_str().is_empty() {
            return Err(LauncherError::InvalidConfig(
                "Workspace root cannot be empty".to_string(),
            ));
        }

        if self.settings_file.starts_with(&self.workspace_root) {
            return Err(LauncherError::InvalidConfig(
                "Settings file must live outside the workspace".to_string(),
            ));
        }

        if self.entry_candidates.is_empty() {
            return Err(LauncherError::InvalidConfig(
                "At least one entry candidate is required".to_string(),
            ));
        }

        if self.program.is_empty() {
            return Err(LauncherError::InvalidConfig(
                "Program cannot be empty".to_string(),
            ));
        }

        if self.required_option.is_empty() {
            return Err(LauncherError::InvalidConfig(
                "Required option name cannot be empty".to_string(),
            ));
        }

        if self.archive_name.is_empty() || self.archive_name.contains(['/', '\\']) {
            return Err(LauncherError::InvalidConfig(format!(
                "Invalid archive name: {:?}",
                self.archive_name
            )));
        }

        Ok(())
    }
}

/// Builder pattern for launcher creation
pub struct LauncherBuilder {
    config: LauncherConfig,
}

impl Default for LauncherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LauncherBuilder {
    pub fn new() -> Self {
        Self {
            config: LauncherConfig::default(),
        }
    }

    /// Put the workspace and the settings file under one directory
    pub fn data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.config.workspace_root = dir.join("workspace");
        self.config.settings_file = dir.join("config.env");
        self
    }

    pub fn workspace_root(mut self, path: impl AsRef<Path>) -> Self {
        self.config.workspace_root = path.as_ref().to_path_buf();
        self
    }

    pub fn settings_file(mut self, path: impl AsRef<Path>) -> Self {
        self.config.settings_file = path.as_ref().to_path_buf();
        self
    }

    pub fn schema(mut self, schema: ConfigSchema) -> Self {
        self.config.schema = schema;
        self
    }

    pub fn required_option(mut self, key: &str) -> Self {
        self.config.required_option = key.to_string();
        self
    }

    pub fn entry_candidates<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.entry_candidates = names.into_iter().map(Into::into).collect();
        self
    }

    /// Program the entry file is handed to, with any leading arguments
    pub fn program<I, S>(mut self, program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.program = program.to_string();
        self.config.program_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn archive_password(mut self, password: Option<String>) -> Self {
        self.config.archive_password = password.filter(|p| !p.is_empty());
        self
    }

    pub fn remote_archive_url(mut self, url: Option<String>) -> Self {
        self.config.remote_archive_url = url.filter(|u| !u.is_empty());
        self
    }

    pub fn extractor(mut self, extractor: ExtractorHandle) -> Self {
        self.config.extractor = Some(extractor);
        self
    }

    pub fn archive_name(mut self, name: &str) -> Self {
        self.config.archive_name = name.to_string();
        self
    }

    pub fn subscriber_capacity(mut self, capacity: usize) -> Self {
        self.config.subscriber_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<Launcher> {
        self.config.validate()?;
        Ok(Launcher::new(self.config))
    }
}

/// Outcome of a successful launch
#[derive(Debug, Clone, Serialize)]
pub struct LaunchReport {
    pub run_id: String,
    pub pid: u32,
    pub bundle_root: PathBuf,
    pub entry_file: PathBuf,
    pub settings_file: PathBuf,
    pub module_file: PathBuf,
}

impl LaunchReport {
    pub fn message(&self) -> String {
        format!(
            "Bundle extracted and started: {} (pid {}). Open the log stream to follow its output.",
            self.entry_file.display(),
            self.pid
        )
    }
}

/// Stages that ran before the supervisor takes over
struct PreparedBundle {
    bundle_root: PathBuf,
    entry_file: PathBuf,
    settings_file: PathBuf,
    module_file: PathBuf,
}

/// Archive-to-process pipeline with a single supervised child
pub struct Launcher {
    config: LauncherConfig,
    workspace: Mutex<Workspace>,
    materializer: ConfigMaterializer,
    supervisor: ProcessSupervisor,
    latest_ticket: AtomicU64,
}

impl Launcher {
    fn new(config: LauncherConfig) -> Self {
        let broadcaster = LogBroadcaster::new(config.subscriber_capacity);
        Self {
            workspace: Mutex::new(Workspace::new(&config.workspace_root)),
            materializer: ConfigMaterializer::new(config.schema.clone()),
            supervisor: ProcessSupervisor::new(broadcaster),
            latest_ticket: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn broadcaster(&self) -> &LogBroadcaster {
        self.supervisor.broadcaster()
    }

    /// Join the log stream; nothing emitted before this call is replayed.
    pub fn subscribe(&self) -> Subscription {
        self.broadcaster().subscribe()
    }

    pub fn status(&self) -> RunStatus {
        self.supervisor.status()
    }

    /// The configured remote source, if any
    pub fn remote_source(&self) -> Option<ArchiveSource> {
        self.config
            .remote_archive_url
            .as_ref()
            .map(|url| ArchiveSource::remote(url.clone()))
    }

    /// Run the whole pipeline for `request` and start the bundle.
    ///
    /// Launches own the workspace one at a time, from the reset until
    /// their child is spawned. A newer launch accepted while this one is
    /// still preparing wins: this one finishes its stages, then reports
    /// [`LauncherError::Superseded`] without touching the running child.
    pub async fn launch(&self, request: RunRequest, source: ArchiveSource) -> Result<LaunchReport> {
        request.validate(&self.config.required_option)?;

        let ticket = self.latest_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let run_id = Uuid::new_v4().to_string();
        info!("Launch {} accepted ({:?})", run_id, source);

        // Held until the child is spawned: the next reset must not run
        // under a bundle that is about to start.
        let workspace = self.workspace.lock().await;
        let prepared = self.prepare(&workspace, &request, &source).await?;

        if self.latest_ticket.load(Ordering::SeqCst) != ticket {
            warn!("Launch {} superseded, discarding its bundle", run_id);
            return Err(LauncherError::Superseded);
        }

        let process = ProcessConfig::new(&self.config.program)
            .args(self.config.program_args.iter().cloned())
            .arg(prepared.entry_file.to_string_lossy())
            .cwd(&prepared.bundle_root);

        let pid = self.supervisor.start(&process, &run_id).await?;
        drop(workspace);

        Ok(LaunchReport {
            run_id,
            pid,
            bundle_root: prepared.bundle_root,
            entry_file: prepared.entry_file,
            settings_file: prepared.settings_file,
            module_file: prepared.module_file,
        })
    }

    /// Launch with the configured remote archive.
    pub async fn launch_remote(&self, request: RunRequest) -> Result<LaunchReport> {
        request.validate(&self.config.required_option)?;
        let source = self.remote_source().ok_or_else(|| {
            LauncherError::Acquisition(
                "No archive payload present and no remote archive configured".to_string(),
            )
        })?;
        self.launch(request, source).await
    }

    /// Forcibly stop the running bundle. Returns false if nothing was running.
    pub async fn stop(&self) -> bool {
        self.supervisor.stop().await
    }

    async fn prepare(
        &self,
        workspace: &Workspace,
        request: &RunRequest,
        source: &ArchiveSource,
    ) -> Result<PreparedBundle> {
        let ws = workspace.clone();
        tokio::task::spawn_blocking(move || ws.reset())
            .await
            .map_err(|e| LauncherError::Workspace(format!("Reset task failed: {}", e)))??;

        let archive = source
            .acquire(workspace.download_dir(), &self.config.archive_name)
            .await?;

        let extractor = match &self.config.extractor {
            Some(handle) => handle,
            None => ExtractorHandle::shared(),
        };
        extractor
            .extract(
                &archive,
                workspace.extract_dir(),
                self.config.archive_password.as_deref(),
            )
            .await?;

        let bundle_root = resolve_bundle_root(workspace.extract_dir())?;
        let materialized =
            self.materializer
                .materialize(request, &self.config.settings_file, &bundle_root)?;
        let entry_file = require_entry_file(&bundle_root, self.config.entry_candidates.as_slice())?;

        info!(
            "Bundle ready at {} (entry {})",
            bundle_root.display(),
            entry_file.display()
        );

        Ok(PreparedBundle {
            bundle_root,
            entry_file,
            settings_file: materialized.flat_path,
            module_file: materialized.structured_path,
        })
    }
}

/// Shared handle used by the binaries
pub type SharedLauncher = Arc<Launcher>;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_launcher_config_default() {
        let config = LauncherConfig::default();
        assert_eq!(config.required_option, SESSION_ID);
        assert_eq!(config.entry_candidates, vec!["start.js", "index.js"]);
        assert_eq!(config.program, "node");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_candidates() {
        let config = LauncherConfig {
            entry_candidates: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_settings_inside_workspace() {
        let config = LauncherConfig {
            workspace_root: PathBuf::from("/tmp/ws"),
            settings_file: PathBuf::from("/tmp/ws/config.env"),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("outside the workspace"));
    }

    #[test]
    fn test_validate_rejects_bad_archive_name() {
        let config = LauncherConfig {
            archive_name: "../escape.zip".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_data_dir() {
        let tmp = tempdir().unwrap();
        let launcher = LauncherBuilder::new().data_dir(tmp.path()).build().unwrap();
        assert_eq!(launcher.config().workspace_root, tmp.path().join("workspace"));
        assert_eq!(launcher.config().settings_file, tmp.path().join("config.env"));
        // Nothing is created until a launch runs.
        assert!(!tmp.path().join("workspace").exists());
    }

    #[test]
    fn test_builder_filters_empty_secrets() {
        let launcher = LauncherBuilder::new()
            .archive_password(Some(String::new()))
            .remote_archive_url(Some(String::new()))
            .build()
            .unwrap();
        assert!(launcher.config().archive_password.is_none());
        assert!(launcher.remote_source().is_none());
    }

    #[test]
    fn test_builder_program_and_candidates() {
        let launcher = LauncherBuilder::new()
            .program("sh", ["-e"])
            .entry_candidates(["start.sh"])
            .build()
            .unwrap();
        assert_eq!(launcher.config().program, "sh");
        assert_eq!(launcher.config().program_args, vec!["-e"]);
        assert_eq!(launcher.config().entry_candidates, vec!["start.sh"]);
    }

    #[tokio::test]
    async fn missing_session_id_has_no_side_effects() {
        let tmp = tempdir().unwrap();
        let launcher = LauncherBuilder::new().data_dir(tmp.path()).build().unwrap();

        let err = launcher
            .launch(RunRequest::new().set("MODE", "public"), ArchiveSource::upload(b"zip".to_vec()))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "validation");
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
        assert_eq!(launcher.status().state, crate::execution::SupervisorState::Idle);
    }

    #[tokio::test]
    async fn launch_remote_without_url_is_acquisition_error() {
        let tmp = tempdir().unwrap();
        let launcher = LauncherBuilder::new().data_dir(tmp.path()).build().unwrap();

        let err = launcher
            .launch_remote(RunRequest::new().set(SESSION_ID, "abc"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "acquisition");
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn report_message_names_entry_and_pid() {
        let report = LaunchReport {
            run_id: "r".to_string(),
            pid: 42,
            bundle_root: PathBuf::from("/w/extracted/bot"),
            entry_file: PathBuf::from("/w/extracted/bot/index.js"),
            settings_file: PathBuf::from("/w/config.env"),
            module_file: PathBuf::from("/w/extracted/bot/config.js"),
        };
        let msg = report.message();
        assert!(msg.contains("index.js"));
        assert!(msg.contains("pid 42"));
    }
}
