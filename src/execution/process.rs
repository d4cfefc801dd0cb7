//! Supervision of the single child process
//!
//! The supervisor owns one slot. Starting while the slot is occupied
//! stops the occupant first (Running → Stopping → Idle → Starting), so two
//! children are never alive at once. A child that exits on its own moves
//! the supervisor back to Idle; nothing is restarted automatically. Either
//! way the child's whole process group is killed once it ends.

use crate::errors::{LauncherError, Result};
use crate::execution::stream::{spawn_output_reader, LogBroadcaster, LogEvent, OutputStream};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// How long to wait for the output pipes to drain after the child is gone
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Child process description
#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    /// Program to execute
    pub program: String,
    /// Program arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Working directory
    pub cwd: Option<PathBuf>,
}

impl ProcessConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        // Own process group, so helpers the bundle spawns die with it.
        cmd.process_group(0);
        cmd
    }
}

/// Supervisor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorState::Idle => write!(f, "idle"),
            SupervisorState::Starting => write!(f, "starting"),
            SupervisorState::Running => write!(f, "running"),
            SupervisorState::Stopping => write!(f, "stopping"),
        }
    }
}

/// How the previous child ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitRecord {
    pub run_id: String,
    /// Absent when killed by a signal
    pub code: Option<i32>,
    /// Stopped by the supervisor rather than exiting on its own
    pub forced: bool,
    pub at: DateTime<Utc>,
}

/// Snapshot of the supervisor
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub state: SupervisorState,
    pub pid: Option<u32>,
    pub run_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_exit: Option<ExitRecord>,
}

struct StatusCell {
    generation: u64,
    status: RunStatus,
}

struct ChildSlot {
    generation: u64,
    stop_tx: Option<oneshot::Sender<()>>,
    monitor: JoinHandle<()>,
}

/// Owner of at most one live child process
pub struct ProcessSupervisor {
    broadcaster: LogBroadcaster,
    slot: tokio::sync::Mutex<Option<ChildSlot>>,
    status: Arc<Mutex<StatusCell>>,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("state", &self.state())
            .finish()
    }
}

fn lock_status(status: &Mutex<StatusCell>) -> MutexGuard<'_, StatusCell> {
    status.lock().unwrap_or_else(|poison| poison.into_inner())
}

impl ProcessSupervisor {
    pub fn new(broadcaster: LogBroadcaster) -> Self {
        Self {
            broadcaster,
            slot: tokio::sync::Mutex::new(None),
            status: Arc::new(Mutex::new(StatusCell {
                generation: 0,
                status: RunStatus {
                    state: SupervisorState::Idle,
                    pid: None,
                    run_id: None,
                    started_at: None,
                    last_exit: None,
                },
            })),
        }
    }

    pub fn broadcaster(&self) -> &LogBroadcaster {
        &self.broadcaster
    }

    pub fn state(&self) -> SupervisorState {
        lock_status(&self.status).status.state
    }

    pub fn status(&self) -> RunStatus {
        lock_status(&self.status).status.clone()
    }

    fn set_state(&self, state: SupervisorState) {
        let mut cell = lock_status(&self.status);
        cell.status.state = state;
        if state == SupervisorState::Idle {
            cell.status.pid = None;
        }
    }

    /// Start `config`, stopping any previous child first. Returns the new pid.
    ///
    /// Output from both pipes goes to the broadcaster; the exit is
    /// published as [`LogEvent::Exit`] once the output has drained.
    pub async fn start(&self, config: &ProcessConfig, run_id: &str) -> Result<u32> {
        let mut slot = self.slot.lock().await;

        if let Some(previous) = slot.take() {
            self.set_state(SupervisorState::Stopping);
            terminate(previous).await;
            self.set_state(SupervisorState::Idle);
        }

        self.set_state(SupervisorState::Starting);
        info!(
            "Starting {} {} (run {})",
            config.program,
            config.args.join(" "),
            run_id
        );

        let mut child = match config.command().spawn() {
            Ok(child) => child,
            Err(e) => {
                self.set_state(SupervisorState::Idle);
                return Err(LauncherError::Spawn(format!("{}: {}", config.program, e)));
            }
        };

        let Some(pid) = child.id() else {
            self.set_state(SupervisorState::Idle);
            return Err(LauncherError::Spawn(format!(
                "{} exited before it could be tracked",
                config.program
            )));
        };

        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_output_reader(
                out,
                OutputStream::Stdout,
                self.broadcaster.clone(),
            ));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_output_reader(
                err,
                OutputStream::Stderr,
                self.broadcaster.clone(),
            ));
        }

        // Running must be recorded before the monitor can observe an exit.
        let generation = {
            let mut cell = lock_status(&self.status);
            cell.generation += 1;
            cell.status.state = SupervisorState::Running;
            cell.status.pid = Some(pid);
            cell.status.run_id = Some(run_id.to_string());
            cell.status.started_at = Some(Utc::now());
            cell.generation
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor(
            child,
            pid,
            readers,
            stop_rx,
            MonitorContext {
                generation,
                run_id: run_id.to_string(),
                broadcaster: self.broadcaster.clone(),
                status: Arc::clone(&self.status),
            },
        ));

        *slot = Some(ChildSlot {
            generation,
            stop_tx: Some(stop_tx),
            monitor,
        });

        Ok(pid)
    }

    /// Forcibly stop the current child. Returns false if there was none alive.
    pub async fn stop(&self) -> bool {
        let mut slot = self.slot.lock().await;
        let Some(current) = slot.take() else {
            return false;
        };

        let was_live = {
            let cell = lock_status(&self.status);
            cell.generation == current.generation && cell.status.state == SupervisorState::Running
        };

        self.set_state(SupervisorState::Stopping);
        terminate(current).await;
        self.set_state(SupervisorState::Idle);
        was_live
    }
}

struct MonitorContext {
    generation: u64,
    run_id: String,
    broadcaster: LogBroadcaster,
    status: Arc<Mutex<StatusCell>>,
}

/// Ask the monitor to kill its child and wait until it has been reaped.
async fn terminate(mut slot: ChildSlot) {
    if let Some(tx) = slot.stop_tx.take() {
        // Err only means the child already exited.
        let _ = tx.send(());
    }
    if let Err(e) = (&mut slot.monitor).await {
        warn!("Child monitor for generation {} failed: {}", slot.generation, e);
    }
}

async fn monitor(
    mut child: Child,
    pid: u32,
    readers: Vec<JoinHandle<()>>,
    stop_rx: oneshot::Receiver<()>,
    ctx: MonitorContext,
) {
    let (code, forced) = tokio::select! {
        status = child.wait() => {
            // Helpers the child left behind in its group go with it.
            kill_group(pid);
            match status {
                Ok(status) => (status.code(), false),
                Err(e) => {
                    warn!("Waiting for child {} failed: {}", pid, e);
                    (None, false)
                }
            }
        },
        _ = stop_rx => {
            kill_group(pid);
            if let Err(e) = child.kill().await {
                debug!("Kill of child {} reported: {}", pid, e);
                let _ = child.wait().await;
            }
            (None, true)
        }
    };

    for mut reader in readers {
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut reader).await.is_err() {
            debug!("Output of child {} still open after exit, detaching", pid);
            reader.abort();
        }
    }

    match (code, forced) {
        (_, true) => info!("Child {} stopped (run {})", pid, ctx.run_id),
        (Some(code), false) => info!("Child {} exited with code {}", pid, code),
        (None, false) => info!("Child {} was killed by a signal", pid),
    }
    ctx.broadcaster.publish(LogEvent::Exit { code });

    let mut cell = lock_status(&ctx.status);
    cell.status.last_exit = Some(ExitRecord {
        run_id: ctx.run_id,
        code,
        forced,
        at: Utc::now(),
    });
    if cell.generation == ctx.generation && cell.status.state == SupervisorState::Running {
        cell.status.state = SupervisorState::Idle;
        cell.status.pid = None;
    }
}

fn kill_group(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        debug!("killpg({}) failed: {}", raw, e);
    }
}
