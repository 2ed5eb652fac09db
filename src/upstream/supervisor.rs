//! Backend process supervision.
//!
//! # Responsibilities
//! - Launch the backend executable as a child process
//! - Forward the child's output to the bridge's logs
//! - Track the process state and publish it through a watch channel
//! - Decide readiness (active probe or fixed warm-up)
//! - Apply the restart policy after an unexpected exit
//! - Terminate the child on shutdown (SIGTERM, then SIGKILL after a grace period)
//!
//! # State Transitions
//! ```text
//! NotStarted → Starting: launch()
//! Starting   → Running:  readiness confirmed
//! Starting   → Exited:   child exits before it is ready
//! Running    → Exited:   child exits
//! Exited     → Starting: restart policy relaunches (policy "backoff" only)
//! ```

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::{
    BackendConfig, BridgeConfig, ReadinessConfig, ReadinessStrategy, RestartConfig, RestartPolicyKind,
};
use crate::health::probe::ReadinessProbe;
use crate::observability::metrics;
use crate::resilience::Backoff;

/// Lifecycle state of the backend process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BackendProcessState {
    NotStarted,
    Starting,
    Running,
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
}

impl BackendProcessState {
    /// `true` while a child process exists.
    pub fn is_alive(&self) -> bool {
        matches!(self, BackendProcessState::Starting | BackendProcessState::Running)
    }

    pub fn label(&self) -> &'static str {
        match self {
            BackendProcessState::NotStarted => "not_started",
            BackendProcessState::Starting => "starting",
            BackendProcessState::Running => "running",
            BackendProcessState::Exited { .. } => "exited",
        }
    }
}

/// The backend could not be brought up.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to start backend '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend exited during startup (code {code:?}, signal {signal:?})")]
    ExitedDuringStartup {
        code: Option<i32>,
        signal: Option<i32>,
    },

    #[error("backend not accepting requests after {attempts} probe attempts")]
    NotReady { attempts: u32 },

    #[error("backend has not been launched")]
    NotLaunched,

    #[error("backend is being terminated")]
    Terminated,

    #[error("readiness probe unavailable: {0}")]
    Probe(String),
}

/// What to do when the backend exits on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Never,
    /// Relaunch after a backoff delay. Gives up after `max_restarts`
    /// restarts in a row that never reached readiness.
    Backoff { max_restarts: u32, backoff: Backoff },
}

impl From<&RestartConfig> for RestartPolicy {
    fn from(config: &RestartConfig) -> Self {
        match config.policy {
            RestartPolicyKind::Never => RestartPolicy::Never,
            RestartPolicyKind::Backoff => RestartPolicy::Backoff {
                max_restarts: config.max_restarts,
                backoff: Backoff::from(config),
            },
        }
    }
}

/// Owner of the backend child process.
pub struct Supervisor {
    backend: BackendConfig,
    readiness: ReadinessConfig,
    restart: RestartPolicy,
    grace_period: Duration,
    state: watch::Sender<BackendProcessState>,
    generation: watch::Sender<u64>,
    launches: AtomicUsize,
    restarts: AtomicU32,
    pid: AtomicU32,
    workspace: Mutex<Option<PathBuf>>,
    launch_lock: tokio::sync::Mutex<()>,
    terminate: CancellationToken,
}

impl Supervisor {
    pub fn new(config: &BridgeConfig) -> Self {
        let (state, _) = watch::channel(BackendProcessState::NotStarted);
        let (generation, _) = watch::channel(0);
        Self {
            backend: config.backend.clone(),
            readiness: config.readiness.clone(),
            restart: RestartPolicy::from(&config.restart),
            grace_period: Duration::from_millis(config.shutdown.grace_period_ms),
            state,
            generation,
            launches: AtomicUsize::new(0),
            restarts: AtomicU32::new(0),
            pid: AtomicU32::new(0),
            workspace: Mutex::new(None),
            launch_lock: tokio::sync::Mutex::new(()),
            terminate: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> BackendProcessState {
        *self.state.borrow()
    }

    /// Watch state transitions as they happen.
    pub fn subscribe(&self) -> watch::Receiver<BackendProcessState> {
        self.state.subscribe()
    }

    /// Incremented on every spawn; lets clients notice a relaunched backend.
    pub fn generation(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Number of processes spawned so far.
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state().is_alive()
    }

    pub fn termination_requested(&self) -> bool {
        self.terminate.is_cancelled()
    }

    /// Start the backend for `workspace` and return without waiting for it.
    ///
    /// A no-op while a child is alive, so concurrent or repeated calls never
    /// produce a second process.
    pub async fn launch(self: &Arc<Self>, workspace: &Path) -> Result<(), LaunchError> {
        let _guard = self.launch_lock.lock().await;

        if self.terminate.is_cancelled() {
            return Err(LaunchError::Terminated);
        }
        if self.state().is_alive() {
            tracing::debug!(pid = ?self.pid(), "Backend already running, not launching again");
            return Ok(());
        }

        if let Ok(mut slot) = self.workspace.lock() {
            *slot = Some(workspace.to_path_buf());
        }

        let child = self.spawn_child(workspace)?;
        tokio::spawn(self.clone().monitor(child));
        Ok(())
    }

    fn spawn_child(&self, workspace: &Path) -> Result<Child, LaunchError> {
        let args = self.backend.resolved_args(workspace);
        let working_dir = self.backend.resolved_working_dir(workspace);

        self.state.send_replace(BackendProcessState::Starting);

        let spawned = Command::new(&self.backend.program)
            .args(&args)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                tracing::error!(
                    program = %self.backend.program,
                    working_dir = %working_dir.display(),
                    error = %source,
                    "Failed to launch backend"
                );
                self.state.send_replace(BackendProcessState::Exited {
                    code: None,
                    signal: None,
                });
                return Err(LaunchError::Spawn {
                    program: self.backend.program.clone(),
                    source,
                });
            }
        };

        let pid = child.id().unwrap_or_default();
        self.pid.store(pid, Ordering::SeqCst);
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.generation.send_modify(|g| *g += 1);
        metrics::record_launch();

        tracing::info!(
            pid,
            program = %self.backend.program,
            args = ?args,
            working_dir = %working_dir.display(),
            port = self.backend.port,
            "Backend process launched"
        );

        forward_output(&mut child, pid);
        Ok(child)
    }

    /// Wait until the backend accepts requests.
    pub async fn await_ready(&self) -> Result<(), LaunchError> {
        match self.state() {
            BackendProcessState::NotStarted => return Err(LaunchError::NotLaunched),
            BackendProcessState::Running => return Ok(()),
            BackendProcessState::Exited { code, signal } => {
                return Err(LaunchError::ExitedDuringStartup { code, signal })
            }
            BackendProcessState::Starting => {}
        }

        match self.readiness.strategy {
            ReadinessStrategy::FixedDelay => self.await_warmup().await,
            ReadinessStrategy::Probe => self.await_probe().await,
        }
    }

    async fn await_warmup(&self) -> Result<(), LaunchError> {
        let warmup = Duration::from_millis(self.readiness.warmup_ms);
        let mut rx = self.subscribe();

        tokio::select! {
            _ = tokio::time::sleep(warmup) => {}
            state = exited(&mut rx) => return Err(startup_exit(state)),
            _ = self.terminate.cancelled() => return Err(LaunchError::Terminated),
        }

        self.mark_running();
        Ok(())
    }

    async fn await_probe(&self) -> Result<(), LaunchError> {
        let url = self.backend.probe_url(&self.readiness.probe_path);
        let timeout = Duration::from_millis(self.readiness.probe_timeout_ms);
        let probe = ReadinessProbe::new(url, timeout).map_err(|e| LaunchError::Probe(e.to_string()))?;
        let backoff = Backoff::from(&self.readiness);
        let mut rx = self.subscribe();

        for attempt in 1..=self.readiness.max_attempts {
            if let BackendProcessState::Exited { code, signal } = self.state() {
                return Err(LaunchError::ExitedDuringStartup { code, signal });
            }

            if probe.check().await {
                tracing::debug!(url = %probe.url(), attempt, "Backend answered readiness probe");
                self.mark_running();
                return Ok(());
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff.delay(attempt)) => {}
                state = exited(&mut rx) => return Err(startup_exit(state)),
                _ = self.terminate.cancelled() => return Err(LaunchError::Terminated),
            }
        }

        tracing::error!(
            url = %probe.url(),
            attempts = self.readiness.max_attempts,
            "Backend never answered readiness probe"
        );
        Err(LaunchError::NotReady {
            attempts: self.readiness.max_attempts,
        })
    }

    fn mark_running(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == BackendProcessState::Starting {
                *state = BackendProcessState::Running;
                true
            } else {
                false
            }
        });
        if changed {
            self.restarts.store(0, Ordering::SeqCst);
            metrics::record_backend_up(true);
            tracing::info!(pid = ?self.pid(), "Backend ready");
        }
    }

    /// Ask the child to exit. SIGTERM is delivered before this returns; the
    /// monitor escalates to SIGKILL after the grace period. Disables restarts.
    pub fn terminate(&self) {
        if self.terminate.is_cancelled() {
            return;
        }
        self.terminate.cancel();

        let Some(pid) = self.pid() else {
            tracing::debug!("No backend process to terminate");
            return;
        };

        #[cfg(unix)]
        if let Err(e) = send_sigterm(pid) {
            tracing::warn!(pid, error = %e, "Failed to signal backend process");
        }

        tracing::info!(pid, "Backend termination requested");
    }

    /// Wait for the child to be gone, up to `limit`.
    pub async fn wait_for_exit(&self, limit: Duration) -> Option<BackendProcessState> {
        let mut rx = self.subscribe();
        tokio::time::timeout(limit, async {
            let seen = rx.wait_for(|state| !state.is_alive()).await.map(|state| *state);
            seen.unwrap_or_else(|_| self.state())
        })
        .await
        .ok()
    }

    async fn monitor(self: Arc<Self>, mut child: Child) {
        loop {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = self.terminate.cancelled() => self.stop_child(&mut child).await,
            };

            let (code, signal) = match &status {
                Ok(status) => exit_parts(status),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to observe backend exit");
                    (None, None)
                }
            };
            let pid = self.pid.swap(0, Ordering::SeqCst);
            self.state.send_replace(BackendProcessState::Exited { code, signal });
            metrics::record_backend_up(false);

            if self.terminate.is_cancelled() {
                tracing::info!(pid, exit_code = ?code, signal = ?signal, "Backend process stopped");
                return;
            }
            tracing::warn!(pid, exit_code = ?code, signal = ?signal, "Backend process exited");

            let RestartPolicy::Backoff { max_restarts, backoff } = self.restart else {
                return;
            };
            let attempt = self.restarts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > max_restarts {
                tracing::error!(max_restarts, "Backend keeps exiting, giving up on restarts");
                return;
            }

            let delay = backoff.delay(attempt);
            tracing::info!(attempt, delay = ?delay, "Restarting backend");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.terminate.cancelled() => return,
            }

            let workspace = self
                .workspace
                .lock()
                .ok()
                .and_then(|slot| slot.clone())
                .unwrap_or_else(|| self.backend.workspace.clone());

            let next = {
                let _guard = self.launch_lock.lock().await;
                if self.terminate.is_cancelled() || self.state().is_alive() {
                    return;
                }
                self.spawn_child(&workspace)
            };
            child = match next {
                Ok(child) => child,
                Err(e) => {
                    tracing::error!(error = %e, "Backend restart failed");
                    return;
                }
            };

            let supervisor = self.clone();
            tokio::spawn(async move {
                if let Err(e) = supervisor.await_ready().await {
                    tracing::warn!(error = %e, "Restarted backend did not become ready");
                }
            });
        }
    }

    async fn stop_child(&self, child: &mut Child) -> std::io::Result<ExitStatus> {
        #[cfg(not(unix))]
        child.start_kill()?;

        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(
                    grace_period = ?self.grace_period,
                    "Backend ignored termination request, killing"
                );
                child.start_kill()?;
                child.wait().await
            }
        }
    }
}

async fn exited(rx: &mut watch::Receiver<BackendProcessState>) -> BackendProcessState {
    let seen = rx
        .wait_for(|state| matches!(state, BackendProcessState::Exited { .. }))
        .await
        .map(|state| *state);
    match seen {
        Ok(state) => state,
        Err(_) => std::future::pending().await,
    }
}

fn startup_exit(state: BackendProcessState) -> LaunchError {
    match state {
        BackendProcessState::Exited { code, signal } => LaunchError::ExitedDuringStartup { code, signal },
        _ => LaunchError::ExitedDuringStartup {
            code: None,
            signal: None,
        },
    }
}

#[cfg(unix)]
fn exit_parts(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
    use std::os::unix::process::ExitStatusExt;
    (status.code(), status.signal())
}

#[cfg(not(unix))]
fn exit_parts(status: &ExitStatus) -> (Option<i32>, Option<i32>) {
    (status.code(), None)
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = i32::try_from(pid).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(std::io::Error::from)
}

fn forward_output(child: &mut Child, pid: u32) {
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!(target: "backend", pid, stream = "stdout", "{}", line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::info!(target: "backend", pid, stream = "stderr", "{}", line);
            }
        });
    }
}
