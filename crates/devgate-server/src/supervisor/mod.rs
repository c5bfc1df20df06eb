//! Backend process lifecycle.
//!
//! A [`ProcessSupervisor`] owns at most one backend process. The first request
//! spawns it; every request arriving while it boots shares that same
//! [`StartAttempt`]. Readiness is detected by polling the backend's root URL.
//! The process is torn down after an idle window, on a reload request from
//! the backend, or when it exits on its own; the next request then starts
//! from scratch.

mod idle;
mod output;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use devgate_config::{BackendConfig, ConfigError};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, broadcast, oneshot, watch};
use tokio::time::MissedTickBehavior;

use crate::error::ProxyError;
use idle::IdleTimer;
use output::{OUTPUT_CAPACITY, pipe_lines};

/// Environment variable set on the backend so it knows it runs behind the proxy.
pub const PROXIED_ENV: &str = "DEVGATE_PROXIED";

/// Interval between readiness probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);

const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// How to launch and reach the backend.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Executable to run.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
    /// Hostname the backend listens on.
    pub hostname: String,
    /// Port the backend listens on.
    pub port: u16,
    /// Capture stdout/stderr for bootstrap pages instead of inheriting them.
    pub show_terminal: bool,
    /// Inactivity window before the backend is stopped.
    pub idle_timeout: Duration,
    /// Interval between readiness probes.
    pub probe_interval: Duration,
}

impl SupervisorConfig {
    /// Build from resolved backend configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if no backend command is configured.
    pub fn from_backend(backend: &BackendConfig) -> Result<Self, ConfigError> {
        let (program, args) = backend
            .require_command()?
            .split_first()
            .ok_or_else(|| ConfigError::Validation("backend.command is empty".to_owned()))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            cwd: backend.cwd.clone(),
            env: backend.env.clone(),
            hostname: backend.hostname.clone(),
            port: backend.port,
            show_terminal: backend.show_terminal,
            idle_timeout: backend.idle_timeout,
            probe_interval: DEFAULT_PROBE_INTERVAL,
        })
    }

    /// Base URL of the backend, without trailing slash.
    #[must_use]
    pub fn origin(&self) -> String {
        format!("http://{}:{}", self.hostname, self.port)
    }

    /// Command line as shown to users.
    #[must_use]
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Progress of a single start attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartStatus {
    /// Spawned, not yet answering probes.
    Starting,
    /// Answering probes.
    Ready,
    /// Could not be spawned, or exited before answering.
    Failed(String),
}

/// Handle on one start attempt, shared by every request that waits on it.
#[derive(Debug, Clone)]
pub struct StartAttempt {
    generation: u64,
    command: String,
    status: watch::Receiver<StartStatus>,
    output: broadcast::Sender<String>,
}

impl StartAttempt {
    /// Sequence number of the process this attempt started.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Command line being started.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> StartStatus {
        self.status.borrow().clone()
    }

    /// Receiver notified on every status change.
    #[must_use]
    pub fn status_receiver(&self) -> watch::Receiver<StartStatus> {
        self.status.clone()
    }

    /// Subscribe to backend output lines, ANSI codes stripped.
    ///
    /// Only lines produced after subscribing are received.
    #[must_use]
    pub fn subscribe_output(&self) -> broadcast::Receiver<String> {
        self.output.subscribe()
    }

    /// Wait until the attempt settles.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::StartupFailed` if the backend could not be
    /// started or was terminated before becoming ready.
    pub async fn wait(&self) -> Result<(), ProxyError> {
        let mut status = self.status.clone();
        let settled = status
            .wait_for(|s| *s != StartStatus::Starting)
            .await
            .map(|s| s.clone());

        match settled {
            Ok(StartStatus::Ready) => Ok(()),
            Ok(StartStatus::Failed(reason)) => Err(ProxyError::StartupFailed(reason)),
            Ok(StartStatus::Starting) | Err(_) => Err(ProxyError::StartupFailed(
                "backend start was abandoned".to_owned(),
            )),
        }
    }
}

#[cfg(test)]
impl StartAttempt {
    /// Attempt not tied to a process, driven by the returned senders.
    pub(crate) fn detached(
        command: &str,
    ) -> (Self, watch::Sender<StartStatus>, broadcast::Sender<String>) {
        let (status_tx, status_rx) = watch::channel(StartStatus::Starting);
        let (output_tx, _) = broadcast::channel(OUTPUT_CAPACITY);
        let attempt = Self {
            generation: 1,
            command: command.to_owned(),
            status: status_rx,
            output: output_tx.clone(),
        };
        (attempt, status_tx, output_tx)
    }
}

/// Outcome of [`ProcessSupervisor::ensure_started`].
#[derive(Debug, Clone)]
pub enum Startup {
    /// The backend is answering requests.
    Ready,
    /// A start attempt is in flight (or just failed).
    Starting(StartAttempt),
}

struct BackendProcess {
    generation: u64,
    attempt: StartAttempt,
    /// Dropping or firing this kills the child.
    kill: Option<oneshot::Sender<()>>,
}

struct Inner {
    config: SupervisorConfig,
    phase: Mutex<Option<BackendProcess>>,
    ready: AtomicBool,
    generation: AtomicU64,
    idle: IdleTimer,
    probe: reqwest::Client,
}

/// Owner of the backend process.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    /// Create a supervisor. Nothing is spawned until the first request.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Forward` if the probe HTTP client cannot be built.
    pub fn new(config: SupervisorConfig) -> Result<Self, ProxyError> {
        let probe = reqwest::Client::builder()
            .connect_timeout(PROBE_CONNECT_TIMEOUT)
            .timeout(PROBE_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                phase: Mutex::new(None),
                ready: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                idle: IdleTimer::new(),
                probe,
            }),
        })
    }

    /// Supervisor configuration.
    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Whether the backend is answering requests.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    /// Number of processes spawned so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Start the backend unless it is running or already starting.
    ///
    /// Concurrent callers are serialized; all callers arriving while a start
    /// is in flight receive the same [`StartAttempt`].
    pub async fn ensure_started(&self) -> Startup {
        let mut phase = self.inner.phase.lock().await;

        if let Some(process) = phase.as_ref() {
            return match process.attempt.status() {
                StartStatus::Ready => Startup::Ready,
                _ => Startup::Starting(process.attempt.clone()),
            };
        }

        let (attempt, process) = self.inner.spawn();
        *phase = process;
        Startup::Starting(attempt)
    }

    /// Record backend activity, postponing the idle teardown.
    pub fn touch(&self) {
        self.inner.touch();
    }

    /// Stop the backend. The next request starts a fresh process.
    pub async fn terminate(&self) {
        let mut phase = self.inner.phase.lock().await;
        self.inner.ready.store(false, Ordering::SeqCst);
        self.inner.idle.cancel();

        if let Some(mut process) = phase.take() {
            tracing::info!(generation = process.generation, "Terminating backend");
            if let Some(kill) = process.kill.take() {
                let _ = kill.send(());
            }
        }
    }
}

impl Inner {
    /// Spawn a new backend process. Called with the phase lock held.
    ///
    /// The returned process is `None` when spawning failed; the attempt then
    /// already reports the failure.
    fn spawn(self: &Arc<Self>) -> (StartAttempt, Option<BackendProcess>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (status_tx, status_rx) = watch::channel(StartStatus::Starting);
        let (output_tx, _) = broadcast::channel(OUTPUT_CAPACITY);
        let attempt = StartAttempt {
            generation,
            command: self.config.command_line(),
            status: status_rx,
            output: output_tx.clone(),
        };

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .current_dir(&self.config.cwd)
            .envs(&self.config.env)
            .env(PROXIED_ENV, "1")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if self.config.show_terminal {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let reason = format!("failed to spawn `{}`: {e}", attempt.command);
                tracing::warn!(generation, %reason, "Backend failed to start");
                status_tx.send_replace(StartStatus::Failed(reason));
                return (attempt, None);
            }
        };
        tracing::info!(
            generation,
            pid = child.id(),
            command = %attempt.command,
            "Backend spawned"
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pipe_lines(stdout, "stdout", output_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pipe_lines(stderr, "stderr", output_tx));
        }

        let status = Arc::new(status_tx);
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(Arc::clone(self).watch_exit(generation, child, kill_rx, Arc::clone(&status)));
        tokio::spawn(Arc::clone(self).probe_until_ready(generation, status));

        let process = BackendProcess {
            generation,
            attempt: attempt.clone(),
            kill: Some(kill_tx),
        };
        (attempt, Some(process))
    }

    /// Wait for the child to exit or for a kill request.
    async fn watch_exit(
        self: Arc<Self>,
        generation: u64,
        mut child: Child,
        kill: oneshot::Receiver<()>,
        status: Arc<watch::Sender<StartStatus>>,
    ) {
        let reason = tokio::select! {
            exit = child.wait() => {
                let reason = match exit {
                    Ok(code) => format!("backend exited with {code}"),
                    Err(e) => format!("failed to wait for backend: {e}"),
                };

                let mut phase = self.phase.lock().await;
                if phase.as_ref().is_some_and(|p| p.generation == generation) {
                    *phase = None;
                    self.ready.store(false, Ordering::SeqCst);
                    self.idle.cancel();
                    tracing::warn!(generation, %reason, "Backend exited unexpectedly");
                }
                reason
            }
            // Fired by terminate, or dropped with the process record
            _ = kill => {
                if let Err(e) = child.kill().await {
                    tracing::debug!(generation, error = %e, "Backend already exited");
                }
                tracing::info!(generation, "Backend terminated");
                "backend was terminated before becoming ready".to_owned()
            }
        };

        status.send_if_modified(|current| {
            if *current == StartStatus::Starting {
                *current = StartStatus::Failed(reason);
                true
            } else {
                false
            }
        });
    }

    /// Poll the backend's root URL until it answers or the attempt settles.
    async fn probe_until_ready(
        self: Arc<Self>,
        generation: u64,
        status: Arc<watch::Sender<StartStatus>>,
    ) {
        let url = format!("{}/", self.config.origin());
        let mut interval = tokio::time::interval(self.config.probe_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if *status.borrow() != StartStatus::Starting {
                return;
            }

            match self.probe.get(&url).send().await {
                Ok(_) => break,
                // Connected, but the backend is slow to answer
                Err(e) if e.is_timeout() && !e.is_connect() => break,
                Err(e) => tracing::debug!(generation, error = %e, "Backend not reachable yet"),
            }
        }

        let phase = self.phase.lock().await;
        if !phase.as_ref().is_some_and(|p| p.generation == generation) {
            return;
        }
        let became_ready = status.send_if_modified(|current| {
            if *current == StartStatus::Starting {
                *current = StartStatus::Ready;
                true
            } else {
                false
            }
        });
        if became_ready {
            self.ready.store(true, Ordering::SeqCst);
        }
        drop(phase);

        if became_ready {
            tracing::info!(generation, "Backend ready");
            self.touch();
        }
    }

    fn touch(self: &Arc<Self>) {
        let inner = Arc::downgrade(self);
        self.idle.rearm(self.config.idle_timeout, move |epoch| async move {
            if let Some(inner) = inner.upgrade() {
                inner.terminate_if_idle(epoch).await;
            }
        });
    }

    /// Tear down the backend unless a request rearmed the timer meanwhile.
    async fn terminate_if_idle(&self, epoch: u64) {
        let mut phase = self.phase.lock().await;
        if !self.idle.is_current(epoch) {
            return;
        }

        if let Some(process) = phase.take() {
            self.ready.store(false, Ordering::SeqCst);
            tracing::info!(
                generation = process.generation,
                timeout = ?self.config.idle_timeout,
                "Idle timeout reached, stopping backend"
            );
            // Dropping the kill sender stops the child
            drop(process);
        }
    }
}
