//! The `Process` entity: per-managed-process state machine, spawn/kill
//! primitives, restart policy, health integration, and command intake.
//! See spec §4.3 for the full transition table this module implements.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use procd_core::{Event, GroupKey, ProcessHealth, ProcessKey, ProcessState, ProgramConfig};
use tokio::process::Child;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::event_bus::EventBus;
use crate::prober::{Prober, ProbeOutcome};
use crate::signals::{kill_group, parse_signal, signal_group};
use crate::spawn::{self, SpawnError};

/// Upper bound on the linear backoff schedule (spec §9's resolved Open
/// Question): `delay = min(retry_count secs, 10 secs)`.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

fn backoff_delay(retry_count: u32) -> Duration {
    Duration::from_secs(retry_count as u64).min(MAX_BACKOFF)
}

/// Commands accepted from the RPC layer. Each just records intent; only
/// the supervision loop (`Process::run`) transitions `state`.
#[derive(Debug)]
enum Command {
    Start,
    Stop,
    Restart { force: bool },
}

/// Signal from the health-probe loop to the supervision loop.
#[derive(Debug)]
enum HealthSignal {
    Failed { failures: u32, message: String },
    Recovered,
}

/// Everything mutated under the single per-Process lock (spec §3's
/// "mutable under a single state lock" attributes).
struct Record {
    state: ProcessState,
    should_run: bool,
    pid: Option<u32>,
    started_at: Option<Instant>,
    retry_count: u32,
    health: ProcessHealth,
}

/// A supervised OS process (or one instance of a `numprocs > 1` program).
pub struct Process {
    key: ProcessKey,
    group: GroupKey,
    config: ProgramConfig,
    instance_index: u32,
    record: Mutex<Record>,
    commands: mpsc::UnboundedSender<Command>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    converged: Notify,
    bus: EventBus,
}

impl Process {
    pub fn new(
        key: ProcessKey,
        group: GroupKey,
        config: ProgramConfig,
        instance_index: u32,
        bus: EventBus,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            key,
            group,
            config,
            instance_index,
            record: Mutex::new(Record {
                state: ProcessState::Stopped,
                should_run: false,
                pid: None,
                started_at: None,
                retry_count: 0,
                health: ProcessHealth::Unknown,
            }),
            commands: tx,
            command_rx: Mutex::new(Some(rx)),
            converged: Notify::new(),
            bus,
        })
    }

    pub fn key(&self) -> &ProcessKey {
        &self.key
    }

    pub fn group(&self) -> &GroupKey {
        &self.group
    }

    pub fn config(&self) -> &ProgramConfig {
        &self.config
    }

    pub fn state(&self) -> ProcessState {
        self.record.lock().state
    }

    pub fn pid(&self) -> Option<u32> {
        self.record.lock().pid
    }

    pub fn health(&self) -> ProcessHealth {
        self.record.lock().health
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.record.lock().started_at.map(|t| t.elapsed())
    }

    fn should_run(&self) -> bool {
        self.record.lock().should_run
    }

    /// Marks `should_run` per `autostart` at daemon startup (spec §4.4).
    pub fn set_initial_intent(&self, should_run: bool) {
        self.record.lock().should_run = should_run;
    }

    fn set_state(&self, to: ProcessState, pid: Option<u32>, message: Option<String>) {
        let from = {
            let mut record = self.record.lock();
            let from = record.state;
            record.state = to;
            from
        };
        self.bus.publish(Event::StateChanged {
            processname: self.key.clone(),
            groupname: self.group.clone(),
            from_state: from,
            to_state: to,
            pid,
            message,
        });
        self.converged.notify_waiters();
    }

    // ---- command intake (spec §4.3 "Command intake") ----

    pub async fn start_process(&self) -> bool {
        if self.state() == ProcessState::Fatal {
            self.record.lock().retry_count = 0;
        }
        {
            let mut record = self.record.lock();
            if record.should_run && record.state == ProcessState::Running {
                return true;
            }
            record.should_run = true;
        }
        let _ = self.commands.send(Command::Start);
        self.wait_for(|s| s == ProcessState::Running, Duration::from_secs(5)).await
    }

    pub async fn stop_process(&self) -> bool {
        {
            let mut record = self.record.lock();
            if !record.should_run && record.state.is_terminal() {
                return true;
            }
            record.should_run = false;
        }
        let _ = self.commands.send(Command::Stop);
        self.wait_for(ProcessState::is_terminal, Duration::from_secs(30)).await
    }

    pub async fn restart_process(&self, force: bool) -> bool {
        let _ = self.commands.send(Command::Restart { force });
        self.wait_for(|s| s == ProcessState::Running, Duration::from_secs(30)).await
    }

    async fn wait_for(&self, predicate: impl Fn(ProcessState) -> bool, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(self.state()) {
                return true;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return predicate(self.state());
            }
            let _ = tokio::time::timeout(remaining, self.converged.notified()).await;
        }
    }

    /// Signals the supervision loop to stop as part of whole-system
    /// shutdown, distinct from an operator `stop` (no waiting here; the
    /// Supervisor does its own deadline-bounded wait across all Processes).
    pub fn request_shutdown(&self) {
        self.record.lock().should_run = false;
        let _ = self.commands.send(Command::Stop);
    }

    // ---- supervision task ----

    /// The supervision loop: the sole authority that spawns/reaps children
    /// and transitions `state`. Runs until the command channel is dropped.
    #[instrument(skip_all, fields(process = %self.key))]
    pub async fn run(self: Arc<Self>, prober: Option<Arc<dyn Prober>>) {
        let mut commands = match self.command_rx.lock().take() {
            Some(rx) => rx,
            None => return,
        };
        loop {
            let state = self.state();
            match state {
                ProcessState::Stopped | ProcessState::Exited | ProcessState::Fatal => {
                    if state != ProcessState::Fatal && self.should_run() {
                        self.set_state(ProcessState::Starting, None, None);
                        continue;
                    }
                    match commands.recv().await {
                        Some(cmd) => self.handle_idle_command(cmd, state),
                        None => return,
                    }
                }
                ProcessState::Backoff => {
                    let delay = backoff_delay(self.record.lock().retry_count);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        cmd = commands.recv() => {
                            match cmd {
                                Some(cmd) => { self.handle_idle_command(cmd, ProcessState::Backoff); continue; }
                                None => return,
                            }
                        }
                    }
                    if !self.should_run() {
                        self.set_state(ProcessState::Stopped, None, None);
                        continue;
                    }
                    let retry_count = self.record.lock().retry_count;
                    if retry_count >= self.config.startretries {
                        self.set_state(ProcessState::Fatal, None, None);
                    } else {
                        self.set_state(ProcessState::Starting, None, None);
                    }
                }
                ProcessState::Starting => {
                    self.spawn_and_supervise(&mut commands, prober.clone()).await;
                }
                ProcessState::Running | ProcessState::Unhealthy | ProcessState::Stopping => {
                    // Only reachable if the daemon crashed mid-supervision and
                    // was restarted with leftover state; treat as stale and
                    // fall back to STOPPED so the loop can re-enter cleanly.
                    warn!(?state, "supervision loop resumed in a live state with no child handle");
                    self.set_state(ProcessState::Stopped, None, None);
                }
            }
        }
    }

    /// Handles a command received while the supervision loop is idle
    /// (STOPPED/EXITED/BACKOFF/FATAL). `from` is the state the loop was in
    /// when the command arrived: a `Start`/`Restart` out of `FATAL` must
    /// explicitly re-enter `STARTING` here, since `FATAL` is excluded from
    /// the loop's own `should_run`-driven auto-transition (spec §4.3's
    /// "from FATAL, only an explicit start reaches STARTING").
    fn handle_idle_command(&self, cmd: Command, from: ProcessState) {
        match cmd {
            Command::Start | Command::Restart { .. } => {
                self.record.lock().should_run = true;
                if from == ProcessState::Fatal {
                    self.record.lock().retry_count = 0;
                    self.set_state(ProcessState::Starting, None, None);
                }
            }
            Command::Stop => {
                self.record.lock().should_run = false;
            }
        }
    }

    /// Covers STARTING through the full RUNNING/UNHEALTHY lifecycle to the
    /// next terminal-ish state (EXITED/STOPPED/BACKOFF/FATAL).
    async fn spawn_and_supervise(
        self: &Arc<Self>,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        prober: Option<Arc<dyn Prober>>,
    ) {
        let (mut child, pid) = match spawn::spawn(&self.config, self.instance_index) {
            Ok(pair) => pair,
            Err(error) => {
                self.on_spawn_failed(&error);
                return;
            }
        };

        let spawned_at = Instant::now();
        {
            let mut record = self.record.lock();
            record.pid = Some(pid);
            record.started_at = Some(spawned_at);
            record.health = ProcessHealth::Unknown;
        }
        self.set_state(ProcessState::Running, Some(pid), None);
        info!(pid, "process running");

        let (health_tx, mut health_rx) = mpsc::unbounded_channel();
        let probe_cancel = CancellationToken::new();
        let probe_task = prober.map(|prober| {
            let process = Arc::clone(self);
            let cancel = probe_cancel.clone();
            tokio::spawn(probe_loop(process, prober, health_tx, cancel))
        });

        let mut explicit_restart = false;
        let exit_status = loop {
            tokio::select! {
                status = child.wait() => {
                    break status;
                }
                cmd = commands.recv() => {
                    match cmd {
                        Some(Command::Stop) => {
                            self.record.lock().should_run = false;
                            self.set_state(ProcessState::Stopping, Some(pid), None);
                            break self.kill(&mut child, pid).await;
                        }
                        Some(Command::Restart { force }) => {
                            explicit_restart = true;
                            self.set_state(ProcessState::Stopping, Some(pid), None);
                            break if force {
                                self.force_kill(&mut child, pid).await
                            } else {
                                self.kill(&mut child, pid).await
                            };
                        }
                        Some(Command::Start) => {
                            // Already running: idempotent no-op.
                        }
                        None => {
                            break self.kill(&mut child, pid).await;
                        }
                    }
                }
                signal = health_rx.recv() => {
                    match signal {
                        Some(HealthSignal::Failed { failures, message }) => {
                            self.bus.publish(Event::HealthCheckFailed {
                                processname: self.key.clone(),
                                groupname: self.group.clone(),
                                failures,
                                message: message.clone(),
                            });
                            if failures >= self.config.healthcheck.retries {
                                self.record.lock().health = ProcessHealth::Unhealthy;
                                self.set_state(ProcessState::Unhealthy, Some(pid), Some(message));
                                if self.config.autorestart {
                                    self.set_state(ProcessState::Stopping, Some(pid), None);
                                    break self.kill(&mut child, pid).await;
                                }
                            }
                        }
                        Some(HealthSignal::Recovered) => {
                            self.record.lock().health = ProcessHealth::Healthy;
                            self.bus.publish(Event::HealthCheckPassed {
                                processname: self.key.clone(),
                                groupname: self.group.clone(),
                            });
                            if self.state() == ProcessState::Unhealthy {
                                self.set_state(ProcessState::Running, Some(pid), None);
                            }
                        }
                        None => {}
                    }
                }
            }
        };

        probe_cancel.cancel();
        if let Some(task) = probe_task {
            let _ = task.await;
        }

        if explicit_restart {
            // An operator-driven restart bypasses the autorestart/backoff
            // gating: stop, then unconditionally start again (spec §4.3's
            // `restart_process`).
            {
                let mut record = self.record.lock();
                record.pid = None;
                record.started_at = None;
                record.retry_count = 0;
            }
            self.set_state(ProcessState::Exited, None, None);
            self.set_state(ProcessState::Starting, None, None);
        } else {
            self.on_child_reaped(pid, spawned_at, exit_status);
        }
    }

    fn on_spawn_failed(&self, error: &SpawnError) {
        warn!(%error, "spawn failed");
        let mut record = self.record.lock();
        record.retry_count += 1;
        let retry_count = record.retry_count;
        let should_run = record.should_run;
        let startretries = self.config.startretries;
        drop(record);

        if !should_run {
            self.set_state(ProcessState::Stopped, None, Some(error.to_string()));
            return;
        }
        // A non-recoverable cause (unknown user, missing/unexecutable
        // binary) will never succeed on retry, so it skips straight to
        // FATAL instead of exhausting `startretries` in BACKOFF first.
        if error.is_non_recoverable() || retry_count >= startretries {
            self.set_state(ProcessState::Fatal, None, Some(error.to_string()));
        } else {
            self.set_state(ProcessState::Backoff, None, Some(error.to_string()));
        }
    }

    /// Restart policy from spec §4.3 (applied once a child has been reaped,
    /// whether from natural exit or a command-driven kill).
    fn on_child_reaped(&self, pid: u32, spawned_at: Instant, status: std::io::Result<std::process::ExitStatus>) {
        {
            let mut record = self.record.lock();
            record.pid = None;
            record.started_at = None;
        }

        let should_run = self.should_run();
        let uptime = spawned_at.elapsed();
        let startsecs = Duration::from_secs(self.config.startsecs);
        let message = match &status {
            Ok(status) => format!("exited: {status}"),
            Err(error) => format!("wait failed: {error}"),
        };
        info!(pid, ?uptime, "child reaped");

        if !should_run {
            self.set_state(ProcessState::Stopped, None, Some(message));
            return;
        }

        if uptime >= startsecs {
            self.record.lock().retry_count = 0;
            self.set_state(ProcessState::Exited, None, Some(message));
            if self.config.autorestart {
                self.set_state(ProcessState::Backoff, None, None);
            } else {
                self.set_state(ProcessState::Stopped, None, None);
            }
            return;
        }

        let mut record = self.record.lock();
        record.retry_count += 1;
        let retry_count = record.retry_count;
        drop(record);

        if retry_count >= self.config.startretries {
            self.set_state(ProcessState::Fatal, None, Some(message));
        } else {
            self.set_state(ProcessState::Backoff, None, Some(message));
        }
    }

    /// Signals the process group with `stopsignal`, then waits for `child`
    /// to actually be reaped (not a `kill(pid, 0)` liveness probe, which
    /// still succeeds against an unreaped zombie), escalating to SIGKILL if
    /// `stopwaitsecs` elapses first.
    async fn kill(&self, child: &mut Child, pid: u32) -> std::io::Result<std::process::ExitStatus> {
        let Ok(sig) = parse_signal(&self.config.stopsignal) else {
            warn!(signal = %self.config.stopsignal, "unknown stopsignal, defaulting to SIGTERM");
            let _ = signal_group(pid, nix::sys::signal::Signal::SIGTERM);
            return self.wait_reaped_or_force(child, pid).await;
        };
        if let Err(error) = signal_group(pid, sig) {
            warn!(%error, pid, "failed to signal process group");
        }
        self.wait_reaped_or_force(child, pid).await
    }

    async fn wait_reaped_or_force(
        &self,
        child: &mut Child,
        pid: u32,
    ) -> std::io::Result<std::process::ExitStatus> {
        let deadline = Duration::from_secs(self.config.stopwaitsecs);
        match tokio::time::timeout(deadline, child.wait()).await {
            Ok(status) => status,
            Err(_elapsed) => {
                warn!(pid, "stopwaitsecs elapsed, escalating to SIGKILL");
                if let Err(error) = kill_group(pid) {
                    warn!(%error, pid, "failed to force-kill process group");
                }
                child.wait().await
            }
        }
    }

    async fn force_kill(
        &self,
        child: &mut Child,
        pid: u32,
    ) -> std::io::Result<std::process::ExitStatus> {
        if let Err(error) = kill_group(pid) {
            warn!(%error, pid, "failed to force-kill process group");
        }
        child.wait().await
    }
}

#[instrument(skip(process, prober, health_tx, cancel), fields(process = %process.key()))]
async fn probe_loop(
    process: Arc<Process>,
    prober: Arc<dyn Prober>,
    health_tx: mpsc::UnboundedSender<HealthSignal>,
    cancel: CancellationToken,
) {
    let config = &process.config().healthcheck;
    let start_period = Duration::from_secs(config.start_period);
    let interval = Duration::from_secs(config.interval.max(1));
    let timeout = Duration::from_secs(config.timeout.max(1));
    let retries = config.retries;

    tokio::select! {
        _ = tokio::time::sleep(start_period) => {}
        _ = cancel.cancelled() => return,
    }

    let mut failures = 0u32;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            outcome = prober.probe(timeout) => {
                match outcome {
                    ProbeOutcome::Healthy => {
                        if failures > 0 {
                            failures = 0;
                            let _ = health_tx.send(HealthSignal::Recovered);
                        }
                    }
                    ProbeOutcome::Unhealthy { message } => {
                        failures += 1;
                        if health_tx.send(HealthSignal::Failed { failures, message }).is_err() {
                            return;
                        }
                        if failures >= retries {
                            // Owning Process will act on this; keep probing
                            // in case autorestart is false and the process
                            // recovers on its own later.
                        }
                    }
                }
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procd_core::test_support::test_program;

    fn test_process(command: &[&str]) -> Arc<Process> {
        let config = test_program("web", command);
        let (bus, _task) = EventBus::start(16, vec![]);
        Process::new(ProcessKey::new("web"), GroupKey::new("web"), config, 0, bus)
    }

    #[tokio::test]
    async fn happy_path_reaches_running_and_stop_reaches_stopped() {
        let process = test_process(&["/bin/sleep", "2"]);
        let runner = tokio::spawn(Arc::clone(&process).run(None));

        assert!(process.start_process().await);
        assert_eq!(process.state(), ProcessState::Running);
        assert!(process.pid().is_some());

        assert!(process.stop_process().await);
        assert_eq!(process.state(), ProcessState::Stopped);
        assert!(process.pid().is_none());

        process.request_shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(1), runner).await;
    }

    #[tokio::test]
    async fn quick_exit_reaches_fatal_after_exhausting_retries() {
        let mut config = test_program("web", &["/bin/false"]);
        config.startretries = 3;
        config.autorestart = true;
        let (bus, _task) = EventBus::start(16, vec![]);
        let process = Process::new(ProcessKey::new("web"), GroupKey::new("web"), config, 0, bus);
        let runner = tokio::spawn(Arc::clone(&process).run(None));

        process.record.lock().should_run = true;
        let _ = process.commands.send(Command::Start);

        let reached_fatal = process
            .wait_for(|s| s == ProcessState::Fatal, Duration::from_secs(10))
            .await;
        assert!(reached_fatal);

        process.request_shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(1), runner).await;
    }

    #[tokio::test]
    async fn explicit_start_recovers_a_fatal_process() {
        let mut config = test_program("web", &["/bin/false"]);
        config.startretries = 3;
        config.autorestart = true;
        let (bus, _task) = EventBus::start(16, vec![]);
        let process = Process::new(ProcessKey::new("web"), GroupKey::new("web"), config, 0, bus);
        let runner = tokio::spawn(Arc::clone(&process).run(None));

        process.record.lock().should_run = true;
        let _ = process.commands.send(Command::Start);
        assert!(process.wait_for(|s| s == ProcessState::Fatal, Duration::from_secs(10)).await);
        assert_eq!(process.record.lock().retry_count, 3);

        // An explicit start out of FATAL must reset retries and re-enter
        // STARTING, not stay stuck in FATAL forever.
        let _ = process.commands.send(Command::Start);
        assert!(
            process
                .wait_for(|s| s != ProcessState::Fatal, Duration::from_secs(10))
                .await
        );

        process.request_shutdown();
        let _ = tokio::time::timeout(Duration::from_secs(1), runner).await;
    }

    #[test]
    fn backoff_delay_is_linear_and_capped() {
        assert_eq!(backoff_delay(0), Duration::from_secs(0));
        assert_eq!(backoff_delay(3), Duration::from_secs(3));
        assert_eq!(backoff_delay(30), MAX_BACKOFF);
    }
}
