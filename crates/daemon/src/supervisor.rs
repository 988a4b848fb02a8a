//! The `Supervisor`: top-level orchestrator. Owns the Process set and the
//! group index, installs signal handlers, drives graceful shutdown, and
//! executes hot-reload diffs. See spec §4.4.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use parking_lot::Mutex;
use procd_core::{GroupKey, ProcessKey, ProgramConfig};
use thiserror::Error;
use tokio::fs::File;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use procd_wire::ProcessStatus;

use crate::config::DaemonConfig;
use crate::event_bus::{EventBus, LoggingHandler};
use crate::process::Process;
use crate::prober;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to acquire pid file lock at {path:?}: {source}")]
    PidLock { path: PathBuf, source: std::io::Error },
    #[error("unknown group {0:?}")]
    UnknownGroup(String),
    #[error("unknown process {0:?}")]
    UnknownProcess(String),
}

struct ProcessSet {
    processes: HashMap<ProcessKey, Arc<Process>>,
    groups: HashMap<GroupKey, Vec<ProcessKey>>,
    configs: HashMap<String, ProgramConfig>,
    tasks: HashMap<ProcessKey, JoinHandle<()>>,
}

/// Owns every managed Process plus the ambient daemon machinery (PID lock,
/// event bus, RPC listener). Constructed once at startup.
pub struct Supervisor {
    set: Mutex<ProcessSet>,
    bus: EventBus,
    bus_task: Mutex<Option<JoinHandle<()>>>,
    config: DaemonConfig,
    _pid_lock: Mutex<Option<File>>,
}

impl Supervisor {
    /// Spec §4.4 startup sequence steps 1-2: acquire the PID lock, build
    /// Process entities for every configured program honoring `autostart`.
    pub async fn start(config: DaemonConfig) -> Result<Arc<Self>, SupervisorError> {
        let pid_file = Self::acquire_pid_lock(&config.pidfile).await?;

        let (bus, bus_task) = EventBus::start(config.event_bus_capacity, vec![Arc::new(LoggingHandler)]);

        let mut set = ProcessSet {
            processes: HashMap::new(),
            groups: HashMap::new(),
            configs: HashMap::new(),
            tasks: HashMap::new(),
        };
        for program in &config.programs {
            set.configs.insert(program.name.clone(), program.clone());
        }

        let supervisor = Arc::new(Self {
            set: Mutex::new(set),
            bus,
            bus_task: Mutex::new(Some(bus_task)),
            config,
            _pid_lock: Mutex::new(Some(pid_file)),
        });

        let programs = supervisor.config.programs.clone();
        for program in &programs {
            supervisor.spawn_program(program, program.autostart);
        }

        Ok(supervisor)
    }

    async fn acquire_pid_lock(path: &Path) -> Result<File, SupervisorError> {
        // Must not truncate before the lock is held: a second instance
        // started while a first is running would otherwise zero out the
        // first instance's pidfile even though its own lock attempt below
        // then correctly fails.
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| SupervisorError::PidLock { path: path.to_path_buf(), source })?;
        file.try_lock_exclusive()
            .map_err(|source| SupervisorError::PidLock { path: path.to_path_buf(), source })?;
        use std::io::{Seek, SeekFrom, Write as _};
        file.set_len(0).map_err(|source| SupervisorError::PidLock { path: path.to_path_buf(), source })?;
        file.seek(SeekFrom::Start(0))
            .map_err(|source| SupervisorError::PidLock { path: path.to_path_buf(), source })?;
        let _ = write!(file, "{}", std::process::id());
        Ok(File::from_std(file))
    }

    fn spawn_program(self: &Arc<Self>, program: &ProgramConfig, should_run: bool) {
        let mut set = self.set.lock();
        let group = GroupKey::new(program.group_name());
        for index in 0..program.numprocs {
            let key = ProcessKey::instance(&program.name, index, program.numprocs);
            let process = Process::new(key.clone(), group.clone(), program.clone(), index, self.bus.clone());
            process.set_initial_intent(should_run);

            let prober = prober::build(&program.healthcheck);
            let task_process = Arc::clone(&process);
            let task = tokio::spawn(async move { task_process.run(prober).await });

            set.processes.insert(key.clone(), process);
            set.groups.entry(group.clone()).or_default().push(key.clone());
            set.tasks.insert(key, task);
        }
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config.config_path.as_deref()
    }

    pub fn status(&self) -> Vec<ProcessStatus> {
        let set = self.set.lock();
        let mut rows: Vec<_> = set
            .processes
            .values()
            .map(|process| ProcessStatus {
                name: process.key().to_string(),
                state: process.state().as_str().to_string(),
                pid: process.pid(),
                uptime_seconds: process.uptime().map(|d| d.as_secs()),
                health: match process.health() {
                    procd_core::ProcessHealth::Unknown => None,
                    procd_core::ProcessHealth::Healthy => Some("ok".to_string()),
                    procd_core::ProcessHealth::Unhealthy => Some("fail".to_string()),
                },
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    fn find(&self, name: &str) -> Option<Arc<Process>> {
        self.set.lock().processes.get(name).cloned()
    }

    pub async fn start_process(&self, name: &str) -> Result<bool, SupervisorError> {
        let process = self.find(name).ok_or_else(|| SupervisorError::UnknownProcess(name.to_string()))?;
        Ok(process.start_process().await)
    }

    pub async fn stop_process(&self, name: &str) -> Result<bool, SupervisorError> {
        let process = self.find(name).ok_or_else(|| SupervisorError::UnknownProcess(name.to_string()))?;
        Ok(process.stop_process().await)
    }

    pub async fn restart_process(&self, name: &str, force: bool) -> Result<bool, SupervisorError> {
        let process = self.find(name).ok_or_else(|| SupervisorError::UnknownProcess(name.to_string()))?;
        Ok(process.restart_process(force).await)
    }

    fn group_members(&self, name: &str) -> Result<Vec<Arc<Process>>, SupervisorError> {
        let set = self.set.lock();
        let key = GroupKey::new(name);
        let members = set.groups.get(&key).ok_or_else(|| SupervisorError::UnknownGroup(name.to_string()))?;
        Ok(members.iter().filter_map(|k| set.processes.get(k).cloned()).collect())
    }

    /// Spec §4.4 group operations: fan out concurrently, success iff every
    /// member succeeds.
    pub async fn start_group(&self, name: &str) -> Result<bool, SupervisorError> {
        let members = self.group_members(name)?;
        let handles: Vec<_> =
            members.into_iter().map(|p| tokio::spawn(async move { p.start_process().await })).collect();
        let mut all_ok = true;
        for handle in handles {
            all_ok &= handle.await.unwrap_or(false);
        }
        Ok(all_ok)
    }

    pub async fn stop_group(&self, name: &str) -> Result<bool, SupervisorError> {
        let members = self.group_members(name)?;
        let handles: Vec<_> =
            members.into_iter().map(|p| tokio::spawn(async move { p.stop_process().await })).collect();
        let mut all_ok = true;
        for handle in handles {
            all_ok &= handle.await.unwrap_or(false);
        }
        Ok(all_ok)
    }

    /// Spec §4.4 hot reload: diff by program name. Added programs are
    /// constructed and started; removed ones are stopped and dropped;
    /// changed ones are reported but left running untouched.
    pub async fn reload(&self, new_programs: Vec<ProgramConfig>) -> ReloadDiff {
        for program in &new_programs {
            if let Err(error) = program.validate() {
                return ReloadDiff { error: Some(error.to_string()), ..Default::default() };
            }
        }

        let new_by_name: HashMap<_, _> = new_programs.iter().map(|p| (p.name.clone(), p.clone())).collect();
        let (added, removed, changed, to_start) = {
            let set = self.set.lock();
            let mut added = Vec::new();
            let mut removed = Vec::new();
            let mut changed = Vec::new();
            let mut to_start = Vec::new();

            for (name, program) in &new_by_name {
                match set.configs.get(name) {
                    None => {
                        added.push(name.clone());
                        to_start.push(program.clone());
                    }
                    Some(existing) if existing != program => {
                        changed.push(name.clone());
                    }
                    Some(_) => {}
                }
            }
            for name in set.configs.keys() {
                if !new_by_name.contains_key(name) {
                    removed.push(name.clone());
                }
            }
            added.sort();
            removed.sort();
            changed.sort();
            (added, removed, changed, to_start)
        };

        for name in &removed {
            self.remove_program(name).await;
        }
        for program in &to_start {
            self.spawn_program(program, program.autostart);
        }
        {
            let mut set = self.set.lock();
            for program in &new_programs {
                set.configs.insert(program.name.clone(), program.clone());
            }
        }

        ReloadDiff { added, removed, changed, error: None }
    }

    async fn remove_program(&self, name: &str) {
        let keys: Vec<ProcessKey> = {
            let set = self.set.lock();
            set.processes.keys().filter(|k| k.as_str() == name || k.as_str().starts_with(&format!("{name}:"))).cloned().collect()
        };
        for key in keys {
            let process = self.find(key.as_str());
            if let Some(process) = process {
                process.stop_process().await;
            }
            let mut set = self.set.lock();
            set.processes.remove(&key);
            if let Some(task) = set.tasks.remove(&key) {
                task.abort();
            }
            set.configs.remove(name);
            for members in set.groups.values_mut() {
                members.retain(|k| k != &key);
            }
        }
    }

    /// Spec §4.4 graceful shutdown: stop every Process within
    /// `shutdown_timeout`, force-killing any stragglers, then release the
    /// PID lock and drain the Event Bus.
    pub async fn shutdown(&self) {
        info!("starting graceful shutdown");
        let processes: Vec<_> = self.set.lock().processes.values().cloned().collect();
        for process in &processes {
            process.request_shutdown();
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        for process in &processes {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let _ = tokio::time::timeout(remaining, async {
                while !process.state().is_terminal() {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            })
            .await;
            if let (Some(pid), false) = (process.pid(), process.state().is_terminal()) {
                warn!(pid, process = %process.key(), "shutdown deadline exceeded, force-killing");
                let _ = crate::signals::kill_group(pid);
            }
        }

        let mut set = self.set.lock();
        for task in set.tasks.values() {
            task.abort();
        }
        drop(set);

        if let Some(task) = self.bus_task.lock().take() {
            task.abort();
            let _ = task.await;
        }
        *self._pid_lock.lock() = None;
        info!("shutdown complete");
    }
}

/// The result of a hot reload, per spec §4.4 step 3.
#[derive(Debug, Default)]
pub struct ReloadDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    pub error: Option<String>,
}
