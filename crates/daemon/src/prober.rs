//! Health probers. See spec §4.2: a `Prober` is a capability object with a
//! single `probe()` operation bounded by a timeout; the probe loop itself
//! lives on [`crate::process::Process`], which owns the decision of when to
//! transition to/from `UNHEALTHY`.

use std::time::Duration;

use async_trait::async_trait;
use procd_core::HealthCheckConfig;
use tokio::io::AsyncReadExt as _;
use tokio::net::TcpStream;
use tracing::warn;

use crate::signals::kill_group;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    Unhealthy { message: String },
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, timeout: Duration) -> ProbeOutcome;
}

/// `healthcheck.type = none`: never probes, never forces UNHEALTHY.
pub struct NoneProber;

#[async_trait]
impl Prober for NoneProber {
    async fn probe(&self, _timeout: Duration) -> ProbeOutcome {
        ProbeOutcome::Healthy
    }
}

/// `healthcheck.type = tcp`: healthy iff a connection to `host:port`
/// completes within `timeout`.
pub struct TcpProber {
    pub host: String,
    pub port: u32,
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, timeout: Duration) -> ProbeOutcome {
        let addr = format!("{}:{}", self.host, self.port);
        match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => ProbeOutcome::Healthy,
            Ok(Err(error)) => ProbeOutcome::Unhealthy { message: error.to_string() },
            Err(_elapsed) => ProbeOutcome::Unhealthy { message: format!("connect to {addr} timed out") },
        }
    }
}

/// `healthcheck.type = script`: healthy iff `command` exits 0 within
/// `timeout`; on timeout the spawned process group is killed.
pub struct ScriptProber {
    pub command: Vec<String>,
}

#[async_trait]
impl Prober for ScriptProber {
    async fn probe(&self, timeout: Duration) -> ProbeOutcome {
        let Some((program, args)) = self.command.split_first() else {
            return ProbeOutcome::Unhealthy { message: "empty probe command".to_string() };
        };
        let mut child = match tokio::process::Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(error) => return ProbeOutcome::Unhealthy { message: error.to_string() },
        };
        let pid = child.id();

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => ProbeOutcome::Healthy,
            Ok(Ok(status)) => {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                ProbeOutcome::Unhealthy { message: format!("exited with {status}: {stderr}") }
            }
            Ok(Err(error)) => ProbeOutcome::Unhealthy { message: error.to_string() },
            Err(_elapsed) => {
                if let Some(pid) = pid {
                    if let Err(error) = kill_group(pid) {
                        warn!(%error, pid, "failed to kill timed-out probe script");
                    }
                }
                let _ = child.wait().await;
                ProbeOutcome::Unhealthy { message: format!("probe command timed out after {timeout:?}") }
            }
        }
    }
}

/// Builds the configured [`Prober`] for a health check, or `None` when
/// `type = none` (no probe loop should be started, per invariant (v)).
pub fn build(config: &HealthCheckConfig) -> Option<std::sync::Arc<dyn Prober>> {
    use procd_core::HealthCheckType;
    match config.kind {
        HealthCheckType::None => None,
        HealthCheckType::Tcp => Some(std::sync::Arc::new(TcpProber {
            host: config.host.clone().unwrap_or_else(|| "127.0.0.1".to_string()),
            port: config.port.unwrap_or_default(),
        })),
        HealthCheckType::Script => {
            Some(std::sync::Arc::new(ScriptProber { command: config.command.clone().unwrap_or_default() }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn none_prober_is_always_healthy() {
        assert_eq!(NoneProber.probe(Duration::from_secs(1)).await, ProbeOutcome::Healthy);
    }

    #[tokio::test]
    async fn tcp_prober_fails_against_a_closed_port() {
        let prober = TcpProber { host: "127.0.0.1".to_string(), port: 1 };
        let outcome = prober.probe(Duration::from_millis(500)).await;
        assert!(matches!(outcome, ProbeOutcome::Unhealthy { .. }));
    }

    #[tokio::test]
    async fn script_prober_reports_healthy_on_exit_zero() {
        let prober = ScriptProber { command: vec!["/bin/true".to_string()] };
        assert_eq!(prober.probe(Duration::from_secs(1)).await, ProbeOutcome::Healthy);
    }

    #[tokio::test]
    async fn script_prober_reports_unhealthy_on_nonzero_exit() {
        let prober = ScriptProber { command: vec!["/bin/false".to_string()] };
        assert!(matches!(prober.probe(Duration::from_secs(1)).await, ProbeOutcome::Unhealthy { .. }));
    }

    #[tokio::test]
    async fn script_prober_kills_and_reports_unhealthy_on_timeout() {
        let prober = ScriptProber { command: vec!["/bin/sleep".to_string(), "5".to_string()] };
        let outcome = prober.probe(Duration::from_millis(100)).await;
        assert!(matches!(outcome, ProbeOutcome::Unhealthy { .. }));
    }

    #[test]
    fn build_returns_none_for_none_type() {
        let config = HealthCheckConfig {
            kind: procd_core::HealthCheckType::None,
            interval: 1,
            timeout: 1,
            retries: 1,
            start_period: 0,
            host: None,
            port: None,
            command: None,
        };
        assert!(build(&config).is_none());
    }
}
