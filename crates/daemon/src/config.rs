//! A minimal INI-style configuration loader. Out of scope as a rich,
//! hardened component (see spec §1/§6 — configuration parsing is an
//! external collaborator), but the daemon has to be runnable, so this
//! recognizes `[procd]`, `[program:NAME]`, and `[group:NAME]` sections and
//! the fields from spec §3.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use procd_core::{ConfigError, HealthCheckConfig, HealthCheckType, ProgramConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path:?}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("{section}: {message}")]
    Malformed { section: String, message: String },
    #[error(transparent)]
    Validation(#[from] ConfigError),
    #[error("duplicate program {0:?}")]
    DuplicateProgram(String),
}

/// Daemon-level settings plus the parsed program set. See spec §6.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub pidfile: PathBuf,
    pub shutdown_timeout: Duration,
    pub event_bus_capacity: usize,
    pub programs: Vec<ProgramConfig>,
    /// Where this config was loaded from, if at all (a hand-built
    /// `DaemonConfig`, as in tests, has none). Remembered so `reload`
    /// can re-read the same file without a separate path argument.
    pub config_path: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| LoadError::Read { path: path.to_path_buf(), source })?;
        let mut config = Self::parse(&text)?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, LoadError> {
        let sections = split_sections(text);

        let mut socket_path = PathBuf::from("/tmp/procd.sock");
        let mut pidfile = PathBuf::from("/tmp/procd.pid");
        let mut shutdown_timeout = Duration::from_secs(10);
        let mut event_bus_capacity = 1000usize;

        if let Some(fields) = sections.get("procd") {
            if let Some(v) = fields.get("socket_path") {
                socket_path = PathBuf::from(v);
            }
            if let Some(v) = fields.get("pidfile") {
                pidfile = PathBuf::from(v);
            }
            if let Some(v) = fields.get("shutdown_timeout") {
                shutdown_timeout = Duration::from_secs(parse_u64("shutdown_timeout", v)?);
            }
            if let Some(v) = fields.get("event_bus_capacity") {
                event_bus_capacity = parse_u64("event_bus_capacity", v)? as usize;
            }
        }

        let mut programs = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for (header, fields) in &sections {
            let Some(name) = header.strip_prefix("program:") else { continue };
            if !seen.insert(name.to_string()) {
                return Err(LoadError::DuplicateProgram(name.to_string()));
            }
            let program = parse_program(name, fields)?;
            program.validate()?;
            programs.push(program);
        }
        programs.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(DaemonConfig { socket_path, pidfile, shutdown_timeout, event_bus_capacity, programs, config_path: None })
    }
}

fn parse_u64(field: &str, value: &str) -> Result<u64, LoadError> {
    value.trim().parse().map_err(|_| LoadError::Malformed {
        section: "procd".to_string(),
        message: format!("{field} must be a non-negative integer, got {value:?}"),
    })
}

fn parse_program(name: &str, fields: &HashMap<String, String>) -> Result<ProgramConfig, LoadError> {
    let command = fields
        .get("command")
        .map(|c| shell_split(c))
        .ok_or_else(|| LoadError::Malformed {
            section: format!("program:{name}"),
            message: "missing command".to_string(),
        })?;

    let environment = fields
        .get("environment")
        .map(|e| parse_environment(e))
        .unwrap_or_default();

    let healthcheck = HealthCheckConfig {
        kind: match fields.get("healthcheck_type").map(String::as_str) {
            None | Some("none") => HealthCheckType::None,
            Some("tcp") => HealthCheckType::Tcp,
            Some("script") => HealthCheckType::Script,
            Some(other) => {
                return Err(LoadError::Malformed {
                    section: format!("program:{name}"),
                    message: format!("unknown healthcheck_type {other:?}"),
                })
            }
        },
        interval: fields.get("healthcheck_interval").map(|v| parse_u64("healthcheck_interval", v)).transpose()?.unwrap_or(10),
        timeout: fields.get("healthcheck_timeout").map(|v| parse_u64("healthcheck_timeout", v)).transpose()?.unwrap_or(5),
        retries: fields.get("healthcheck_retries").map(|v| parse_u64("healthcheck_retries", v)).transpose()?.unwrap_or(3) as u32,
        start_period: fields.get("healthcheck_start_period").map(|v| parse_u64("healthcheck_start_period", v)).transpose()?.unwrap_or(0),
        host: fields.get("healthcheck_host").cloned(),
        port: fields.get("healthcheck_port").map(|v| parse_u64("healthcheck_port", v)).transpose()?.map(|p| p as u32),
        command: fields.get("healthcheck_command").map(|c| shell_split(c)),
    };

    Ok(ProgramConfig {
        name: name.to_string(),
        command,
        directory: fields.get("directory").cloned(),
        user: fields.get("user").cloned(),
        environment,
        numprocs: fields.get("numprocs").map(|v| parse_u64("numprocs", v)).transpose()?.unwrap_or(1) as u32,
        autostart: fields.get("autostart").map(|v| parse_bool(v)).unwrap_or(true),
        autorestart: fields.get("autorestart").map(|v| parse_bool(v)).unwrap_or(true),
        startsecs: fields.get("startsecs").map(|v| parse_u64("startsecs", v)).transpose()?.unwrap_or(1),
        startretries: fields.get("startretries").map(|v| parse_u64("startretries", v)).transpose()?.unwrap_or(3) as u32,
        stopsignal: fields.get("stopsignal").cloned().unwrap_or_else(|| "TERM".to_string()),
        stopwaitsecs: fields.get("stopwaitsecs").map(|v| parse_u64("stopwaitsecs", v)).transpose()?.unwrap_or(10),
        stdout_logfile: fields.get("stdout_logfile").cloned(),
        stderr_logfile: fields.get("stderr_logfile").cloned(),
        group: fields.get("group").cloned(),
        healthcheck,
    })
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

/// Shell-style whitespace split, honoring single/double quotes. Grounded on
/// the contract in spec §3: `command` is "argv after shell-style split".
fn shell_split(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in input.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None if ch.is_whitespace() => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            None => current.push(ch),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

fn parse_environment(input: &str) -> HashMap<String, String> {
    input
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Parses `[section]` headers and `key = value` lines, skipping blanks and
/// `#`/`;`-prefixed comments.
fn split_sections(text: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            current = Some(stripped.trim().to_string());
            sections.entry(stripped.trim().to_string()).or_default();
            continue;
        }
        if let (Some(name), Some((key, value))) = (&current, line.split_once('=')) {
            sections.entry(name.clone()).or_default().insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[procd]
socket_path = /tmp/test.sock
pidfile = /tmp/test.pid
shutdown_timeout = 5

[program:web]
command = /bin/sleep 3600
autostart = true
startsecs = 1
startretries = 3

[program:worker]
command = /bin/sleep 60
numprocs = 2
group = workers
"#;

    #[test]
    fn parses_daemon_and_program_sections() {
        let config = DaemonConfig::parse(SAMPLE).expect("parse");
        assert_eq!(config.socket_path, PathBuf::from("/tmp/test.sock"));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.programs.len(), 2);
        let web = config.programs.iter().find(|p| p.name == "web").expect("web");
        assert_eq!(web.command, vec!["/bin/sleep", "3600"]);
        assert_eq!(web.startretries, 3);
    }

    #[test]
    fn rejects_duplicate_program_sections() {
        let text = "[program:a]\ncommand = /bin/true\n[program:a]\ncommand = /bin/false\n";
        assert!(matches!(DaemonConfig::parse(text), Err(LoadError::DuplicateProgram(_))));
    }

    #[test]
    fn rejects_missing_command() {
        let text = "[program:a]\nautostart = true\n";
        assert!(matches!(DaemonConfig::parse(text), Err(LoadError::Malformed { .. })));
    }

    #[test]
    fn shell_split_honors_double_quotes() {
        assert_eq!(
            shell_split(r#"/bin/sh -c "sleep 5; echo done""#),
            vec!["/bin/sh", "-c", "sleep 5; echo done"]
        );
    }
}
