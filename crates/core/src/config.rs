//! Static, immutable program definitions. Constructed once by
//! `procd::config`'s configuration loading and shared read-only by every
//! `Process` built from them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Static definition of a managed program. See spec §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramConfig {
    pub name: String,
    pub command: Vec<String>,
    pub directory: Option<String>,
    pub user: Option<String>,
    pub environment: HashMap<String, String>,
    pub numprocs: u32,
    pub autostart: bool,
    pub autorestart: bool,
    pub startsecs: u64,
    pub startretries: u32,
    pub stopsignal: String,
    pub stopwaitsecs: u64,
    /// `%(process_num)s` is substituted with the zero-padded instance index.
    pub stdout_logfile: Option<String>,
    pub stderr_logfile: Option<String>,
    pub group: Option<String>,
    pub healthcheck: HealthCheckConfig,
}

impl ProgramConfig {
    /// Validates invariants from spec §3: `numprocs >= 1`, non-empty
    /// command, and whatever [`HealthCheckConfig::validate`] requires.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.numprocs == 0 {
            return Err(ConfigError::InvalidNumprocs {
                name: self.name.clone(),
                numprocs: self.numprocs,
            });
        }
        if self.command.is_empty() {
            return Err(ConfigError::EmptyCommand { name: self.name.clone() });
        }
        self.healthcheck.validate(&self.name)?;
        Ok(())
    }

    /// Resolves the group this program belongs to: the configured
    /// `group`, or an implicit singleton named after the program.
    pub fn group_name(&self) -> &str {
        self.group.as_deref().unwrap_or(&self.name)
    }

    /// Substitutes `%(process_num)s` in a log path template with the
    /// zero-padded instance index.
    pub fn render_log_path(template: &str, instance_index: u32) -> String {
        template.replace("%(process_num)s", &format!("{instance_index:02}"))
    }
}

/// Health-check configuration embedded in a [`ProgramConfig`]. See spec §3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(rename = "type")]
    pub kind: HealthCheckType,
    pub interval: u64,
    pub timeout: u64,
    pub retries: u32,
    pub start_period: u64,
    pub host: Option<String>,
    pub port: Option<u32>,
    pub command: Option<Vec<String>>,
}

impl HealthCheckConfig {
    fn validate(&self, program_name: &str) -> Result<(), ConfigError> {
        match self.kind {
            HealthCheckType::None => Ok(()),
            HealthCheckType::Tcp => {
                let port = self.port.ok_or_else(|| ConfigError::TcpHealthCheckMissingPort {
                    name: program_name.to_string(),
                })?;
                if port == 0 || port > 65535 {
                    return Err(ConfigError::HealthCheckPortOutOfRange {
                        name: program_name.to_string(),
                        port,
                    });
                }
                Ok(())
            }
            HealthCheckType::Script => {
                if self.command.as_ref().map(|c| c.is_empty()).unwrap_or(true) {
                    return Err(ConfigError::ScriptHealthCheckMissingCommand {
                        name: program_name.to_string(),
                    });
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckType {
    None,
    Tcp,
    Script,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_program;

    #[test]
    fn rejects_zero_numprocs() {
        let mut cfg = test_program("web", &["/bin/sleep", "1"]);
        cfg.numprocs = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InvalidNumprocs { name: "web".into(), numprocs: 0 })
        );
    }

    #[test]
    fn rejects_empty_command() {
        let mut cfg = test_program("web", &["/bin/sleep", "1"]);
        cfg.command.clear();
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyCommand { name: "web".into() }));
    }

    #[test]
    fn tcp_healthcheck_requires_port() {
        let mut cfg = test_program("web", &["/bin/sleep", "1"]);
        cfg.healthcheck.kind = HealthCheckType::Tcp;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::TcpHealthCheckMissingPort { name: "web".into() })
        );
        cfg.healthcheck.port = Some(0);
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::HealthCheckPortOutOfRange { name: "web".into(), port: 0 })
        );
        cfg.healthcheck.port = Some(8080);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn script_healthcheck_requires_command() {
        let mut cfg = test_program("web", &["/bin/sleep", "1"]);
        cfg.healthcheck.kind = HealthCheckType::Script;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ScriptHealthCheckMissingCommand { name: "web".into() })
        );
    }

    #[test]
    fn group_name_defaults_to_program_name() {
        let cfg = test_program("web", &["/bin/sleep", "1"]);
        assert_eq!(cfg.group_name(), "web");
    }

    #[test]
    fn render_log_path_substitutes_process_num() {
        let rendered = ProgramConfig::render_log_path("/var/log/web-%(process_num)s.log", 3);
        assert_eq!(rendered, "/var/log/web-03.log");
    }
}
