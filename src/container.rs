//! Idempotent lifecycle for the single named desktop container.
//!
//! Nothing is stored locally: every transition re-queries the host's process
//! table, and the container name is the only key.

use crate::config::ContainerConfig;
use crate::error::DeskError;
use crate::exec::{ProcessRunner, RemoteExecutor, ShellCommand};
use serde::Serialize;
use std::fmt::Write as _;
use std::thread;
use std::time::Duration;

pub const UNAVAILABLE: &str = "unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Absent,
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    AlreadyRunning,
    StartedExisting,
    Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RestartOutcome {
    pub stopped: bool,
    pub removed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortCheck {
    pub port: u16,
    pub listening: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerStatusReport {
    pub name: String,
    pub table: Option<String>,
    pub running: Option<bool>,
    pub ports: Vec<PortCheck>,
    pub logs: Option<String>,
}

pub struct ContainerLifecycleManager<'a, R: ProcessRunner> {
    exec: &'a RemoteExecutor<'a, R>,
    container: &'a ContainerConfig,
    settle: Duration,
}

fn names_match(stdout: &str, name: &str) -> bool {
    stdout.lines().any(|line| line.trim() == name)
}

impl<'a, R: ProcessRunner> ContainerLifecycleManager<'a, R> {
    pub fn new(exec: &'a RemoteExecutor<'a, R>, container: &'a ContainerConfig) -> Self {
        Self {
            exec,
            container,
            settle: Duration::from_secs(container.settle_secs),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn name(&self) -> &str {
        &self.container.name
    }

    fn docker(&self) -> ShellCommand {
        if self.container.sudo {
            ShellCommand::new("sudo").arg("docker")
        } else {
            ShellCommand::new("docker")
        }
    }

    fn sudo_prefix(&self) -> &'static str {
        if self.container.sudo {
            "sudo "
        } else {
            ""
        }
    }

    fn ps_query(&self, all: bool) -> ShellCommand {
        let mut cmd = self.docker().arg("ps");
        if all {
            cmd = cmd.arg("-a");
        }
        cmd.arg("--filter")
            .arg(format!("name={}", self.container.name))
            .arg("--format")
            .arg("{{.Names}}")
    }

    pub fn run_new_command(&self) -> ShellCommand {
        let mut cmd = self
            .docker()
            .args(["run", "-d", "--name"])
            .arg(self.container.name.clone());
        for port in &self.container.ports {
            cmd = cmd.arg("-p").arg(format!("{port}:{port}"));
        }
        if self.container.privileged {
            cmd = cmd.arg("--privileged");
        }
        cmd.arg(self.container.image.clone())
    }

    pub fn is_running(&self) -> Result<bool, DeskError> {
        let result = self.exec.execute_checked(&self.ps_query(false))?;
        Ok(names_match(&result.stdout, &self.container.name))
    }

    pub fn exists(&self) -> Result<bool, DeskError> {
        let result = self.exec.execute_checked(&self.ps_query(true))?;
        Ok(names_match(&result.stdout, &self.container.name))
    }

    pub fn state(&self) -> Result<ContainerState, DeskError> {
        if self.is_running()? {
            return Ok(ContainerState::Running);
        }
        if self.exists()? {
            return Ok(ContainerState::Stopped);
        }
        Ok(ContainerState::Absent)
    }

    pub fn start(&self) -> Result<StartOutcome, DeskError> {
        if self.is_running()? {
            tracing::info!(container = %self.container.name, "container already running");
            return Ok(StartOutcome::AlreadyRunning);
        }
        let outcome = if self.exists()? {
            tracing::info!(container = %self.container.name, "starting existing container");
            self.exec
                .execute_checked(&self.docker().arg("start").arg(self.container.name.clone()))?;
            StartOutcome::StartedExisting
        } else {
            tracing::info!(container = %self.container.name, "creating new container");
            self.exec.execute_checked(&self.run_new_command())?;
            StartOutcome::Created
        };
        self.verify_running()?;
        Ok(outcome)
    }

    pub fn stop(&self) -> Result<StopOutcome, DeskError> {
        if !self.is_running()? {
            return Ok(StopOutcome::NotRunning);
        }
        self.exec
            .execute_checked(&self.docker().arg("stop").arg(self.container.name.clone()))?;
        Ok(StopOutcome::Stopped)
    }

    pub fn restart(&self) -> Result<RestartOutcome, DeskError> {
        let stopped = matches!(self.stop()?, StopOutcome::Stopped);
        let removed = if self.exists()? {
            tracing::info!(container = %self.container.name, "removing existing container");
            self.exec
                .execute_checked(&self.docker().arg("rm").arg(self.container.name.clone()))?;
            true
        } else {
            false
        };
        self.exec.execute_checked(&self.run_new_command())?;
        self.verify_running()?;
        Ok(RestartOutcome { stopped, removed })
    }

    fn verify_running(&self) -> Result<(), DeskError> {
        if !self.settle.is_zero() {
            thread::sleep(self.settle);
        }
        if self.is_running()? {
            return Ok(());
        }
        Err(DeskError::StartVerification(format!(
            "container '{}' is not running after {}s",
            self.container.name,
            self.settle.as_secs()
        )))
    }

    fn probe(&self, command: &ShellCommand) -> Option<String> {
        match self.exec.execute(command) {
            Ok(result) if result.succeeded => Some(result.stdout),
            Ok(result) => {
                tracing::warn!(
                    command = %command.to_shell_line(),
                    exit_code = result.exit_code,
                    "status probe failed"
                );
                None
            }
            Err(err) => {
                tracing::warn!(command = %command.to_shell_line(), error = %err, "status probe failed");
                None
            }
        }
    }

    fn port_check(&self, port: u16) -> PortCheck {
        let command = ShellCommand::script(format!(
            "{}netstat -tlnp | grep ':{port} '",
            self.sudo_prefix()
        ));
        let needle = format!(":{port} ");
        let listening = match self.exec.execute(&command) {
            Ok(result) if result.succeeded => Some(result.stdout.contains(&needle)),
            // grep exits 1 when nothing matched
            Ok(result) if result.exit_code == 1 => Some(false),
            _ => None,
        };
        PortCheck { port, listening }
    }

    /// Read-only composite report. Each probe degrades on its own.
    pub fn status(&self) -> ContainerStatusReport {
        let table_query = self
            .docker()
            .args(["ps", "-a", "--filter"])
            .arg(format!("name={}", self.container.name))
            .arg("--format")
            .arg("table {{.Names}}\t{{.Status}}\t{{.Ports}}\t{{.Image}}");
        let table = self.probe(&table_query);
        let running = self
            .probe(&self.ps_query(false))
            .map(|stdout| names_match(&stdout, &self.container.name));
        let ports = self
            .container
            .ports
            .iter()
            .map(|port| self.port_check(*port))
            .collect();
        let logs = self.probe(&ShellCommand::script(format!(
            "{}docker logs --tail {} {} 2>&1",
            self.sudo_prefix(),
            self.container.log_lines,
            crate::exec::shell_quote(&self.container.name)
        )));
        ContainerStatusReport {
            name: self.container.name.clone(),
            table,
            running,
            ports,
            logs,
        }
    }
}

fn table_has_rows(table: &str) -> bool {
    table.lines().skip(1).any(|line| !line.trim().is_empty())
}

impl ContainerStatusReport {
    pub fn render(&self, host: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Container status for '{}'", self.name);
        let _ = writeln!(out, "{}", "=".repeat(60));
        match self.table.as_deref() {
            Some(table) if table_has_rows(table) => {
                let _ = writeln!(out, "Container table:");
                let _ = writeln!(out, "{}", table.trim_end());
            }
            Some(_) => {
                let _ = writeln!(out, "No '{}' container found on the host", self.name);
            }
            None => {
                let _ = writeln!(out, "Container table: {UNAVAILABLE}");
            }
        }
        let _ = writeln!(out);
        match self.running {
            Some(true) => {
                let _ = writeln!(out, "Container is RUNNING");
                for check in &self.ports {
                    let _ = writeln!(out, "  endpoint: {host}:{}", check.port);
                }
            }
            Some(false) => {
                let _ = writeln!(out, "Container is NOT RUNNING");
                let _ = writeln!(out, "  use 'start' to start the container");
            }
            None => {
                let _ = writeln!(out, "Running state: {UNAVAILABLE}");
            }
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Port checks:");
        for check in &self.ports {
            let state = match check.listening {
                Some(true) => "listening",
                Some(false) => "not listening",
                None => UNAVAILABLE,
            };
            let _ = writeln!(out, "  {}: {state}", check.port);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Recent container logs:");
        match self.logs.as_deref().map(str::trim) {
            Some("") => {
                let _ = writeln!(out, "No logs available");
            }
            Some(logs) => {
                let _ = writeln!(out, "{logs}");
            }
            None => {
                let _ = writeln!(out, "{UNAVAILABLE}");
            }
        }
        out
    }
}
