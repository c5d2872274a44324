//! Command execution against the desktop host, either over SSH or in-process
//! when already running on the host.

use crate::credentials::Identity;
use crate::error::{DeskError, ProcessErrorDetails};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

pub trait ProcessRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        capture_output: bool,
    ) -> Result<CommandOutput, io::Error>;
}

pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        capture_output: bool,
    ) -> Result<CommandOutput, io::Error> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if capture_output {
            let output = cmd.output()?;
            let status_code =
                output
                    .status
                    .code()
                    .unwrap_or(if output.status.success() { 0 } else { 1 });
            Ok(CommandOutput {
                status_code,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        } else {
            let status = cmd.status()?;
            let status_code = status
                .code()
                .unwrap_or(if status.success() { 0 } else { 1 });
            Ok(CommandOutput {
                status_code,
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CommandKind {
    Argv(Vec<String>),
    Script(String),
}

/// A command destined for a shell on the host. Argument lists are quoted when
/// rendered; scripts are passed through untouched for pipelines and fallbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    kind: CommandKind,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Argv(vec![program.into()]),
        }
    }

    pub fn script(script: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::Script(script.into()),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        let arg = arg.into();
        match &mut self.kind {
            CommandKind::Argv(argv) => argv.push(arg),
            CommandKind::Script(script) => {
                script.push(' ');
                script.push_str(&shell_quote(&arg));
            }
        }
        self
    }

    pub fn args<I, S>(self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        args.into_iter().fold(self, |cmd, arg| cmd.arg(arg))
    }

    pub fn to_shell_line(&self) -> String {
        match &self.kind {
            CommandKind::Argv(argv) => argv
                .iter()
                .map(|part| shell_quote(part))
                .collect::<Vec<_>>()
                .join(" "),
            CommandKind::Script(script) => script.clone(),
        }
    }

    /// Program and arguments for running the command on this machine.
    pub fn local_invocation(&self) -> (String, Vec<String>) {
        match &self.kind {
            CommandKind::Argv(argv) => {
                let program = argv.first().cloned().unwrap_or_default();
                (program, argv.iter().skip(1).cloned().collect())
            }
            CommandKind::Script(script) => {
                ("sh".to_string(), vec!["-c".to_string(), script.clone()])
            }
        }
    }
}

fn is_shell_safe(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || "_@%+=:,./-~".contains(ch)
}

pub fn shell_quote(value: &str) -> String {
    if !value.is_empty() && value.chars().all(is_shell_safe) {
        return value.to_string();
    }
    shell_single_quote(value)
}

fn shell_single_quote(value: &str) -> String {
    // foo'bar -> 'foo'\''bar'
    let mut out = String::new();
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

pub fn render_command(program: &str, args: &[String]) -> String {
    fn display_quote(part: &str) -> String {
        if part.is_empty() {
            return "\"\"".to_string();
        }
        if part.chars().any(|c| c.is_whitespace()) {
            return format!("\"{}\"", part.replace('"', "\\\""));
        }
        part.to_string()
    }
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program.to_string());
    parts.extend(args.iter().map(|arg| display_quote(arg)));
    parts.join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub key_path: PathBuf,
    pub user: String,
    pub host: String,
}

impl From<&Identity> for SshTarget {
    fn from(identity: &Identity) -> Self {
        Self {
            key_path: identity.ssh_key_path.clone(),
            user: identity.remote_user.clone(),
            host: identity.remote_host.clone(),
        }
    }
}

impl SshTarget {
    fn key_arg(&self) -> String {
        self.key_path.to_string_lossy().to_string()
    }

    fn trust_options() -> Vec<String> {
        vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
        ]
    }

    pub fn ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.key_arg(),
            "-l".to_string(),
            self.user.clone(),
        ];
        args.extend(Self::trust_options());
        args.push(self.host.clone());
        args.push(command.to_string());
        args
    }

    /// Arguments for an interactive, verbose login shell.
    pub fn interactive_args(&self) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.key_arg(),
            "-l".to_string(),
            self.user.clone(),
            "-v".to_string(),
            self.host.clone(),
        ]
    }

    pub fn scp_args(&self, local_path: &Path, remote_path: &str) -> Vec<String> {
        let mut args = vec!["-i".to_string(), self.key_arg()];
        args.extend(Self::trust_options());
        args.push(local_path.to_string_lossy().to_string());
        args.push(format!("{}@{}:{}", self.user, self.host, remote_path));
        args
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Wrap every command in SSH to the host.
    Proxy(SshTarget),
    /// This process is already running on the host.
    RemoteSelf,
}

pub trait HostIdentity {
    fn hostname(&self) -> Option<String>;
    fn is_linux_host(&self) -> bool;
}

pub struct SystemHost;

impl HostIdentity for SystemHost {
    fn hostname(&self) -> Option<String> {
        let output = Command::new("hostname").output();
        if let Ok(output) = output {
            if output.status.success() {
                let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
        fs::read_to_string("/proc/sys/kernel/hostname")
            .ok()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    }

    fn is_linux_host(&self) -> bool {
        Path::new("/proc/version").exists()
    }
}

/// True when this process should run commands directly rather than over SSH.
pub fn detect_remote_self(host: &dyn HostIdentity, workstation_hostname: &str) -> bool {
    if !host.is_linux_host() {
        return false;
    }
    if workstation_hostname.trim().is_empty() {
        tracing::warn!(
            "remote.workstation_hostname is not set, so any Linux machine counts as the host; \
             set it or pass --context proxy"
        );
    }
    match host.hostname() {
        Some(name) => name != workstation_hostname.trim(),
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub succeeded: bool,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

pub struct RemoteExecutor<'a, R: ProcessRunner> {
    runner: &'a R,
    context: ExecutionContext,
}

impl<'a, R: ProcessRunner> RemoteExecutor<'a, R> {
    pub fn new(runner: &'a R, context: ExecutionContext) -> Self {
        Self { runner, context }
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    fn invocation(&self, command: &ShellCommand) -> (String, Vec<String>) {
        match &self.context {
            ExecutionContext::Proxy(target) => {
                ("ssh".to_string(), target.ssh_args(&command.to_shell_line()))
            }
            ExecutionContext::RemoteSelf => command.local_invocation(),
        }
    }

    /// Runs `command` once. A nonzero exit is reported through the result, not as an error.
    pub fn execute(&self, command: &ShellCommand) -> Result<CommandResult, DeskError> {
        let (program, args) = self.invocation(command);
        let rendered = render_command(&program, &args);
        tracing::debug!(command = %rendered, "executing");
        let output = self
            .runner
            .run(&program, &args, true)
            .map_err(|err| DeskError::RemoteCommand {
                message: format!("failed to run command `{rendered}`: {err}"),
                details: spawn_error_details(&err, &program, &rendered),
            })?;
        let result = CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            succeeded: output.success(),
            exit_code: output.status_code,
        };
        if !result.succeeded {
            tracing::debug!(
                command = %rendered,
                exit_code = result.exit_code,
                "command exited with nonzero status"
            );
        }
        Ok(result)
    }

    /// Like [`execute`](Self::execute) but turns a nonzero exit into a `RemoteCommand` error.
    pub fn execute_checked(&self, command: &ShellCommand) -> Result<CommandResult, DeskError> {
        let result = self.execute(command)?;
        if result.succeeded {
            return Ok(result);
        }
        let shown = command.to_shell_line();
        let (message, details) = failure_details(&result, &shown);
        Err(DeskError::RemoteCommand { message, details })
    }

    pub fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<(), DeskError> {
        let (program, args) = match &self.context {
            ExecutionContext::Proxy(target) => ("scp".to_string(), target.scp_args(local_path, remote_path)),
            ExecutionContext::RemoteSelf => (
                "cp".to_string(),
                vec![
                    local_path.to_string_lossy().to_string(),
                    crate::config::expand_path(remote_path),
                ],
            ),
        };
        let rendered = render_command(&program, &args);
        tracing::debug!(command = %rendered, "uploading");
        let output = self
            .runner
            .run(&program, &args, true)
            .map_err(|err| DeskError::Upload {
                message: format!("failed to run command `{rendered}`: {err}"),
                details: spawn_error_details(&err, &program, &rendered),
            })?;
        if !output.success() {
            let result = CommandResult {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                succeeded: false,
                exit_code: output.status_code,
            };
            let (message, details) = failure_details(&result, &rendered);
            return Err(DeskError::Upload { message, details });
        }
        Ok(())
    }
}

fn spawn_error_details(err: &io::Error, program: &str, command: &str) -> ProcessErrorDetails {
    if err.kind() == io::ErrorKind::NotFound {
        let error_code = if program == "ssh" || program == "scp" {
            "ssh_not_found".to_string()
        } else {
            "command_not_found".to_string()
        };
        return ProcessErrorDetails {
            error_code,
            hint: Some(format!("Install `{program}` and ensure it is on your PATH.")),
            command: Some(command.to_string()),
            raw_stderr: None,
        };
    }
    ProcessErrorDetails {
        error_code: "process_command_failed".to_string(),
        hint: None,
        command: Some(command.to_string()),
        raw_stderr: None,
    }
}

fn failure_details(result: &CommandResult, command: &str) -> (String, ProcessErrorDetails) {
    let stderr = result.stderr.trim().to_string();
    let (error_code, hint) = classify_ssh_failure(&stderr);
    let mut message = format!(
        "command failed with status {} while running `{}`",
        result.exit_code, command
    );
    if !stderr.is_empty() {
        message = format!("{message}: {stderr}");
    } else if !result.stdout.trim().is_empty() {
        message = format!("{message}: {}", result.stdout.trim());
    }
    if let Some(ref hint_message) = hint {
        message = format!("{message}\nHint: {hint_message}");
    }
    let details = ProcessErrorDetails {
        error_code,
        hint,
        command: Some(command.to_string()),
        raw_stderr: if stderr.is_empty() { None } else { Some(stderr) },
    };
    (message, details)
}

pub fn classify_ssh_failure(stderr: &str) -> (String, Option<String>) {
    let lower = stderr.to_lowercase();

    if lower.contains("permission denied (publickey")
        || lower.contains("too many authentication failures")
        || lower.contains("bad permissions")
    {
        return (
            "ssh_auth_failed".to_string(),
            Some(
                "The host rejected the key. Check the admin key under the secrets directory and remote.user in the config."
                    .to_string(),
            ),
        );
    }

    if lower.contains("could not resolve hostname") || lower.contains("name or service not known")
    {
        return (
            "ssh_host_unresolved".to_string(),
            Some("Check remote.host in the config.".to_string()),
        );
    }

    if lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("no route to host")
        || lower.contains("network is unreachable")
    {
        return (
            "ssh_host_unreachable".to_string(),
            Some("The host is not reachable. Is the instance running? Try `deskctl compute_status`.".to_string()),
        );
    }

    ("process_command_failed".to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{failed, ok, MockRunner};

    struct FixedHost {
        name: Option<&'static str>,
        linux: bool,
    }

    impl HostIdentity for FixedHost {
        fn hostname(&self) -> Option<String> {
            self.name.map(ToString::to_string)
        }

        fn is_linux_host(&self) -> bool {
            self.linux
        }
    }

    fn target() -> SshTarget {
        SshTarget {
            key_path: PathBuf::from("K"),
            user: "ops".to_string(),
            host: "H".to_string(),
        }
    }

    #[test]
    fn argv_commands_are_quoted_for_the_shell() {
        let cmd = ShellCommand::new("sudo")
            .arg("docker")
            .arg("ps")
            .arg("--format")
            .arg("{{.Names}}");
        assert_eq!(cmd.to_shell_line(), "sudo docker ps --format '{{.Names}}'");
        let cmd = ShellCommand::new("echo").arg("it's");
        assert_eq!(cmd.to_shell_line(), "echo 'it'\\''s'");
    }

    #[test]
    fn scripts_pass_through() {
        let cmd = ShellCommand::script("free -h | grep '^Mem:'");
        assert_eq!(cmd.to_shell_line(), "free -h | grep '^Mem:'");
        let (program, args) = cmd.local_invocation();
        assert_eq!(program, "sh");
        assert_eq!(args, vec!["-c", "free -h | grep '^Mem:'"]);
    }

    #[test]
    fn proxy_mode_wraps_command_in_ssh() {
        let runner = MockRunner::default();
        runner.push_output(ok("desk-host\n"));
        let exec = RemoteExecutor::new(&runner, ExecutionContext::Proxy(target()));
        let result = exec.execute(&ShellCommand::new("hostname")).expect("execute");
        assert!(result.succeeded);
        assert_eq!(result.trimmed(), "desk-host");

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "ssh");
        let args = &calls[0].args;
        assert!(args.windows(2).any(|w| w == ["-i", "K"]));
        assert!(args.windows(2).any(|w| w == ["-l", "ops"]));
        assert!(args.windows(2).any(|w| w == ["-o", "StrictHostKeyChecking=no"]));
        assert!(args.windows(2).any(|w| w == ["-o", "UserKnownHostsFile=/dev/null"]));
        assert_eq!(args[args.len() - 2], "H");
        assert_eq!(args[args.len() - 1], "hostname");
    }

    #[test]
    fn nonzero_exit_is_reported_not_raised() {
        let runner = MockRunner::default();
        runner.push_output(failed(255, "ssh: connect to host H port 22: Connection refused"));
        let exec = RemoteExecutor::new(&runner, ExecutionContext::Proxy(target()));
        let result = exec.execute(&ShellCommand::new("hostname")).expect("execute");
        assert!(!result.succeeded);
        assert_eq!(result.exit_code, 255);
    }

    #[test]
    fn checked_execution_classifies_failure() {
        let runner = MockRunner::default();
        runner.push_output(failed(255, "ops@H: Permission denied (publickey)."));
        let exec = RemoteExecutor::new(&runner, ExecutionContext::Proxy(target()));
        let err = exec
            .execute_checked(&ShellCommand::new("uptime"))
            .expect_err("should fail");
        match err {
            DeskError::RemoteCommand { message, details } => {
                assert!(message.contains("status 255"));
                assert_eq!(details.error_code, "ssh_auth_failed");
                assert_eq!(details.command.as_deref(), Some("uptime"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn remote_self_runs_locally() {
        let runner = MockRunner::default();
        let exec = RemoteExecutor::new(&runner, ExecutionContext::RemoteSelf);
        exec.execute(&ShellCommand::new("sudo").args(["docker", "ps"]))
            .expect("execute");
        exec.execute(&ShellCommand::script("uptime -p")).expect("execute");
        let calls = runner.calls();
        assert_eq!(calls[0].program, "sudo");
        assert_eq!(calls[0].args, vec!["docker", "ps"]);
        assert_eq!(calls[1].program, "sh");
        assert_eq!(calls[1].args, vec!["-c", "uptime -p"]);
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let runner = MockRunner::default();
        runner.fail_spawn(io::ErrorKind::NotFound);
        let exec = RemoteExecutor::new(&runner, ExecutionContext::Proxy(target()));
        let err = exec.execute(&ShellCommand::new("hostname")).expect_err("spawn");
        let details = err.process_details().expect("details");
        assert_eq!(details.error_code, "ssh_not_found");
    }

    #[test]
    fn upload_uses_scp_with_same_identity() {
        let runner = MockRunner::default();
        let exec = RemoteExecutor::new(&runner, ExecutionContext::Proxy(target()));
        exec.upload_file(Path::new("/tmp/deskhost"), "~/deskhost")
            .expect("upload");
        let calls = runner.calls();
        assert_eq!(calls[0].program, "scp");
        assert!(calls[0].args.windows(2).any(|w| w == ["-i", "K"]));
        assert_eq!(calls[0].args.last().unwrap(), "ops@H:~/deskhost");
    }

    #[test]
    fn upload_failure_is_upload_error() {
        let runner = MockRunner::default();
        runner.push_output(failed(1, "scp: /home/ops: Permission denied"));
        let exec = RemoteExecutor::new(&runner, ExecutionContext::Proxy(target()));
        let err = exec
            .upload_file(Path::new("/tmp/deskhost"), "~/deskhost")
            .expect_err("upload");
        assert!(matches!(err, DeskError::Upload { .. }));
    }

    #[test]
    fn detection_prefers_proxy_on_workstation() {
        let workstation = FixedHost {
            name: Some("ops-laptop"),
            linux: true,
        };
        assert!(!detect_remote_self(&workstation, "ops-laptop"));
        let host = FixedHost {
            name: Some("desk-host-1"),
            linux: true,
        };
        assert!(detect_remote_self(&host, "ops-laptop"));
        let mac = FixedHost {
            name: Some("desk-host-1"),
            linux: false,
        };
        assert!(!detect_remote_self(&mac, "ops-laptop"));
    }

    #[derive(Clone, Default)]
    struct SharedLog(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl io::Write for SharedLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unset_workstation_name_warns_on_linux() {
        let log = SharedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let host = FixedHost {
            name: Some("ops-laptop"),
            linux: true,
        };
        let remote_self =
            tracing::subscriber::with_default(subscriber, || detect_remote_self(&host, " "));
        assert!(remote_self);
        let text = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("WARN"));
        assert!(text.contains("workstation_hostname is not set"));
        assert!(text.contains("--context proxy"));
    }

    #[test]
    fn ssh_failures_classify() {
        assert_eq!(
            classify_ssh_failure("ssh: Could not resolve hostname nope").0,
            "ssh_host_unresolved"
        );
        assert_eq!(
            classify_ssh_failure("connect to host 1.2.3.4 port 22: Connection timed out").0,
            "ssh_host_unreachable"
        );
        assert_eq!(classify_ssh_failure("weird").0, "process_command_failed");
    }
}
