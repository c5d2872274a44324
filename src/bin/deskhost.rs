use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use deskctl::config::{load_config, resolve_config_path, resolve_project_root, Config};
use deskctl::container::{ContainerLifecycleManager, StartOutcome, StopOutcome};
use deskctl::credentials::resolve_identity;
use deskctl::error::DeskError;
use deskctl::exec::{
    detect_remote_self, ExecutionContext, HostIdentity, ProcessRunner, RemoteExecutor, SshTarget,
    SystemHost, SystemRunner,
};
use deskctl::logging;
use deskctl::output::{fail, parse_args, print_ok, success};
use deskctl::report::{default_battery, HostContextReporter};
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "deskhost",
    version,
    about = "Manage the desktop container on the host"
)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,
    /// Where commands run. `auto` treats any Linux machine whose hostname differs from
    /// remote.workstation_hostname as the host; use `proxy` on a Linux workstation
    /// when that setting is empty.
    #[arg(long, global = true, value_enum, default_value_t = ContextMode::Auto)]
    context: ContextMode,
    #[arg(long, global = true)]
    json: bool,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ContextMode {
    Auto,
    Proxy,
    Local,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the desktop container, creating it if needed
    Start,
    /// Stop the desktop container
    Stop,
    /// Recreate the desktop container from its image
    Restart,
    /// Show container state, ports and recent logs
    Status,
    /// Report host diagnostics
    Context,
}

struct Host {
    config: Config,
    context: ExecutionContext,
    json: bool,
}

fn main() -> Result<(), DeskError> {
    let Cli {
        config,
        project_root,
        context,
        json,
        verbose,
        command,
    } = parse_args();
    logging::init(verbose);

    let Some(command) = command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let runner = SystemRunner;
    let result = build_host(config, project_root, context, json).and_then(|host| {
        let exec = RemoteExecutor::new(&runner, host.context.clone());
        match command {
            Commands::Start => handle_start(&host, &exec),
            Commands::Stop => handle_stop(&host, &exec),
            Commands::Restart => handle_restart(&host, &exec),
            Commands::Status => handle_status(&host, &exec),
            Commands::Context => handle_context(&host, &exec),
        }
    });

    if let Err(err) = result {
        fail(&err, json);
    }
    Ok(())
}

fn build_host(
    config: Option<PathBuf>,
    project_root: Option<PathBuf>,
    mode: ContextMode,
    json: bool,
) -> Result<Host, DeskError> {
    let config_path = resolve_config_path(config.as_ref());
    let config = load_config(&config_path)?;
    let project_root = resolve_project_root(project_root.as_ref());
    let remote_self = match mode {
        ContextMode::Local => true,
        ContextMode::Proxy => false,
        ContextMode::Auto => detect_remote_self(&SystemHost, &config.remote.workstation_hostname),
    };
    let context = if remote_self {
        ExecutionContext::RemoteSelf
    } else {
        let identity = resolve_identity(&project_root, &config)?;
        which::which("ssh").map_err(|_| {
            DeskError::Config("`ssh` was not found on PATH; install it and retry".to_string())
        })?;
        ExecutionContext::Proxy(SshTarget::from(&identity))
    };
    tracing::debug!(
        config = %config_path.display(),
        remote_self,
        "selected execution context"
    );
    Ok(Host {
        config,
        context,
        json,
    })
}

/// Hostname used when printing service endpoints.
fn endpoint_host(host: &Host) -> String {
    match &host.context {
        ExecutionContext::Proxy(target) => target.host.clone(),
        ExecutionContext::RemoteSelf => {
            let configured = host.config.remote.host.trim();
            if !configured.is_empty() {
                return configured.to_string();
            }
            SystemHost
                .hostname()
                .unwrap_or_else(|| "localhost".to_string())
        }
    }
}

fn endpoints(host: &Host) -> Vec<String> {
    let name = endpoint_host(host);
    host.config
        .container
        .ports
        .iter()
        .map(|port| format!("{name}:{port}"))
        .collect()
}

fn print_endpoints(host: &Host) {
    for endpoint in endpoints(host) {
        println!("  {endpoint}");
    }
}

fn handle_start<R: ProcessRunner>(host: &Host, exec: &RemoteExecutor<'_, R>) -> Result<(), DeskError> {
    let manager = ContainerLifecycleManager::new(exec, &host.config.container);
    let outcome = manager.start()?;
    if host.json {
        return print_ok(json!({
            "container": manager.name(),
            "outcome": outcome,
            "endpoints": endpoints(host),
        }));
    }
    match outcome {
        StartOutcome::AlreadyRunning => println!("Container '{}' is already running", manager.name()),
        StartOutcome::StartedExisting => success(&format!("Started existing container '{}'", manager.name())),
        StartOutcome::Created => success(&format!("Created and started container '{}'", manager.name())),
    }
    println!("Desktop is available at:");
    print_endpoints(host);
    Ok(())
}

fn handle_stop<R: ProcessRunner>(host: &Host, exec: &RemoteExecutor<'_, R>) -> Result<(), DeskError> {
    let manager = ContainerLifecycleManager::new(exec, &host.config.container);
    let outcome = manager.stop()?;
    if host.json {
        return print_ok(json!({ "container": manager.name(), "outcome": outcome }));
    }
    match outcome {
        StopOutcome::Stopped => success(&format!("Stopped container '{}'", manager.name())),
        StopOutcome::NotRunning => println!("Container '{}' is not running", manager.name()),
    }
    Ok(())
}

fn handle_restart<R: ProcessRunner>(host: &Host, exec: &RemoteExecutor<'_, R>) -> Result<(), DeskError> {
    let manager = ContainerLifecycleManager::new(exec, &host.config.container);
    let outcome = manager.restart()?;
    if host.json {
        return print_ok(json!({
            "container": manager.name(),
            "stopped": outcome.stopped,
            "removed": outcome.removed,
            "endpoints": endpoints(host),
        }));
    }
    if outcome.removed {
        println!("Removed previous container '{}'", manager.name());
    }
    success(&format!("Recreated container '{}'", manager.name()));
    println!("Desktop is available at:");
    print_endpoints(host);
    Ok(())
}

fn handle_status<R: ProcessRunner>(host: &Host, exec: &RemoteExecutor<'_, R>) -> Result<(), DeskError> {
    let report = ContainerLifecycleManager::new(exec, &host.config.container).status();
    if host.json {
        return print_ok(json!(report));
    }
    print!("{}", report.render(&endpoint_host(host)));
    Ok(())
}

fn handle_context<R: ProcessRunner>(host: &Host, exec: &RemoteExecutor<'_, R>) -> Result<(), DeskError> {
    let rdp_port = host.config.container.ports.first().copied().unwrap_or(3389);
    let probes = default_battery(host.config.container.sudo, rdp_port);
    let report = HostContextReporter::new(exec, probes).gather();
    let missing = report.unavailable_count();
    if missing > 0 {
        tracing::warn!(missing, "some host context probes were unavailable");
    }
    if host.json {
        return print_ok(json!(report));
    }
    print!("{}", report.render());
    Ok(())
}
