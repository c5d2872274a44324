use clap::{CommandFactory, Parser, Subcommand};
use deskctl::compute::{render_instances, ComputeProvisioner, StopComputeOutcome};
use deskctl::config::{load_config, project_path, resolve_config_path, resolve_project_root, Config};
use deskctl::credentials::{resolve_identity, Identity};
use deskctl::deploy::deploy_controller;
use deskctl::env_file::CloudProfile;
use deskctl::error::DeskError;
use deskctl::exec::{
    render_command, ExecutionContext, ProcessRunner, RemoteExecutor, SshTarget, SystemRunner,
};
use deskctl::logging;
use deskctl::output::{fail, parse_args, print_ok, success};
use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;
use serde_json::json;
use std::env;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::Command;

#[derive(Parser, Debug)]
#[command(
    name = "deskctl",
    version,
    about = "Provision the desktop host and deploy its controller"
)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "snake_case")]
enum Commands {
    /// Open an SSH shell on the host as the admin user
    RootShell,
    /// Upload the host controller and prepare the host to run it
    UploadRun,
    /// Create the cloud CLI profile from the secrets env file
    ProfileCreate,
    /// Create a new compute instance
    StartCompute,
    /// Stop the first running compute instance
    StopCompute {
        #[arg(long)]
        yes: bool,
    },
    /// List compute instances
    ComputeStatus,
}

#[derive(Debug)]
struct Context {
    project_root: PathBuf,
    config: Config,
    json: bool,
}

fn main() -> Result<(), DeskError> {
    let Cli {
        config,
        project_root,
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
    let result = build_context(config, project_root, json).and_then(|ctx| match command {
        Commands::RootShell => handle_root_shell(&ctx),
        Commands::UploadRun => handle_upload_run(&ctx, &runner),
        Commands::ProfileCreate => handle_profile_create(&ctx, &runner),
        Commands::StartCompute => handle_start_compute(&ctx, &runner),
        Commands::StopCompute { yes } => handle_stop_compute(&ctx, &runner, yes),
        Commands::ComputeStatus => handle_compute_status(&ctx, &runner),
    });

    if let Err(err) = result {
        fail(&err, json);
    }
    Ok(())
}

fn build_context(
    config: Option<PathBuf>,
    project_root: Option<PathBuf>,
    json: bool,
) -> Result<Context, DeskError> {
    let config_path = resolve_config_path(config.as_ref());
    let config = load_config(&config_path)?;
    let project_root = resolve_project_root(project_root.as_ref());
    tracing::debug!(
        config = %config_path.display(),
        project_root = %project_root.display(),
        "resolved context"
    );
    Ok(Context {
        project_root,
        config,
        json,
    })
}

fn ensure_on_path(program: &str) -> Result<(), DeskError> {
    which::which(program).map(|_| ()).map_err(|_| {
        DeskError::Config(format!(
            "`{program}` was not found on PATH; install it and retry"
        ))
    })
}

fn load_profile(ctx: &Context) -> Result<CloudProfile, DeskError> {
    let env_file = project_path(&ctx.project_root, &ctx.config.secrets.env_file);
    let profile = CloudProfile::load(&env_file)?;
    ensure_on_path(&ctx.config.compute.cli)?;
    Ok(profile)
}

fn handle_root_shell(ctx: &Context) -> Result<(), DeskError> {
    let identity = resolve_identity(&ctx.project_root, &ctx.config)?;
    ensure_on_path("ssh")?;
    let args = SshTarget::from(&identity).interactive_args();
    println!(
        "Opening SSH shell to {}@{}...",
        identity.remote_user, identity.remote_host
    );
    exec_interactive("ssh", &args)
}

#[cfg(unix)]
fn exec_interactive(program: &str, args: &[String]) -> Result<(), DeskError> {
    use std::os::unix::process::CommandExt;
    tracing::debug!(command = %render_command(program, args), "replacing process");
    // exec only returns on failure
    let err = Command::new(program).args(args).exec();
    Err(DeskError::Io(err))
}

#[cfg(not(unix))]
fn exec_interactive(program: &str, args: &[String]) -> Result<(), DeskError> {
    use deskctl::error::ProcessErrorDetails;
    let command = render_command(program, args);
    let status = Command::new(program).args(args).status()?;
    if status.success() {
        return Ok(());
    }
    Err(DeskError::RemoteCommand {
        message: format!("command failed with status {status} while running `{command}`"),
        details: ProcessErrorDetails {
            error_code: "process_command_failed".to_string(),
            hint: None,
            command: Some(command),
            raw_stderr: None,
        },
    })
}

fn deploy_source(ctx: &Context) -> Result<PathBuf, DeskError> {
    if let Some(path) = ctx.config.deploy.local_path.as_deref() {
        return Ok(project_path(&ctx.project_root, path));
    }
    let exe = env::current_exe()?;
    let dir = exe.parent().ok_or_else(|| {
        DeskError::Config("cannot locate the directory of the running executable".to_string())
    })?;
    Ok(dir.join(format!("deskhost{}", env::consts::EXE_SUFFIX)))
}

fn handle_upload_run<R: ProcessRunner>(ctx: &Context, runner: &R) -> Result<(), DeskError> {
    let identity = resolve_identity(&ctx.project_root, &ctx.config)?;
    ensure_on_path("ssh")?;
    ensure_on_path("scp")?;
    let local_path = deploy_source(ctx)?;
    if !local_path.is_file() {
        return Err(DeskError::Config(format!(
            "host controller not found at {}; build it or set deploy.local_path",
            local_path.display()
        )));
    }
    let remote_path = ctx.config.deploy.remote_path.as_str();
    let exec = RemoteExecutor::new(runner, ExecutionContext::Proxy(SshTarget::from(&identity)));

    if !ctx.json {
        println!("Uploading {} to {}...", local_path.display(), remote_path);
    }
    let outcome = deploy_controller(&exec, &local_path, remote_path)?;

    let run_hint = run_hint(&identity, remote_path);
    if ctx.json {
        return print_ok(json!({
            "uploaded": local_path,
            "remote_path": remote_path,
            "host": identity.remote_host,
            "docker": outcome.docker_version,
            "docker_installed": outcome.docker_installed,
            "run": run_hint,
        }));
    }
    success("Host controller uploaded");
    if outcome.docker_installed {
        success("Installed docker on the host");
    }
    success(&format!("Docker available: {}", outcome.docker_version));
    success("Controller is executable on the host");
    println!("You can now run: {run_hint}");
    Ok(())
}

fn run_hint(identity: &Identity, remote_path: &str) -> String {
    format!(
        "ssh -i {} -l {} {} '{} start'",
        identity.ssh_key_path.display(),
        identity.remote_user,
        identity.remote_host,
        remote_path
    )
}

fn handle_profile_create<R: ProcessRunner>(ctx: &Context, runner: &R) -> Result<(), DeskError> {
    let profile = load_profile(ctx)?;
    ComputeProvisioner::new(runner, &ctx.config.compute).create_profile(&profile)?;
    if ctx.json {
        return print_ok(json!({"profile": profile.profile_name, "created": true}));
    }
    success(&format!("Profile '{}' created", profile.profile_name));
    Ok(())
}

fn handle_start_compute<R: ProcessRunner>(ctx: &Context, runner: &R) -> Result<(), DeskError> {
    let profile = load_profile(ctx)?;
    let created = ComputeProvisioner::new(runner, &ctx.config.compute).create_instance(&profile)?;
    if ctx.json {
        return print_ok(json!(created));
    }
    match created.id.as_deref() {
        Some(id) => success(&format!("Instance '{}' created ({id})", created.name)),
        None => success(&format!("Instance '{}' created", created.name)),
    }
    Ok(())
}

fn handle_stop_compute<R: ProcessRunner>(
    ctx: &Context,
    runner: &R,
    yes: bool,
) -> Result<(), DeskError> {
    let profile = load_profile(ctx)?;
    let interactive = !yes && !ctx.json && io::stdin().is_terminal();
    let outcome = ComputeProvisioner::new(runner, &ctx.config.compute).stop_instance_with(
        &profile,
        |instance| {
            if !interactive {
                return Ok(true);
            }
            let confirmed = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(format!(
                    "Stop instance '{}' ({})?",
                    instance.name, instance.id
                ))
                .default(false)
                .interact()?;
            Ok(confirmed)
        },
    )?;
    if ctx.json {
        return print_ok(json!(outcome));
    }
    match outcome {
        StopComputeOutcome::Stopped { id, name } => {
            success(&format!("Instance '{name}' ({id}) stopped"))
        }
        StopComputeOutcome::Declined { id } => println!("Left instance {id} running."),
        StopComputeOutcome::NoneRunning => println!("No running compute instance found."),
    }
    Ok(())
}

fn handle_compute_status<R: ProcessRunner>(ctx: &Context, runner: &R) -> Result<(), DeskError> {
    let profile = load_profile(ctx)?;
    let instances = ComputeProvisioner::new(runner, &ctx.config.compute).list_instances(&profile)?;
    if ctx.json {
        return print_ok(json!({ "instances": instances }));
    }
    print!("{}", render_instances(&instances));
    Ok(())
}
