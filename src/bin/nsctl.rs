//! C10: `nsctl`, the launcher CLI.
//!
//! A thin `clap` front end over [`ns_orchestrator`]'s `resolve`/`spawn`
//! pair: turns command-line flags into a [`SpawnRequest`], resolves it,
//! spawns it, and propagates the grandchild's exit status. Style grounded
//! on `orbstack-swift-nio/wormhole/src/bin/dctl/main.rs`'s derive-based
//! `Cli` struct.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use ns_orchestrator::prelude::*;

/// Spawn a process into a chosen combination of Linux namespaces.
#[derive(Parser)]
#[command(name = "nsctl", version, about, long_about = None)]
struct Cli {
    /// Namespace kinds to enter (repeatable). Defaults to every available
    /// kind.
    #[arg(short = 'n', long = "namespace", value_name = "KIND")]
    namespaces: Vec<String>,

    /// Namespace kinds to exclude from the default set.
    #[arg(long = "negative-namespace", value_name = "KIND")]
    negative_namespaces: Vec<String>,

    /// Do not map the caller's uid/gid to 0 inside the user namespace.
    #[arg(long = "no-map-root")]
    no_map_root: bool,

    /// Do not remount /proc inside the new pid namespace.
    #[arg(long = "no-mount-proc")]
    no_mount_proc: bool,

    /// Mount point for the fresh /proc (default: /proc).
    #[arg(long = "mount-point", value_name = "PATH")]
    mount_point: Option<PathBuf>,

    /// Bind-mount each entered namespace under this directory so it can be
    /// re-entered later with `setns`.
    #[arg(long = "ns-bind-dir", value_name = "DIR")]
    ns_bind_dir: Option<PathBuf>,

    /// Mount propagation preset to apply to the new mount namespace's root.
    #[arg(long = "propagation", value_name = "PRESET")]
    propagation: Option<String>,

    /// `setgroups` policy for the user namespace (`allow` or `deny`).
    #[arg(long = "setgroups", value_name = "POLICY")]
    setgroups: Option<String>,

    /// A `uid_map` entry, `"inner outer [length]"` (repeatable, max 5).
    #[arg(long = "user-map", value_name = "ENTRY")]
    user_map: Vec<String>,

    /// A `gid_map` entry, `"inner outer [length]"` (repeatable, max 5).
    #[arg(long = "group-map", value_name = "ENTRY")]
    group_map: Vec<String>,

    /// Absolute path to an init program to run instead of the built-in
    /// shim when a pid namespace is active.
    #[arg(long = "init-prog", value_name = "PATH")]
    init_prog: Option<PathBuf>,

    /// Detach: fork into the background instead of waiting for the command.
    #[arg(short = 'd', long)]
    detach: bool,

    /// Warn and adjust instead of failing on a contradictory configuration.
    #[arg(short = 'p', long)]
    permissive: bool,

    /// Command to run inside the new namespaces (defaults to the caller's
    /// shell).
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    #[cfg(feature = "cli")]
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("nsctl: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let req = build_request(cli)?;
    let plan = resolve(req)?;
    let interactive = plan.interactive;
    let handles = spawn(plan)?;

    if !interactive {
        println!(
            "top={} bottom={} grandchild={}",
            handles.top_pid, handles.bottom_pid, handles.grandchild_pid
        );
        return Ok(ExitCode::SUCCESS);
    }

    let code = handles.status.unwrap_or(0);
    Ok(exit_code_from(code))
}

fn exit_code_from(code: i32) -> ExitCode {
    ExitCode::from(code.clamp(0, 255) as u8)
}

fn build_request(cli: Cli) -> Result<SpawnRequest> {
    let mut req = SpawnRequest::new();

    if !cli.namespaces.is_empty() {
        req.namespaces = Some(parse_namespace_list(&cli.namespaces)?);
    }
    req.negative_namespaces = parse_namespace_list(&cli.negative_namespaces)?;

    req.map_root = !cli.no_map_root;
    req.mount_proc = !cli.no_mount_proc;
    req.mount_point = cli.mount_point;
    req.ns_bind_dir = cli.ns_bind_dir;
    req.init_prog = cli.init_prog;
    req.interactive = !cli.detach;
    req.strict = !cli.permissive;
    req.users_map = cli.user_map;
    req.groups_map = cli.group_map;
    req.payload = Some(Payload::Command(cli.command));

    if let Some(name) = &cli.propagation {
        req.propagation = Some(
            Propagation::from_name(name)
                .ok_or_else(|| NsError::SettingError(format!("unknown propagation preset: {name:?}")))?,
        );
    }

    if let Some(policy) = &cli.setgroups {
        req.setgroups = Some(match policy.as_str() {
            "allow" => SetGroups::Allow,
            "deny" => SetGroups::Deny,
            other => {
                return Err(NsError::SettingError(format!(
                    "setgroups must be \"allow\" or \"deny\", got {other:?}"
                )))
            }
        });
    }

    Ok(req)
}

fn parse_namespace_list(names: &[String]) -> Result<Vec<NamespaceKind>> {
    let mut unknown = Vec::new();
    let mut kinds = Vec::new();
    for name in names {
        match NamespaceKind::from_name(name) {
            Some(kind) => kinds.push(kind),
            None => unknown.push(name.clone()),
        }
    }
    if !unknown.is_empty() {
        return Err(NsError::UnknownNamespace(unknown));
    }
    Ok(kinds)
}
