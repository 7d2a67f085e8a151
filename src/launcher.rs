//! C8: the payload launcher.
//!
//! Runs in the grandchild, after the handshake has completed. Either calls
//! a caller-supplied routine directly, or execs a command — wrapping it
//! with the init shim when a PID namespace is active and no explicit
//! `init_prog` was supplied. Grounded on
//! `original_source/procszoo/c_functions/__init__.py::_default_bottom_halves_after_sync`
//! and `lib/namespaces.py`'s `find_shell`/`find_my_init`.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use nix::unistd::execvp;

use crate::resolver::{Payload, SpawnPlan};

/// Fixed flags passed to the init shim (distilled spec §6).
const INIT_SHIM_FLAGS: [&str; 3] = ["--skip-startup-files", "--skip-runit", "--quiet"];

/// Run the plan's payload in the current (grandchild) process. Never
/// returns on success in command mode (it execs); returns the function's
/// result in function mode, with panics already caught by the caller via
/// `std::panic::catch_unwind` (see [`crate::orchestrator`]).
pub fn run(plan: SpawnPlan) -> ! {
    match plan.payload {
        Payload::Function(func) => {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(func));
            std::process::exit(if result.is_ok() { 0 } else { 1 });
        }
        Payload::Command(nscmd) => {
            let argv = build_argv(
                nscmd,
                plan.has(crate::registry::NamespaceKind::Pid),
                plan.init_prog.as_deref(),
            );
            exec_argv(&argv);
        }
    }
}

/// Resolve the final argv: bare command, or `<init_prog|shim> <flags> --
/// <cmd...>` when a PID namespace is active.
fn build_argv(mut nscmd: Vec<String>, has_pid: bool, init_prog: Option<&Path>) -> Vec<String> {
    if nscmd.is_empty() {
        nscmd = vec![find_shell()];
    }

    if !has_pid {
        return nscmd;
    }

    let shim = match init_prog {
        Some(path) => path.to_string_lossy().into_owned(),
        None => find_init_shim().unwrap_or_else(|| "my_init".to_string()),
    };

    let mut argv = vec![shim];
    argv.extend(INIT_SHIM_FLAGS.iter().map(|s| s.to_string()));
    argv.push("--".to_string());
    argv.extend(nscmd);
    argv
}

fn exec_argv(argv: &[String]) -> ! {
    let cargv: Vec<CString> = argv
        .iter()
        .map(|s| CString::new(s.as_bytes()).expect("argv entries must not contain NUL"))
        .collect();
    let _ = execvp(cargv[0].as_c_str(), &cargv);
    // execvp only returns on error.
    tracing::error!(command = ?argv, "execvp failed");
    std::process::exit(127);
}

/// Shell resolution order (distilled spec §4.8): the invoking user's login
/// shell if it names a POSIX shell and is executable, else `$SHELL` under
/// the same condition, then a search of common bin directories for `bash`,
/// else `sh`.
fn find_shell() -> String {
    if let Ok(Some(user)) = nix::unistd::User::from_uid(nix::unistd::geteuid()) {
        let login_shell = user.shell.to_string_lossy().into_owned();
        if is_posix_shell(&login_shell) {
            return login_shell;
        }
    }

    if let Ok(shell) = std::env::var("SHELL") {
        if is_posix_shell(&shell) {
            return shell;
        }
    }

    for dir in ["/bin", "/usr/bin", "/usr/local/bin"] {
        let candidate = PathBuf::from(dir).join("bash");
        if is_executable(&candidate) {
            return candidate.to_string_lossy().into_owned();
        }
    }

    "sh".to_string()
}

/// Known POSIX-compatible shell basenames. A login shell or `$SHELL` that
/// doesn't name one of these (e.g. `fish`, `csh`, `tcsh`) is rejected even
/// if executable, since the payload command is built assuming `sh`-style
/// argument passing.
const POSIX_SHELL_NAMES: [&str; 5] = ["sh", "bash", "dash", "ksh", "zsh"];

fn is_posix_shell(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    let is_known = Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| POSIX_SHELL_NAMES.contains(&name));
    is_known && is_executable(Path::new(path))
}

fn is_executable(path: &Path) -> bool {
    nix::unistd::access(path, nix::unistd::AccessFlags::X_OK).is_ok()
}

/// Search order for the init shim's absolute path (distilled spec §6): a
/// compiled-in install dir, then `PATH`, then the two `lib(exec)` dirs.
fn find_init_shim() -> Option<String> {
    const NAME: &str = "my_init";
    const INSTALL_DIR: &str = env!("CARGO_MANIFEST_DIR");

    let mut search_dirs = vec![format!("{INSTALL_DIR}/libexec")];
    if let Ok(path_var) = std::env::var("PATH") {
        search_dirs.extend(std::env::split_paths(&path_var).map(|p| p.to_string_lossy().into_owned()));
    }
    search_dirs.push("/usr/local/lib/ns-orchestrator".to_string());
    search_dirs.push("/usr/lib/ns-orchestrator".to_string());

    for dir in search_dirs {
        let candidate = PathBuf::from(&dir).join(NAME);
        if is_executable(&candidate) {
            return Some(candidate.to_string_lossy().into_owned());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_argv_without_pid_namespace_is_bare_command() {
        let argv = build_argv(vec!["id".into(), "-u".into()], false, None);
        assert_eq!(argv, vec!["id", "-u"]);
    }

    #[test]
    fn build_argv_with_explicit_init_prog_wraps_command() {
        let argv = build_argv(
            vec!["true".into()],
            true,
            Some(Path::new("/sbin/my-custom-init")),
        );
        assert_eq!(argv[0], "/sbin/my-custom-init");
        assert_eq!(argv[argv.len() - 1], "true");
        assert!(argv.contains(&"--".to_string()));
        assert!(argv.contains(&"--quiet".to_string()));
    }

    #[test]
    fn build_argv_defaults_to_a_shell_when_command_is_empty() {
        let argv = build_argv(vec![], false, None);
        assert_eq!(argv.len(), 1);
        assert!(!argv[0].is_empty());
    }
}
