//! C6: the orchestrator — the heart of the crate.
//!
//! Implements the two-layered fork pattern (top half / bottom half /
//! grandchild) and the nine-phase handshake of distilled spec §4.6.
//! Grounded on `original_source/lib/namespaces.py::spawn_namespaces` /
//! `_run_cmd_in_new_namespaces` / `_continue_original_flow` for the pipe
//! choreography, and `original_source/procszoo/c_functions/__init__.py`'s
//! `_default_top_halves_before_sync` / `_default_bottom_halves_before_sync` /
//! `_default_bottom_halves_after_sync` split for the three-process version.
//! Step sequencing style (ordered fallible steps, one `tracing` event per
//! transition) follows `orbstack-swift-nio/vinit/src/startup.rs`.
//!
//! Four pipes carry the handshake:
//!   P1 bottom -> top:        the grandchild's pid, as an ASCII line
//!   P2 top    -> bottom:     one [`SYNC_BYTE`] once uid/gid maps + pin
//!                            binds are in place
//!   P3 grandchild -> bottom: one [`SYNC_BYTE`] once propagation + /proc
//!                            are set
//!   P4 bottom -> grandchild: one [`SYNC_BYTE`], forwarding P2
//!
//! The bottom half is the real parent of the grandchild and is the only
//! process that can `waitpid` it; the top half in turn only ever waits on
//! the bottom half, and (in interactive mode) inherits its exit status.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::os::fd::OwnedFd;
use std::path::PathBuf;

use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, pipe, setsid, ForkResult, Pid};

use crate::error::{NsError, Result};
use crate::idmap::IdMapEntry;
use crate::launcher;
use crate::pin;
use crate::registry::NamespaceKind;
use crate::resolver::{SetGroups, SpawnPlan};
use crate::syscalls;

/// The handshake's single synchronization byte (the source's two names,
/// `ACLCHAR`/`ACKCHAR`, collapse to this one constant).
const SYNC_BYTE: u8 = 0x06;

/// Outcome of a successful spawn (distilled spec §6).
#[derive(Debug, Clone, Copy)]
pub struct SpawnHandles {
    pub top_pid: u32,
    pub bottom_pid: u32,
    pub grandchild_pid: u32,
    /// The grandchild's exit status (`WEXITSTATUS`, or `128 + signal`),
    /// present only when the request was interactive — `spawn` blocks
    /// until it is known. `None` for a detached request.
    pub status: Option<i32>,
}

/// Everything the top half needs after the first fork. Extracted up front
/// so the full [`SpawnPlan`] (including the payload) only has to be moved
/// into the bottom half / grandchild side of the handshake.
struct TopNeeds {
    namespaces: Vec<NamespaceKind>,
    users_map: Vec<IdMapEntry>,
    groups_map: Vec<IdMapEntry>,
    setgroups: Option<SetGroups>,
    ns_bind_dir: Option<PathBuf>,
}

impl TopNeeds {
    fn from_plan(plan: &SpawnPlan) -> Self {
        TopNeeds {
            namespaces: plan.namespaces.clone(),
            users_map: plan.users_map.clone(),
            groups_map: plan.groups_map.clone(),
            setgroups: plan.setgroups,
            ns_bind_dir: plan.ns_bind_dir.clone(),
        }
    }
}

/// Run the resolved plan to completion: fork the bottom half, unshare,
/// fork the grandchild, sequence the four-pipe handshake, then dispatch
/// the payload in the grandchild. Blocks until the grandchild exits when
/// `plan.interactive` (distilled spec §4.6 phase 9).
pub fn spawn(plan: SpawnPlan) -> Result<SpawnHandles> {
    let interactive = plan.interactive;
    let top_needs = TopNeeds::from_plan(&plan);
    let top_pid = nix::unistd::getpid();

    let (p1_read, p1_write) = pipe().map_err(|e| NsError::from_errno("pipe", e))?;
    let (p2_read, p2_write) = pipe().map_err(|e| NsError::from_errno("pipe", e))?;

    // SAFETY: invoked from a single thread that owns both pipes created
    // just above; the bottom half only performs the async-signal-safe
    // sequence documented in `bottom_half`/`grandchild` before it forks
    // again or execs.
    match unsafe { fork() }.map_err(|e| NsError::from_errno("fork", e))? {
        ForkResult::Child => {
            drop(p1_read);
            drop(p2_write);
            bottom_half(plan, p1_write, p2_read);
        }
        ForkResult::Parent { child: bottom_pid } => {
            drop(p1_write);
            drop(p2_read);
            let grandchild_pid = top_half(&top_needs, p1_read, p2_write)?;

            let status = if interactive {
                Some(reap_bottom(bottom_pid)?)
            } else {
                None
            };

            Ok(SpawnHandles {
                top_pid: top_pid.as_raw() as u32,
                bottom_pid: bottom_pid.as_raw() as u32,
                grandchild_pid,
                status,
            })
        }
    }
}

/// Phases 1-2: read the grandchild's pid off P1, write uid/gid maps and
/// setgroups, take pin binds, then signal P2. Runs entirely outside the
/// new namespaces, which is what makes it the right side to own the
/// privileged uid/gid map writes (user_namespaces(7) requires the writer
/// to be a process outside the target user namespace, or the same process
/// before it enters one).
fn top_half(needs: &TopNeeds, p1_read: OwnedFd, p2_write: OwnedFd) -> Result<u32> {
    // A plain read-to-EOF would block until every copy of the P1 write end
    // closes, including the one the grandchild inherits across the second
    // fork (it holds the fd open until it execs). The bottom half writes
    // exactly one line, so read only that line instead of waiting for EOF.
    let mut pid_line = String::new();
    BufReader::new(File::from(p1_read))
        .read_line(&mut pid_line)
        .map_err(|e| NsError::SyncFailed(format!("reading grandchild pid off P1: {e}")))?;
    let grandchild_pid: u32 = pid_line
        .trim()
        .parse()
        .map_err(|_| NsError::SyncFailed(format!("malformed grandchild pid on P1: {pid_line:?}")))?;

    if !needs.users_map.is_empty() || !needs.groups_map.is_empty() || needs.setgroups.is_some() {
        crate::idmap::write_maps(
            grandchild_pid,
            &needs.users_map,
            &needs.groups_map,
            needs.setgroups,
        )?;
        tracing::debug!(pid = grandchild_pid, "wrote uid/gid maps");
    }

    if let Some(dir) = &needs.ns_bind_dir {
        pin::bind_namespaces(grandchild_pid, &needs.namespaces, dir)?;
    }

    File::from(p2_write)
        .write_all(&[SYNC_BYTE])
        .map_err(|e| NsError::SyncFailed(format!("signaling P2: {e}")))?;

    Ok(grandchild_pid)
}

fn reap_bottom(bottom_pid: Pid) -> Result<i32> {
    match waitpid(bottom_pid, None) {
        Ok(WaitStatus::Exited(_, code)) => Ok(code),
        Ok(WaitStatus::Signaled(_, signal, _)) => Ok(128 + signal as i32),
        Ok(_) => Ok(0),
        Err(e) => Err(NsError::from_errno("waitpid", e)),
    }
}

/// Bottom half: unshare into the new namespaces, fork the grandchild,
/// forward the grandchild's pid and the top half's sentinel, then either
/// block on the grandchild (interactive) or detach and exit immediately.
/// Never returns.
fn bottom_half(plan: SpawnPlan, p1_write: OwnedFd, p2_read: OwnedFd) -> ! {
    let interactive = plan.interactive;

    if let Err(e) = syscalls::unshare(&plan.namespaces) {
        tracing::error!(error = %e, "unshare failed in bottom half");
        std::process::exit(1);
    }
    tracing::debug!(namespaces = ?plan.namespaces, "bottom half unshared");

    let (p3_read, p3_write) = match pipe() {
        Ok(fds) => fds,
        Err(e) => {
            tracing::error!(error = %e, "failed to create P3");
            std::process::exit(1);
        }
    };
    let (p4_read, p4_write) = match pipe() {
        Ok(fds) => fds,
        Err(e) => {
            tracing::error!(error = %e, "failed to create P4");
            std::process::exit(1);
        }
    };

    // SAFETY: see `spawn`; the grandchild only runs the async-signal-safe
    // sequence in `grandchild` before execing or exiting.
    let grandchild_pid = match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            drop(p3_read);
            drop(p4_write);
            // Close the inherited P1 write end and P2 read end now: the
            // grandchild never uses either, but `grandchild()` execs rather
            // than returning, so leaving them open would keep P1's write
            // end alive until exec and deadlock the top half's read_line.
            drop(p1_write);
            drop(p2_read);
            grandchild(plan, p3_write, p4_read);
        }
        Ok(ForkResult::Parent { child }) => child,
        Err(e) => {
            tracing::error!(error = %e, "failed to fork grandchild");
            std::process::exit(1);
        }
    };
    drop(p3_write);
    drop(p4_read);

    if !interactive {
        let _ = setsid();
        detach_stdio();
        let _ = std::env::set_current_dir("/");
    }

    // Phase 5: wait for the grandchild to finish propagation/proc setup
    // before telling the top half it may proceed — creating a new user
    // namespace grants the creating process full capabilities inside it
    // immediately, so this ordering does not need uid/gid mapping to be
    // in place first (user_namespaces(7)).
    let mut sync = [0u8; 1];
    if File::from(p3_read).read_exact(&mut sync).is_err() || sync[0] != SYNC_BYTE {
        tracing::error!("handshake sync byte mismatch on P3");
        std::process::exit(1);
    }

    if let Err(e) = File::from(p1_write).write_all(format!("{}\n", grandchild_pid.as_raw()).as_bytes()) {
        tracing::error!(error = %e, "failed to forward grandchild pid over P1");
        std::process::exit(1);
    }

    if File::from(p2_read).read_exact(&mut sync).is_err() || sync[0] != SYNC_BYTE {
        tracing::error!("handshake sync byte mismatch on P2");
        std::process::exit(1);
    }

    if File::from(p4_write).write_all(&[SYNC_BYTE]).is_err() {
        tracing::error!("failed to forward sentinel over P4");
        std::process::exit(1);
    }

    if interactive {
        let code = match waitpid(grandchild_pid, None) {
            Ok(WaitStatus::Exited(_, code)) => code,
            Ok(WaitStatus::Signaled(_, signal, _)) => 128 + signal as i32,
            _ => 0,
        };
        std::process::exit(code);
    }

    std::process::exit(0);
}

/// Grandchild: set mount propagation and remount `/proc` first (phase 5 —
/// the grandchild already has full capabilities in the new namespaces by
/// virtue of having created them, independent of uid/gid mapping), signal
/// P3, then wait on P4 for confirmation that the top half has written
/// uid/gid maps and taken pin binds before dispatching the payload
/// (phase 7). Never returns.
fn grandchild(plan: SpawnPlan, p3_write: OwnedFd, p4_read: OwnedFd) -> ! {
    if plan.has(NamespaceKind::Mount) {
        if let Some(propagation) = plan.propagation {
            if propagation != syscalls::Propagation::Unchanged {
                let root = std::path::Path::new("/");
                if let Err(e) = syscalls::mount_with_preset(None, root, None, propagation) {
                    tracing::error!(error = %e, "failed to set mount propagation");
                    std::process::exit(1);
                }
            }
        }
        if plan.mount_proc {
            if let Err(e) = remount_proc(&plan.mount_point) {
                tracing::error!(error = %e, "failed to remount /proc");
                std::process::exit(1);
            }
        }
    }

    if File::from(p3_write).write_all(&[SYNC_BYTE]).is_err() {
        std::process::exit(1);
    }

    let mut sync = [0u8; 1];
    if File::from(p4_read).read_exact(&mut sync).is_err() || sync[0] != SYNC_BYTE {
        tracing::error!("handshake sync byte mismatch on P4 (grandchild)");
        std::process::exit(1);
    }

    launcher::run(plan)
}

fn remount_proc(mount_point: &std::path::Path) -> Result<()> {
    syscalls::mount_with_preset(
        Some(std::path::Path::new("proc")),
        mount_point,
        Some("proc"),
        syscalls::Propagation::MountProc,
    )
}

fn detach_stdio() {
    use std::os::fd::AsRawFd;
    if let Ok(devnull) = std::fs::OpenOptions::new().read(true).write(true).open("/dev/null") {
        let raw = devnull.as_raw_fd();
        let _ = nix::unistd::dup2(raw, 0);
        let _ = nix::unistd::dup2(raw, 1);
        let _ = nix::unistd::dup2(raw, 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Payload;

    fn sample_plan() -> SpawnPlan {
        SpawnPlan {
            namespaces: vec![NamespaceKind::Uts, NamespaceKind::User],
            map_root: true,
            mount_proc: false,
            mount_point: PathBuf::from("/proc"),
            ns_bind_dir: Some(PathBuf::from("/tmp/nsctl-test")),
            payload: Payload::Command(vec!["true".into()]),
            propagation: None,
            setgroups: Some(SetGroups::Deny),
            users_map: vec![IdMapEntry {
                inner_id: 0,
                outer_id: 1000,
                length: 1,
            }],
            groups_map: Vec::new(),
            init_prog: None,
            interactive: true,
        }
    }

    #[test]
    fn top_needs_carries_over_mapping_and_bind_dir_but_not_the_payload() {
        let plan = sample_plan();
        let needs = TopNeeds::from_plan(&plan);
        assert_eq!(needs.namespaces, plan.namespaces);
        assert_eq!(needs.users_map, plan.users_map);
        assert_eq!(needs.setgroups, plan.setgroups);
        assert_eq!(needs.ns_bind_dir, plan.ns_bind_dir);
    }

    #[test]
    fn sync_byte_is_a_single_nonzero_octet() {
        assert_eq!(SYNC_BYTE, 0x06);
    }
}
