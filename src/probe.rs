//! C3: the capability probe.
//!
//! Runs at most once per process (see [`ensure_probed`]). Forks a child,
//! which forks a grandchild; the grandchild tries `unshare` for each
//! registry kind in isolation so the attempt can't pollute the caller's own
//! namespace membership, then reports the available kinds back over a
//! pipe. The middle process reaps the grandchild so the caller never sees
//! a zombie. Grounded on `original_source/lib/namespaces.py`'s
//! `_check_namespaces_available_status`.

use std::io::{Read, Write};
use std::sync::Once;

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, pipe, ForkResult};

use crate::registry::NamespaceKind;

static PROBE_ONCE: Once = Once::new();

/// Probe the running kernel once per process and latch the result into
/// each [`NamespaceKind`]'s availability flag. Safe to call repeatedly;
/// only the first call forks.
pub fn ensure_probed() {
    PROBE_ONCE.call_once(|| {
        let available = probe_available();
        for kind in NamespaceKind::ALL {
            let is_available = kind.default_available() || available.contains(&kind);
            kind.set_available(is_available);
            tracing::debug!(namespace = kind.name(), available = is_available, "probed");
        }
    });
}

/// Double-fork probe. Returns the set of kinds that either unshared
/// successfully or failed with an errno other than `EINVAL` (meaning the
/// kind exists but current credentials reject it — still "available" per
/// distilled spec §4.3).
fn probe_available() -> Vec<NamespaceKind> {
    let (read_fd, write_fd) = match pipe() {
        Ok(fds) => fds,
        Err(_) => return Vec::new(),
    };

    // SAFETY: this process is single-threaded at the point spawn/probe
    // runs (the orchestrator and probe are never invoked concurrently from
    // multiple threads in the same process); the child only calls
    // async-signal-safe operations before _exit.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            drop(read_fd);
            run_probe_child(write_fd);
            std::process::exit(0);
        }
        Ok(ForkResult::Parent { child }) => {
            drop(write_fd);
            let mut file = std::fs::File::from(read_fd);
            let mut buf = Vec::new();
            let _ = file.read_to_end(&mut buf);
            let _ = waitpid(child, None);
            decode_kind_list(&buf)
        }
        Err(_) => Vec::new(),
    }
}

/// Runs in the middle (child) process: forks the grandchild that actually
/// attempts the unshares, reaps it, and exits. Keeps the caller free of
/// zombie handling and keeps the probing `unshare` calls out of any
/// process the caller can observe.
fn run_probe_child(write_fd: nix::unistd::OwnedFd) {
    // SAFETY: see ensure_probed/probe_available; the grandchild only
    // performs unshare/write/_exit before terminating.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            let mut available = Vec::new();
            for kind in NamespaceKind::ALL {
                match crate::syscalls::unshare_one(kind) {
                    Ok(()) => available.push(kind),
                    Err(Errno::EINVAL) => {}
                    Err(_) => available.push(kind),
                }
            }
            let mut file = std::fs::File::from(write_fd);
            let _ = file.write_all(&encode_kind_list(&available));
            std::process::exit(0);
        }
        Ok(ForkResult::Parent { child }) => {
            let _ = waitpid(child, None);
            std::process::exit(0);
        }
        Err(_) => std::process::exit(1),
    }
}

/// Length-prefixed sequence of ASCII name strings: `u8 name_len` then the
/// bytes, repeated. Small, fixed alphabet (7 short names) makes this
/// simpler than carrying a serialization crate across the probe's pipe.
fn encode_kind_list(kinds: &[NamespaceKind]) -> Vec<u8> {
    let mut buf = Vec::new();
    for kind in kinds {
        let name = kind.name().as_bytes();
        buf.push(name.len() as u8);
        buf.extend_from_slice(name);
    }
    buf
}

fn decode_kind_list(buf: &[u8]) -> Vec<NamespaceKind> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < buf.len() {
        let len = buf[i] as usize;
        i += 1;
        if i + len > buf.len() {
            break;
        }
        if let Ok(name) = std::str::from_utf8(&buf[i..i + len]) {
            if let Some(kind) = NamespaceKind::from_name(name) {
                out.push(kind);
            }
        }
        i += len;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let kinds = vec![NamespaceKind::Net, NamespaceKind::User, NamespaceKind::Pid];
        let encoded = encode_kind_list(&kinds);
        let decoded = decode_kind_list(&encoded);
        assert_eq!(decoded, kinds);
    }

    #[test]
    fn decode_empty() {
        assert!(decode_kind_list(&[]).is_empty());
    }

    #[test]
    fn decode_truncated_is_lenient() {
        // Length byte claims more data than is present: should stop, not panic.
        assert!(decode_kind_list(&[10, b'x']).is_empty());
    }
}
