//! C7: the pin binder.
//!
//! Materializes each enabled namespace (other than `mount`) as a
//! bind-mounted file under a caller-chosen directory, so it outlives the
//! exit of its first inhabitant and can later be re-entered with `setns`
//! by path. Grounded on
//! `original_source/lib/namespaces.py::Toolbox.bind_ns_files`.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::error::{NsError, Result};
use crate::registry::NamespaceKind;
use crate::syscalls;

/// Bind-mount `/proc/<pid>/ns/<entry>` onto `<ns_bind_dir>/<entry>` for
/// every kind in `namespaces` other than [`NamespaceKind::Mount`] (the
/// mount namespace itself is intentionally excluded — distilled spec
/// §4.6 step 6).
pub fn bind_namespaces(pid: u32, namespaces: &[NamespaceKind], ns_bind_dir: &Path) -> Result<()> {
    ensure_bind_dir(ns_bind_dir)?;

    for &kind in namespaces {
        if kind == NamespaceKind::Mount {
            continue;
        }
        let source = PathBuf::from(format!("/proc/{pid}/ns/{}", kind.proc_entry()));
        let target = ns_bind_dir.join(kind.proc_entry());
        ensure_pin_file(&target)?;
        syscalls::bind_mount(&source, &target)?;
        tracing::debug!(namespace = kind.name(), target = %target.display(), "pinned namespace");
    }

    Ok(())
}

fn ensure_bind_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    nix::unistd::access(dir, nix::unistd::AccessFlags::R_OK | nix::unistd::AccessFlags::W_OK)
        .map_err(|_| {
            NsError::SettingError(format!("ns_bind_dir {} is not read+write accessible", dir.display()))
        })
}

fn ensure_pin_file(target: &Path) -> Result<()> {
    if !target.exists() {
        OpenOptions::new()
            .create(true)
            .write(true)
            .open(target)?;
    }
    Ok(())
}
