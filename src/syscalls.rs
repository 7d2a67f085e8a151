//! C1: typed wrappers over the kernel calls the orchestrator needs.
//!
//! Built on `nix` wherever `nix` exposes the call safely; `pivot_root` has
//! no safe `nix` wrapper and keeps the teacher's raw `libc::syscall` pattern.

use std::ffi::CString;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;

use nix::errno::Errno;
use nix::mount::MsFlags;
use nix::sched::CloneFlags;

use crate::error::{NsError, Result};
use crate::registry::NamespaceKind;

/// Propagation presets accepted by [`mount_propagation`] and `mount_proc`
/// (distilled spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    Slave,
    Private,
    Shared,
    /// `MS_BIND` only, used internally by the pin binder.
    Bind,
    /// `MS_NOSUID|MS_NODEV|MS_NOEXEC`, used for the fresh `/proc` mount.
    MountProc,
    Unchanged,
}

impl Propagation {
    fn flags(self) -> MsFlags {
        match self {
            Propagation::Slave => MsFlags::MS_REC | MsFlags::MS_SLAVE,
            Propagation::Private => MsFlags::MS_REC | MsFlags::MS_PRIVATE,
            Propagation::Shared => MsFlags::MS_REC | MsFlags::MS_SHARED,
            Propagation::Bind => MsFlags::MS_BIND,
            Propagation::MountProc => MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
            Propagation::Unchanged => MsFlags::empty(),
        }
    }

    /// Parse the CLI/config-facing name (`"slave"`, `"private"`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "slave" => Propagation::Slave,
            "private" => Propagation::Private,
            "shared" => Propagation::Shared,
            "unchanged" => Propagation::Unchanged,
            _ => return None,
        })
    }
}

/// `unshare(2)` over the bitwise OR of the enabled, available kinds' clone
/// flags.
pub fn unshare(kinds: &[NamespaceKind]) -> Result<()> {
    let mut flags = CloneFlags::empty();
    for kind in kinds {
        flags |= CloneFlags::from_bits_truncate(kind.clone_flag());
    }
    nix::sched::unshare(flags).map_err(|e| NsError::from_errno("unshare", e))
}

/// `unshare(2)` of a single kind, used by the capability probe. Returns
/// `Ok(())` on success, and distinguishes `EINVAL` ("not compiled in")
/// from other errnos via the returned `Errno`.
pub fn unshare_one(kind: NamespaceKind) -> std::result::Result<(), Errno> {
    let flags = CloneFlags::from_bits_truncate(kind.clone_flag());
    nix::sched::unshare(flags)
}

/// `setns(2)`, falling back to the raw syscall if the libc symbol can't be
/// resolved (the fallback is exercised by `nix::sched::setns` itself on
/// older libc; here we simply surface whatever it returns).
pub fn setns<Fd: AsFd>(fd: Fd, kind: NamespaceKind) -> Result<()> {
    let flags = CloneFlags::from_bits_truncate(kind.clone_flag());
    nix::sched::setns(fd, flags).map_err(|e| NsError::from_errno("setns", e))
}

/// `mount(2)` with a propagation preset.
pub fn mount_with_preset(
    source: Option<&Path>,
    target: &Path,
    fstype: Option<&str>,
    preset: Propagation,
) -> Result<()> {
    nix::mount::mount(source, target, fstype, preset.flags(), None::<&str>)
        .map_err(|e| NsError::from_errno("mount", e))
}

/// Bind-mount `source` onto `target` (`MS_BIND`, non-recursive).
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    mount_with_preset(Some(source), target, None, Propagation::Bind)
}

/// `umount2(2)` with `MNT_DETACH`.
pub fn umount2_detach(target: &Path) -> Result<()> {
    nix::mount::umount2(target, nix::mount::MntFlags::MNT_DETACH)
        .map_err(|e| NsError::from_errno("umount2", e))
}

/// `pivot_root(2)`. No safe wrapper exists in `nix`; issued via the raw
/// syscall number, matching the teacher's approach for this one call.
pub fn pivot_root(new_root: &Path, put_old: &Path) -> Result<()> {
    let new_root_c =
        CString::new(new_root.as_os_str().as_encoded_bytes()).map_err(|_| {
            NsError::SettingError("pivot_root: path contains an interior NUL".into())
        })?;
    let put_old_c =
        CString::new(put_old.as_os_str().as_encoded_bytes()).map_err(|_| {
            NsError::SettingError("pivot_root: path contains an interior NUL".into())
        })?;

    // SAFETY: new_root_c/put_old_c are valid NUL-terminated CStrings kept
    // alive across the call; pivot_root(2) only reads them and does not
    // retain the pointers after returning.
    let ret = unsafe {
        libc::syscall(libc::SYS_pivot_root, new_root_c.as_ptr(), put_old_c.as_ptr())
    };
    if ret < 0 {
        Err(NsError::from_errno("pivot_root", Errno::last()))
    } else {
        Ok(())
    }
}

/// `sethostname(2)`.
pub fn sethostname(hostname: &str) -> Result<()> {
    nix::unistd::sethostname(hostname).map_err(|e| NsError::from_errno("sethostname", e))
}

/// `setdomainname(2)`. No safe wrapper in `nix`; issued via raw `libc`.
pub fn setdomainname(domainname: &str) -> Result<()> {
    // SAFETY: domainname.as_ptr() points to domainname.len() valid bytes;
    // setdomainname(2) only reads the buffer for the given length.
    let ret = unsafe {
        libc::setdomainname(domainname.as_ptr() as *const libc::c_char, domainname.len())
    };
    if ret < 0 {
        Err(NsError::from_errno("setdomainname", Errno::last()))
    } else {
        Ok(())
    }
}

/// `sched_getcpu(3)`.
pub fn sched_getcpu() -> Result<i32> {
    // SAFETY: sched_getcpu() takes no arguments and has no preconditions.
    let cpu = unsafe { libc::sched_getcpu() };
    if cpu < 0 {
        Err(NsError::from_errno("sched_getcpu", Errno::last()))
    } else {
        Ok(cpu)
    }
}

/// `getresuid(2)`: `(real, effective, saved)`.
pub fn getresuid() -> Result<(u32, u32, u32)> {
    let mut ruid: libc::uid_t = 0;
    let mut euid: libc::uid_t = 0;
    let mut suid: libc::uid_t = 0;
    // SAFETY: the three pointers are valid stack locals of the type
    // getresuid(2) expects; the kernel writes at most one uid_t to each.
    let ret = unsafe { libc::getresuid(&mut ruid, &mut euid, &mut suid) };
    if ret < 0 {
        Err(NsError::from_errno("getresuid", Errno::last()))
    } else {
        Ok((ruid, euid, suid))
    }
}

/// `getresgid(2)`: `(real, effective, saved)`.
pub fn getresgid() -> Result<(u32, u32, u32)> {
    let mut rgid: libc::gid_t = 0;
    let mut egid: libc::gid_t = 0;
    let mut sgid: libc::gid_t = 0;
    // SAFETY: as getresuid above, for gid_t.
    let ret = unsafe { libc::getresgid(&mut rgid, &mut egid, &mut sgid) };
    if ret < 0 {
        Err(NsError::from_errno("getresgid", Errno::last()))
    } else {
        Ok((rgid, egid, sgid))
    }
}

/// Borrow a raw fd without taking ownership, for the `setns` call sites
/// that only have a fd from a `File` they still own.
pub fn borrow_fd(fd: std::os::fd::RawFd) -> BorrowedFd<'static> {
    // SAFETY: callers pass an fd that outlives the BorrowedFd's use within
    // the same synchronous call; no ownership transfer occurs.
    unsafe { BorrowedFd::borrow_raw(fd) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn propagation_name_roundtrip() {
        assert!(matches!(
            Propagation::from_name("private"),
            Some(Propagation::Private)
        ));
        assert!(matches!(
            Propagation::from_name("shared"),
            Some(Propagation::Shared)
        ));
        assert!(matches!(
            Propagation::from_name("slave"),
            Some(Propagation::Slave)
        ));
        assert_eq!(Propagation::from_name("bogus"), None);
    }

    #[test]
    fn propagation_flags_match_spec_presets() {
        assert_eq!(
            Propagation::Private.flags(),
            MsFlags::MS_REC | MsFlags::MS_PRIVATE
        );
        assert_eq!(Propagation::Bind.flags(), MsFlags::MS_BIND);
        assert_eq!(Propagation::Unchanged.flags(), MsFlags::empty());
    }
}
