//! C2: the static namespace registry.
//!
//! A fixed table of the seven Linux namespace kinds, their `CLONE_NEW*`
//! flag, and the entry name under `/proc/PID/ns/`. Availability starts
//! `false` for every kind but `mount` and is only ever flipped once, by
//! [`crate::probe`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// One of Linux's seven namespace isolation dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    Cgroup,
    Ipc,
    Mount,
    Net,
    Pid,
    User,
    Uts,
}

impl NamespaceKind {
    /// All kinds, in the registry's stable declaration order.
    pub const ALL: [NamespaceKind; 7] = [
        NamespaceKind::Cgroup,
        NamespaceKind::Ipc,
        NamespaceKind::Mount,
        NamespaceKind::Net,
        NamespaceKind::Pid,
        NamespaceKind::User,
        NamespaceKind::Uts,
    ];

    /// Parse the lower-case symbolic name used throughout the spawn API.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "cgroup" => NamespaceKind::Cgroup,
            "ipc" => NamespaceKind::Ipc,
            "mount" => NamespaceKind::Mount,
            "net" => NamespaceKind::Net,
            "pid" => NamespaceKind::Pid,
            "user" => NamespaceKind::User,
            "uts" => NamespaceKind::Uts,
            _ => return None,
        })
    }

    /// The lower-case symbolic name.
    pub const fn name(self) -> &'static str {
        match self {
            NamespaceKind::Cgroup => "cgroup",
            NamespaceKind::Ipc => "ipc",
            NamespaceKind::Mount => "mount",
            NamespaceKind::Net => "net",
            NamespaceKind::Pid => "pid",
            NamespaceKind::User => "user",
            NamespaceKind::Uts => "uts",
        }
    }

    /// `CLONE_NEW*` flag value (see distilled spec §6).
    pub const fn clone_flag(self) -> i32 {
        match self {
            NamespaceKind::Cgroup => 0x0200_0000,
            NamespaceKind::Ipc => 0x0800_0000,
            NamespaceKind::Mount => 0x0002_0000,
            NamespaceKind::Net => 0x4000_0000,
            NamespaceKind::Pid => 0x2000_0000,
            NamespaceKind::User => 0x1000_0000,
            NamespaceKind::Uts => 0x0400_0000,
        }
    }

    /// Relative path component under `/proc/PID/ns/`. Notably `mnt` for
    /// the mount namespace, everything else matches [`Self::name`].
    pub const fn proc_entry(self) -> &'static str {
        match self {
            NamespaceKind::Mount => "mnt",
            other => other.name(),
        }
    }

    /// `true` for [`NamespaceKind::Mount`] unconditionally; every other
    /// kind starts unknown until [`crate::probe::probe_available`] runs.
    pub const fn default_available(self) -> bool {
        matches!(self, NamespaceKind::Mount)
    }

    /// Whether this kind was observed available on this kernel.
    ///
    /// Before the probe runs this returns `default_available()`; after the
    /// probe it reflects the probed result, which is set once and is
    /// thereafter immutable for the life of the process.
    pub fn is_available(self) -> bool {
        availability_flag(self).load(Ordering::Acquire)
    }

    pub(crate) fn set_available(self, value: bool) {
        availability_flag(self).store(value, Ordering::Release);
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn availability_flag(kind: NamespaceKind) -> &'static AtomicBool {
    static CGROUP: AtomicBool = AtomicBool::new(false);
    static IPC: AtomicBool = AtomicBool::new(false);
    static MOUNT: AtomicBool = AtomicBool::new(true);
    static NET: AtomicBool = AtomicBool::new(false);
    static PID: AtomicBool = AtomicBool::new(false);
    static USER: AtomicBool = AtomicBool::new(false);
    static UTS: AtomicBool = AtomicBool::new(false);

    match kind {
        NamespaceKind::Cgroup => &CGROUP,
        NamespaceKind::Ipc => &IPC,
        NamespaceKind::Mount => &MOUNT,
        NamespaceKind::Net => &NET,
        NamespaceKind::Pid => &PID,
        NamespaceKind::User => &USER,
        NamespaceKind::Uts => &UTS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_is_available_by_default() {
        assert!(NamespaceKind::Mount.is_available());
    }

    #[test]
    fn other_kinds_default_unavailable_until_probed() {
        assert!(!NamespaceKind::Net.default_available());
    }

    #[test]
    fn roundtrip_name() {
        for kind in NamespaceKind::ALL {
            assert_eq!(NamespaceKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(NamespaceKind::from_name("bogus"), None);
    }

    #[test]
    fn mount_proc_entry_is_mnt() {
        assert_eq!(NamespaceKind::Mount.proc_entry(), "mnt");
        assert_eq!(NamespaceKind::Pid.proc_entry(), "pid");
    }

    #[test]
    fn clone_flags_match_kernel_values() {
        assert_eq!(NamespaceKind::Cgroup.clone_flag(), 0x0200_0000);
        assert_eq!(NamespaceKind::Ipc.clone_flag(), 0x0800_0000);
        assert_eq!(NamespaceKind::Mount.clone_flag(), 0x0002_0000);
        assert_eq!(NamespaceKind::Net.clone_flag(), 0x4000_0000);
        assert_eq!(NamespaceKind::Pid.clone_flag(), 0x2000_0000);
        assert_eq!(NamespaceKind::User.clone_flag(), 0x1000_0000);
        assert_eq!(NamespaceKind::Uts.clone_flag(), 0x0400_0000);
    }
}
