//! # ns-orchestrator
//!
//! **Linux namespace unshare/setns handshakes, without a container runtime**
//!
//! A Rust library for spawning a process into a fresh combination of Linux
//! namespaces — `cgroup`, `ipc`, `mount`, `net`, `pid`, `user`, `uts` — with
//! uid/gid mapping, mount propagation control, and optional namespace
//! pinning so a spawned namespace can be re-entered later with `setns(2)`.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       ns-orchestrator                          │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   SpawnRequest ──resolve()──▶ SpawnPlan ──spawn()──▶ handshake  │
//! │                                                                 │
//! │   ┌──────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐ │
//! │   │ registry │   │  resolver │   │  idmap    │   │    pin    │ │
//! │   │ (probed  │   │ (12 rules │   │ (uid/gid  │   │ (bind-    │ │
//! │   │  avail.) │   │  §4.4)    │   │  maps)    │   │  mount ns) │ │
//! │   └──────────┘   └───────────┘   └───────────┘   └───────────┘ │
//! │                          │                                     │
//! │                          ▼                                     │
//! │            orchestrator::spawn (top/bottom/grandchild fork)    │
//! │                          │                                     │
//! │                          ▼                                     │
//! │                     launcher::run                              │
//! │                                                                 │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use ns_orchestrator::prelude::*;
//!
//! let mut req = SpawnRequest::new();
//! req.namespaces = Some(vec![NamespaceKind::Uts, NamespaceKind::User]);
//! req.payload = Some(Payload::Command(vec!["hostname".into()]));
//!
//! let plan = resolve(req)?;
//! let handles = spawn(plan)?;
//! # Ok::<(), NsError>(())
//! ```
//!
//! ## Requirements
//!
//! - Linux kernel with `CLONE_NEWUSER` etc. compiled in (namespace
//!   availability is probed once per process, see [`probe::ensure_probed`])
//! - Unprivileged callers may only map uids/gids they already hold; every
//!   other use of a non-`user` namespace needs effective uid 0

pub mod atfork;
pub mod error;
pub mod idmap;
pub mod launcher;
pub mod orchestrator;
pub mod pin;
pub mod probe;
pub mod registry;
pub mod resolver;
pub mod syscalls;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::atfork::{register as register_fork_handler, unregister as unregister_fork_handler, Handler as ForkHandler};
    pub use crate::error::{NsError, Result};
    pub use crate::orchestrator::{spawn, SpawnHandles};
    pub use crate::registry::NamespaceKind;
    pub use crate::resolver::{resolve, Payload, SetGroups, SpawnPlan, SpawnRequest};
    pub use crate::syscalls::Propagation;
}

pub use prelude::*;
