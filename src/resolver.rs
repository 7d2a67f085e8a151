//! C4: the configuration resolver.
//!
//! Reconciles a caller-supplied [`SpawnRequest`] against the probed
//! namespace availability into a kernel-acceptable [`SpawnPlan`], following
//! the twelve ordered rules of distilled spec §4.4 — grounded on the newer,
//! strict-by-default `SpawnNamespacesConfig._default_handler_to_parse_conf`
//! path in `original_source/procszoo/c_functions/__init__.py` (see
//! distilled spec §9's open-question resolution).

use std::path::PathBuf;

use crate::error::{NsError, Result};
use crate::idmap::{self, MapKind};
use crate::probe;
use crate::registry::NamespaceKind;
use crate::syscalls::Propagation;

/// A payload to run inside the new namespaces: either a command to exec,
/// or a caller routine invoked directly in the grandchild.
pub enum Payload {
    /// `argv`, executed via `execvp` (or wrapped by the init shim, see
    /// [`crate::launcher`]).
    Command(Vec<String>),
    /// A routine invoked in-process in the grandchild. Panics are turned
    /// into exit code 1 (distilled spec §4.8).
    Function(Box<dyn FnOnce() + Send + 'static>),
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Command(argv) => f.debug_tuple("Command").field(argv).finish(),
            Payload::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Caller input to a spawn (distilled spec §3).
#[derive(Debug)]
pub struct SpawnRequest {
    pub namespaces: Option<Vec<NamespaceKind>>,
    pub negative_namespaces: Vec<NamespaceKind>,
    pub map_root: bool,
    pub mount_proc: bool,
    pub mount_point: Option<PathBuf>,
    pub ns_bind_dir: Option<PathBuf>,
    pub payload: Option<Payload>,
    pub propagation: Option<Propagation>,
    pub setgroups: Option<SetGroups>,
    pub users_map: Vec<String>,
    pub groups_map: Vec<String>,
    pub init_prog: Option<PathBuf>,
    pub interactive: bool,
    pub strict: bool,
}

impl SpawnRequest {
    /// A request with the spec's defaults: `map_root = true`, `mount_proc
    /// = true`, `interactive = true`, `strict = true`, every available
    /// namespace, no payload (caller must set one).
    pub fn new() -> Self {
        Self {
            namespaces: None,
            negative_namespaces: Vec::new(),
            map_root: true,
            mount_proc: true,
            mount_point: None,
            ns_bind_dir: None,
            payload: None,
            propagation: None,
            setgroups: None,
            users_map: Vec::new(),
            groups_map: Vec::new(),
            init_prog: None,
            interactive: true,
            strict: true,
        }
    }
}

impl Default for SpawnRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// `setgroups` policy (distilled spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetGroups {
    Allow,
    Deny,
}

/// Fully-resolved, kernel-acceptable form of a [`SpawnRequest`] (distilled
/// spec §3). Every field reflects what will actually happen.
#[derive(Debug)]
pub struct SpawnPlan {
    pub namespaces: Vec<NamespaceKind>,
    pub map_root: bool,
    pub mount_proc: bool,
    pub mount_point: PathBuf,
    pub ns_bind_dir: Option<PathBuf>,
    pub payload: Payload,
    pub propagation: Option<Propagation>,
    pub setgroups: Option<SetGroups>,
    pub users_map: Vec<idmap::IdMapEntry>,
    pub groups_map: Vec<idmap::IdMapEntry>,
    pub init_prog: Option<PathBuf>,
    pub interactive: bool,
}

impl SpawnPlan {
    pub fn has(&self, kind: NamespaceKind) -> bool {
        self.namespaces.contains(&kind)
    }
}

/// Resolve a [`SpawnRequest`] into a [`SpawnPlan`], or fail with a typed
/// error (distilled spec §4.4). Probes namespace availability on first
/// call (see [`probe::ensure_probed`]).
pub fn resolve(mut req: SpawnRequest) -> Result<SpawnPlan> {
    probe::ensure_probed();

    // Rule 1: command/init_prog and payload_fn are mutually exclusive.
    // (payload is an enum here, so this is structural rather than a
    // runtime check; kept as a named rule for traceability against the
    // spec's numbering.)

    let user_available = NamespaceKind::User.is_available();
    let pid_available = NamespaceKind::Pid.is_available();
    let mount_available = NamespaceKind::Mount.is_available();

    // Rule 2: map_root/users_map/groups_map require the user namespace.
    if !user_available && (req.map_root || !req.users_map.is_empty() || !req.groups_map.is_empty())
    {
        if req.strict {
            return Err(NsError::SettingError(
                "cannot do users/groups mapping: user namespace unavailable".into(),
            ));
        }
        req.map_root = false;
        req.users_map.clear();
        req.groups_map.clear();
    }

    // Rule 3: setgroups=allow conflicts with any mapping.
    let wants_mapping = req.map_root || !req.users_map.is_empty() || !req.groups_map.is_empty();
    if req.setgroups == Some(SetGroups::Allow) && wants_mapping {
        if req.strict {
            return Err(NsError::SettingError(
                "setgroups=allow conflicts with users/groups mapping".into(),
            ));
        }
        req.map_root = false;
        req.users_map.clear();
        req.groups_map.clear();
    }

    // Rule 4: mount_proc requires the PID namespace.
    if !pid_available && req.mount_proc {
        if req.strict {
            return Err(NsError::SettingError(
                "mount_proc requires the pid namespace".into(),
            ));
        }
        req.mount_proc = false;
        req.mount_point = None;
    }

    // Rule 5: propagation requires the mount namespace.
    if !mount_available && req.propagation.is_some() {
        if req.strict {
            return Err(NsError::SettingError(
                "propagation requires the mount namespace".into(),
            ));
        }
        req.propagation = None;
    }

    // Rule 6: expand the namespace set. Unknown-name rejection happens one
    // layer up, wherever symbolic names are parsed into `NamespaceKind`
    // (see `src/bin/nsctl.rs`) — `NamespaceKind` itself is a closed enum,
    // so by the time a request reaches here "unknown" can't occur.
    let mut namespaces: Vec<NamespaceKind> = match req.namespaces {
        Some(requested) => requested,
        None => NamespaceKind::ALL
            .iter()
            .copied()
            .filter(|k| k.is_available())
            .collect(),
    };
    namespaces.retain(|k| !req.negative_namespaces.contains(k));

    let unavailable: Vec<String> = namespaces
        .iter()
        .filter(|k| !k.is_available())
        .map(|k| k.name().to_string())
        .collect();
    if !unavailable.is_empty() {
        return Err(NsError::UnavailableNamespace(unavailable));
    }

    // Rule 7: need-privilege predicate.
    let need_privilege = !namespaces.contains(&NamespaceKind::User)
        || req.ns_bind_dir.is_some()
        || !req.users_map.is_empty()
        || !req.groups_map.is_empty();
    if need_privilege && !nix::unistd::geteuid().is_root() {
        return Err(NsError::RequireSuperuser);
    }

    // Rule 8: mount_proc ⇒ mount ∈ plan; map_root ⇒ user ∈ plan.
    if req.mount_proc && !namespaces.contains(&NamespaceKind::Mount) {
        if req.strict {
            return Err(NsError::SettingError(
                "mount_proc requires the mount namespace in the plan".into(),
            ));
        }
        namespaces.push(NamespaceKind::Mount);
    }
    if req.map_root && !namespaces.contains(&NamespaceKind::User) {
        if req.strict {
            return Err(NsError::SettingError(
                "map_root requires the user namespace in the plan".into(),
            ));
        }
        namespaces.push(NamespaceKind::User);
    }

    // Rule 9: default propagation to private when mount is present.
    let mut propagation = req.propagation;
    if namespaces.contains(&NamespaceKind::Mount) && propagation.is_none() {
        propagation = Some(Propagation::Private);
    }

    // Rule 11 (clearing), done before rule 10 so cleared maps don't get
    // compiled pointlessly: if user/pid/mount aren't in the plan, drop
    // their dependent options.
    let has_user = namespaces.contains(&NamespaceKind::User);
    let has_pid = namespaces.contains(&NamespaceKind::Pid);
    let has_mount = namespaces.contains(&NamespaceKind::Mount);

    if !has_user {
        req.map_root = false;
        req.setgroups = None;
        req.users_map.clear();
        req.groups_map.clear();
    }
    if !has_pid {
        req.mount_proc = false;
        req.mount_point = None;
    }
    if !has_mount {
        req.ns_bind_dir = None;
        propagation = None;
        req.mount_proc = false;
        req.mount_point = None;
    }

    // Rule 10: compile and authorize id maps.
    let mut users_map = idmap::compile_map(&req.users_map, MapKind::User)?;
    let mut groups_map = idmap::compile_map(&req.groups_map, MapKind::Group)?;

    if req.map_root {
        if users_map.is_empty() {
            users_map.push(idmap::IdMapEntry {
                inner_id: 0,
                outer_id: nix::unistd::geteuid().as_raw(),
                length: 1,
            });
        }
        if groups_map.is_empty() {
            groups_map.push(idmap::IdMapEntry {
                inner_id: 0,
                outer_id: nix::unistd::getegid().as_raw(),
                length: 1,
            });
        }
    }

    // Rule 12: setgroups default.
    let mut setgroups = req.setgroups;
    if setgroups.is_none() && has_user && (req.map_root || !users_map.is_empty()) {
        if std::path::Path::new("/proc/self/setgroups").exists() {
            setgroups = Some(SetGroups::Deny);
        }
        // else: left None per distilled spec §9's open-question resolution.
    }

    let mount_point = req
        .mount_point
        .unwrap_or_else(|| PathBuf::from("/proc"));

    let payload = req.payload.ok_or_else(|| {
        NsError::SettingError("a spawn request needs either a command or a function".into())
    })?;

    Ok(SpawnPlan {
        namespaces,
        map_root: req.map_root,
        mount_proc: req.mount_proc,
        mount_point,
        ns_bind_dir: req.ns_bind_dir,
        payload,
        propagation,
        setgroups,
        users_map,
        groups_map,
        init_prog: req.init_prog,
        interactive: req.interactive,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> SpawnRequest {
        let mut req = SpawnRequest::new();
        req.payload = Some(Payload::Command(vec!["true".into()]));
        req
    }

    #[test]
    fn mutually_exclusive_mapping_without_user_namespace_is_strict_error() {
        // With only `mount` requested and no user namespace, map_root (on
        // by default) must fail strict resolution.
        let mut req = base_request();
        req.namespaces = Some(vec![NamespaceKind::Mount]);
        let result = resolve(req);
        assert!(matches!(result, Err(NsError::SettingError(_))));
    }

    #[test]
    fn permissive_mode_clears_map_root_instead_of_failing() {
        let mut req = base_request();
        req.namespaces = Some(vec![NamespaceKind::Mount]);
        req.strict = false;
        let plan = resolve(req).unwrap();
        assert!(!plan.map_root);
        assert!(plan.users_map.is_empty());
    }

    #[test]
    fn negative_namespaces_removed_from_default_set() {
        NamespaceKind::Net.set_available(true);
        NamespaceKind::Ipc.set_available(true);
        NamespaceKind::Uts.set_available(true);
        NamespaceKind::Cgroup.set_available(true);
        NamespaceKind::Pid.set_available(true);
        NamespaceKind::User.set_available(true);

        let mut req = base_request();
        req.negative_namespaces = vec![NamespaceKind::Net];
        req.strict = false;
        let plan = resolve(req).unwrap();
        assert!(!plan.has(NamespaceKind::Net));
        assert!(plan.has(NamespaceKind::Mount));
    }
}
