//! C5: the id-map compiler.
//!
//! Parses symbolic `"inner outer [length]"` triples into [`IdMapEntry`],
//! resolving non-numeric tokens against the user/group database, and
//! checks whether an unprivileged caller is authorized to request a given
//! mapping. Grounded on
//! `original_source/procszoo/c_functions/__init__.py::_covert_map_to_tuple`
//! / `_accetable_user_map` / `_accetable_group_map`.

use nix::unistd::{Group, User};

use crate::error::{NsError, Result};
use crate::syscalls::{getresgid, getresuid};

/// Maximum number of user map entries accepted per spawn (distilled
/// spec §3).
pub const MAX_USER_ENTRIES: usize = 5;
/// Maximum number of group map entries accepted per spawn.
pub const MAX_GROUP_ENTRIES: usize = 5;

/// A single `inner outer length` mapping triple, ready to be written as a
/// `uid_map`/`gid_map` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMapEntry {
    pub inner_id: u32,
    pub outer_id: u32,
    pub length: u32,
}

/// Which database (`getpwnam`/`getgrnam`) a symbolic token resolves
/// against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapKind {
    User,
    Group,
}

impl IdMapEntry {
    /// Parse `"inner outer"` (length defaults to 1) or `"inner outer
    /// length"`. Tokens may be numeric or a name in the local user/group
    /// database.
    pub fn parse(entry: &str, kind: MapKind) -> Result<Self> {
        let tokens: Vec<&str> = entry.split_whitespace().collect();
        if tokens.len() < 2 || tokens.len() > 3 {
            return Err(NsError::SettingError(format!(
                "id map entry must have 2 or 3 fields: {entry:?}"
            )));
        }

        let length = match tokens.get(2) {
            None => 1,
            Some(s) => s
                .parse::<u32>()
                .map_err(|_| NsError::SettingError(format!("invalid length in {entry:?}")))?,
        };

        let inner_id = resolve_id(tokens[0], kind)?;
        let outer_id = resolve_id(tokens[1], kind)?;

        Ok(IdMapEntry {
            inner_id,
            outer_id,
            length,
        })
    }

    /// Render as a `uid_map`/`gid_map` line, without the trailing newline.
    pub fn to_map_line(self) -> String {
        format!("{} {} {}", self.inner_id, self.outer_id, self.length)
    }

    /// distilled spec §4.5: for a non-root caller, every id in
    /// `[outer, outer+length)` must be one of the caller's real/effective/
    /// saved ids, and the range must not exceed 3.
    pub fn is_authorized(self, kind: MapKind) -> Result<bool> {
        if nix::unistd::geteuid().is_root() {
            return Ok(true);
        }

        if self.length > 3 {
            return Ok(false);
        }

        let ids: [u32; 3] = match kind {
            MapKind::User => {
                let (r, e, s) = getresuid()?;
                [r, e, s]
            }
            MapKind::Group => {
                let (r, e, s) = getresgid()?;
                [r, e, s]
            }
        };

        for offset in 0..self.length {
            let id = self.outer_id + offset;
            if !ids.contains(&id) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn resolve_id(token: &str, kind: MapKind) -> Result<u32> {
    if let Ok(numeric) = token.parse::<u32>() {
        return Ok(numeric);
    }

    match kind {
        MapKind::User => User::from_name(token)
            .map_err(|e| NsError::from_errno("getpwnam", e))?
            .map(|u| u.uid.as_raw())
            .ok_or_else(|| NsError::SettingError(format!("unknown user: {token:?}"))),
        MapKind::Group => Group::from_name(token)
            .map_err(|e| NsError::from_errno("getgrnam", e))?
            .map(|g| g.gid.as_raw())
            .ok_or_else(|| NsError::SettingError(format!("unknown group: {token:?}"))),
    }
}

/// Parse and authorize a full list of map entries, enforcing the 5-entry
/// cap (distilled spec §3, §4.5).
pub fn compile_map(entries: &[String], kind: MapKind) -> Result<Vec<IdMapEntry>> {
    let max = match kind {
        MapKind::User => MAX_USER_ENTRIES,
        MapKind::Group => MAX_GROUP_ENTRIES,
    };
    if entries.len() > max {
        return Err(NsError::SettingError(format!(
            "at most {max} {kind:?} map entries are accepted"
        )));
    }

    let mut compiled = Vec::with_capacity(entries.len());
    for raw in entries {
        let parsed = IdMapEntry::parse(raw, kind)?;
        if !parsed.is_authorized(kind)? {
            return Err(NsError::RequireSuperuser);
        }
        compiled.push(parsed);
    }
    Ok(compiled)
}

/// Write `/proc/<pid>/{setgroups,uid_map,gid_map}` in the kernel-mandated
/// order: `setgroups` before `gid_map`, since the kernel refuses to write
/// `gid_map` for an unprivileged caller while `setgroups` still reads
/// `allow` (user_namespaces(7)). Grounded on
/// `original_source/lib/namespaces.py::Toolbox.setgroups_control`/`map_id`.
pub fn write_maps(
    pid: u32,
    users_map: &[IdMapEntry],
    groups_map: &[IdMapEntry],
    setgroups: Option<crate::resolver::SetGroups>,
) -> Result<()> {
    if let Some(policy) = setgroups {
        let value = match policy {
            crate::resolver::SetGroups::Allow => "allow",
            crate::resolver::SetGroups::Deny => "deny",
        };
        std::fs::write(format!("/proc/{pid}/setgroups"), value)?;
    }
    if !users_map.is_empty() {
        write_map_file(pid, "uid_map", users_map)?;
    }
    if !groups_map.is_empty() {
        write_map_file(pid, "gid_map", groups_map)?;
    }
    Ok(())
}

fn write_map_file(pid: u32, file: &str, entries: &[IdMapEntry]) -> Result<()> {
    let body = entries
        .iter()
        .map(|e| e.to_map_line())
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(format!("/proc/{pid}/{file}"), body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_field_entry_defaulting_length() {
        let e = IdMapEntry::parse("0 1000", MapKind::User).unwrap();
        assert_eq!(e.inner_id, 0);
        assert_eq!(e.outer_id, 1000);
        assert_eq!(e.length, 1);
    }

    #[test]
    fn parses_three_field_entry() {
        let e = IdMapEntry::parse("0 100000 65536", MapKind::User).unwrap();
        assert_eq!(e.length, 65536);
    }

    #[test]
    fn rejects_malformed_entry() {
        assert!(IdMapEntry::parse("0", MapKind::User).is_err());
        assert!(IdMapEntry::parse("0 1 2 3", MapKind::User).is_err());
        assert!(IdMapEntry::parse("0 1 notanumber", MapKind::User).is_err());
    }

    #[test]
    fn to_map_line_format() {
        let e = IdMapEntry {
            inner_id: 0,
            outer_id: 1000,
            length: 1,
        };
        assert_eq!(e.to_map_line(), "0 1000 1");
    }

    #[test]
    fn compile_map_rejects_more_than_five_entries() {
        let entries: Vec<String> = (0..6).map(|i| format!("{i} {i}")).collect();
        assert!(matches!(
            compile_map(&entries, MapKind::User),
            Err(NsError::SettingError(_))
        ));
    }
}
