//! `ls -l` style long-name rendering for NAME responses.
//!
//! The v3 draft leaves the longname format open; OpenSSH and everything
//! that interoperates with it renders a UNIX `ls -l` line, which is what
//! graphical clients display in their listing panes.
//!
//! Owner and group names resolve through the host user database via
//! `getent`, with a process-wide cache shared by all sessions. Cached
//! names are never evicted, so a renamed user keeps its old name for the
//! life of the process; the alternative is one subprocess per directory
//! entry.

use crate::sftp::attr::NamedAttr;
use crate::sftp::vfs::SysType;
use chrono::{DateTime, Datelike, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

static USERS: OnceLock<Mutex<HashMap<u32, String>>> = OnceLock::new();
static GROUPS: OnceLock<Mutex<HashMap<u32, String>>> = OnceLock::new();

/// Formats one directory entry as an `ls -l` line:
/// mode, link count (always 1), owner, group, size, time, name.
pub async fn format(entry: &NamedAttr, sys: SysType) -> String {
    let (user, group) = match sys {
        SysType::RemoteSftp => (entry.attr.uid.to_string(), entry.attr.gid.to_string()),
        SysType::Windows => ("-".to_string(), "-".to_string()),
        SysType::Unix => (
            format!("{}({})", user_name(entry.attr.uid).await, entry.attr.uid),
            format!("{}({})", group_name(entry.attr.gid).await, entry.attr.gid),
        ),
    };
    format!(
        "{} {:>4} {:<8} {:<8} {:>8} {:>12} {}",
        entry.attr.mode.render(),
        1,
        user,
        group,
        entry.attr.size,
        time_field(entry.attr.mtime),
        entry.name,
    )
}

/// Renders a timestamp the way `ls -l` does: `Mon _D HH:MM` within the
/// current year, `Mon _D  YYYY` otherwise. Timestamps are UTC.
fn time_field(unix_secs: u32) -> String {
    let t = DateTime::<Utc>::from_timestamp(i64::from(unix_secs), 0).unwrap_or_default();
    if t.year() == Utc::now().year() {
        t.format("%b %e %H:%M").to_string()
    } else {
        t.format("%b %e  %Y").to_string()
    }
}

/// Resolves a uid to a user name, numeric on lookup failure.
pub async fn user_name(uid: u32) -> String {
    let cache = USERS.get_or_init(Default::default);
    if let Some(name) = cache.lock().unwrap().get(&uid) {
        return name.clone();
    }
    let name = getent("passwd", uid)
        .await
        .unwrap_or_else(|| uid.to_string());
    cache.lock().unwrap().insert(uid, name.clone());
    name
}

/// Resolves a gid to a group name, numeric on lookup failure.
pub async fn group_name(gid: u32) -> String {
    let cache = GROUPS.get_or_init(Default::default);
    if let Some(name) = cache.lock().unwrap().get(&gid) {
        return name.clone();
    }
    let name = getent("group", gid).await.unwrap_or_else(|| gid.to_string());
    cache.lock().unwrap().insert(gid, name.clone());
    name
}

#[cfg(unix)]
async fn getent(database: &str, key: u32) -> Option<String> {
    let output = tokio::process::Command::new("getent")
        .arg(database)
        .arg(key.to_string())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let name = text.split(':').next()?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(not(unix))]
async fn getent(_database: &str, _key: u32) -> Option<String> {
    None
}
