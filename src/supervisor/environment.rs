//! Execution environment for transport processes
//!
//! The launcher talks to the user's audio session, so it needs HOME, USER and
//! XDG_RUNTIME_DIR of the identity it runs as. supervisord does not set
//! these, so they are resolved from the passwd database and injected.
//!
//! The local passwd file is read first. Users it does not list (LDAP, sssd)
//! are looked up through NSS with `getent passwd`.

use std::path::Path;
use std::process::{Command, Stdio};

/// One passwd entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    /// Login name
    pub name: String,
    /// Numeric user ID
    pub uid: u32,
    /// Home directory
    pub home: String,
}

/// Find `user` in passwd-formatted `contents`
pub fn lookup_user(contents: &str, user: &str) -> Option<UserEntry> {
    contents
        .lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 7 || fields[0] != user {
                return None;
            }
            Some(UserEntry {
                name: fields[0].to_string(),
                uid: fields[2].parse().ok()?,
                home: fields[5].to_string(),
            })
        })
}

/// Look `user` up through NSS with `getent passwd <user>`
pub fn query_nss(getent: &Path, user: &str) -> Option<UserEntry> {
    let output = Command::new(getent)
        .args(["passwd", user])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output();

    match output {
        Ok(output) if output.status.success() => {
            lookup_user(&String::from_utf8_lossy(&output.stdout), user)
        }
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(command = %getent.display(), error = %e, "NSS lookup unavailable");
            None
        }
    }
}

/// Environment block for processes run as `user`
///
/// A user missing from the database is not fatal: a warning is logged and
/// only `USER` is injected.
pub fn resolve_environment(
    user: &str,
    passwd_path: &Path,
    getent: Option<&Path>,
) -> Vec<(String, String)> {
    let local = match std::fs::read_to_string(passwd_path) {
        Ok(contents) => lookup_user(&contents, user),
        Err(e) => {
            tracing::debug!(
                user = user,
                path = %passwd_path.display(),
                error = %e,
                "Cannot read user database"
            );
            None
        }
    };
    let entry = local.or_else(|| getent.and_then(|getent| query_nss(getent, user)));

    match entry {
        Some(entry) => vec![
            ("HOME".to_string(), entry.home),
            ("USER".to_string(), entry.name),
            (
                "XDG_RUNTIME_DIR".to_string(),
                format!("/run/user/{}", entry.uid),
            ),
        ],
        None => {
            tracing::warn!(user = user, "User not found, environment limited to USER");
            vec![("USER".to_string(), user.to_string())]
        }
    }
}
