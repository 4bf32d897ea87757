//! Resolution of the user whose instances are targeted.

use corral_common::error::{CorralError, Result};
use nix::unistd::{Uid, User, geteuid, getuid};

/// Returns the login name of the invoking user.
///
/// # Errors
///
/// Returns an error if the real uid has no passwd entry and `$USER` is
/// unset.
pub fn current_user() -> Result<String> {
    let uid = getuid();
    match User::from_uid(uid) {
        Ok(Some(user)) => Ok(user.name),
        Ok(None) | Err(_) => std::env::var("USER").map_err(|_| CorralError::NotFound {
            kind: "user",
            id: uid.to_string(),
        }),
    }
}

/// Picks the owner to act on, enforcing that only root may act on
/// another user's instances.
///
/// # Errors
///
/// Returns [`CorralError::PermissionDenied`] if `requested` names another
/// user and the caller is not root.
pub fn resolve_owner(requested: Option<&str>, current: &str, euid: Uid) -> Result<String> {
    match requested {
        None | Some("") => Ok(current.to_owned()),
        Some(user) if user == current || euid.is_root() => Ok(user.to_owned()),
        Some(user) => Err(CorralError::PermissionDenied {
            message: format!("only root can act on instances of user {user}"),
        }),
    }
}

/// [`resolve_owner`] for the calling process.
///
/// # Errors
///
/// See [`current_user`] and [`resolve_owner`].
pub fn authorize_owner(requested: Option<&str>) -> Result<String> {
    let current = current_user()?;
    resolve_owner(requested, &current, geteuid())
}
