//! Wrappers for UID/GID syscalls and user/group database lookups.

use std::ffi::CString;
use std::ptr;

use libc;

use super::err::{Error, Result};

pub fn getuid() -> libc::uid_t {
    unsafe { libc::getuid() }
}

pub fn getgid() -> libc::gid_t {
    unsafe { libc::getgid() }
}

/// Set real, effective, and saved gid in one call.
pub fn setgid(id: libc::gid_t) -> Result<()> {
    if 0 != unsafe { libc::setresgid(id, id, id) } {
        return Err(Error::last_privilege_error("cannot set gid"));
    }
    Ok(())
}

/// Set real, effective, and saved uid in one call.
pub fn setuid(id: libc::uid_t) -> Result<()> {
    if 0 != unsafe { libc::setresuid(id, id, id) } {
        return Err(Error::last_privilege_error("cannot set uid"));
    }
    Ok(())
}

/// Drop all supplementary groups.
pub fn clear_groups() -> Result<()> {
    if 0 != unsafe { libc::setgroups(0, ptr::null()) } {
        return Err(Error::last_privilege_error(
            "cannot drop supplementary groups",
        ));
    }
    Ok(())
}

/// Resolve a `-u USER|UID` / `-g GROUP|GID` argument: a bare non-negative
/// decimal number is taken as a numeric id directly; anything else is
/// looked up by name in the system user/group database.
pub fn resolve_user(spec: &str) -> Result<libc::uid_t> {
    if let Ok(id) = spec.parse::<libc::uid_t>() {
        return Ok(id);
    }
    lookup_passwd(spec)
        .ok_or_else(|| Error::invalid(format!("invalid user: {}", spec)))
}

pub fn resolve_group(spec: &str) -> Result<libc::gid_t> {
    if let Ok(id) = spec.parse::<libc::gid_t>() {
        return Ok(id);
    }
    lookup_group(spec)
        .ok_or_else(|| Error::invalid(format!("invalid group: {}", spec)))
}

/// `getpwnam_r()`, growing the scratch buffer on `ERANGE`.
fn lookup_passwd(name: &str) -> Option<libc::uid_t> {
    let cname = CString::new(name).ok()?;
    let mut buf = vec![0u8; 1024];
    loop {
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = ptr::null_mut();
        let ret = unsafe {
            libc::getpwnam_r(
                cname.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        if ret == libc::ERANGE {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if ret != 0 || result.is_null() {
            return None;
        }
        return Some(pwd.pw_uid);
    }
}

/// `getgrnam_r()`, growing the scratch buffer on `ERANGE`.
fn lookup_group(name: &str) -> Option<libc::gid_t> {
    let cname = CString::new(name).ok()?;
    let mut buf = vec![0u8; 1024];
    loop {
        let mut grp: libc::group = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::group = ptr::null_mut();
        let ret = unsafe {
            libc::getgrnam_r(
                cname.as_ptr(),
                &mut grp,
                buf.as_mut_ptr() as *mut libc::c_char,
                buf.len(),
                &mut result,
            )
        };
        if ret == libc::ERANGE {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if ret != 0 || result.is_null() {
            return None;
        }
        return Some(grp.gr_gid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_numeric_user() {
        assert_eq!(resolve_user("1000").unwrap(), 1000);
    }

    #[test]
    fn resolve_numeric_user_zero() {
        // zero (superuser) must not be rejected by the parser
        assert_eq!(resolve_user("0").unwrap(), 0);
    }

    #[test]
    fn resolve_numeric_group() {
        assert_eq!(resolve_group("1000").unwrap(), 1000);
    }

    #[test]
    fn resolve_unknown_user_name_is_invalid_argument() {
        let err = resolve_user("no-such-user-should-exist-xyz").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn current_user_resolves_by_name() {
        // root always exists in the passwd db under test containers
        assert_eq!(resolve_user("root").unwrap(), 0);
    }
}
