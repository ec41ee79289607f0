//! Mount-namespace primitives: `unshare`, `mount`, `pivot_root`, and the
//! `BindMount` the sandbox child applies after pivoting.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use libc;
use log::debug;

use super::err::{Error, Result};

fn path2cstr<P: AsRef<Path>>(path: P) -> Result<CString> {
    Ok(CString::new(path.as_ref().to_string_lossy().as_bytes())?)
}

/// Wraps `unshare()`.
pub fn unshare(flags: libc::c_int) -> Result<()> {
    debug!("unshare(0x{:x})", flags);
    if unsafe { libc::unshare(flags) } != 0 {
        return Err(Error::last_os_error("unshare"));
    }
    Ok(())
}

/// Wraps `mount()`.  `src` and `fstype` may be empty, matching the C
/// convention of passing `NULL` for a bind mount or a plain remount.
pub fn mount<A, B>(src: A, target: B, fstype: &str, flags: libc::c_ulong) -> Result<()>
where
    A: AsRef<Path>,
    B: AsRef<Path>,
{
    debug!(
        "mount({:?}, {:?}, {:?}, 0x{:x})",
        src.as_ref().display(),
        target.as_ref().display(),
        fstype,
        flags
    );
    let csrc = path2cstr(&src)?;
    let ctarget = path2cstr(&target)?;
    let cfstype = CString::new(fstype)?;
    let ret = unsafe {
        libc::mount(
            csrc.as_ptr(),
            ctarget.as_ptr(),
            cfstype.as_ptr(),
            flags,
            std::ptr::null(),
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(Error::last_setup_error("mount", target))
    }
}

/// Remount an existing mount point read-only.  `MS_RDONLY` cannot be set
/// together with `MS_BIND` in the initial bind; it must follow as a
/// separate `MS_REMOUNT | MS_BIND | MS_RDONLY` call against the same
/// target.
pub fn remount_readonly<P: AsRef<Path>>(target: P) -> Result<()> {
    mount(
        "",
        &target,
        "",
        libc::MS_REMOUNT | libc::MS_BIND | libc::MS_RDONLY,
    )
}

/// Wraps `umount2(..., MNT_DETACH)`: lazily unmount, orphaning any open
/// file descriptors into the mount rather than blocking on them.
pub fn umount_lazy<P: AsRef<Path>>(path: P) -> Result<()> {
    debug!("umount2({:?}, MNT_DETACH)", path.as_ref().display());
    let cpath = path2cstr(&path)?;
    if unsafe { libc::umount2(cpath.as_ptr(), libc::MNT_DETACH) } == 0 {
        Ok(())
    } else {
        Err(Error::last_setup_error("umount2", path))
    }
}

unsafe fn sys_pivot_root(new_root: *const libc::c_char, old_root: *const libc::c_char) -> libc::c_int {
    libc::syscall(libc::SYS_pivot_root, new_root, old_root) as libc::c_int
}

/// Wraps `pivot_root()`.  No `libc` wrapper exists; this goes through the
/// raw syscall number.
pub fn pivot_root<A: AsRef<Path>, B: AsRef<Path>>(new_root: A, old_root: B) -> Result<()> {
    debug!(
        "pivot_root({:?}, {:?})",
        new_root.as_ref().display(),
        old_root.as_ref().display()
    );
    let cnew = path2cstr(&new_root)?;
    let cold = path2cstr(&old_root)?;
    if unsafe { sys_pivot_root(cnew.as_ptr(), cold.as_ptr()) } == 0 {
        Ok(())
    } else {
        Err(Error::last_setup_error("pivot_root", new_root))
    }
}

/// One `(host_path, sandbox_path, readonly)` triple from `-m`/`--mount`.
///
/// `host_path` is valid in the host's original mount namespace;
/// `sandbox_path` is valid inside the sandbox root once pivoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub sandbox_path: PathBuf,
    pub readonly: bool,
}

impl BindMount {
    /// Parse a `HOST[:SANDBOX[:ro|rw]]`-shaped mount spec (§4.5).  Exactly
    /// two or three colon-separated tokens are accepted; a fourth, or a
    /// single token with no `:`, is rejected.  `MODE` defaults to `rw`.
    pub fn parse(spec: &str) -> Result<BindMount> {
        let tokens: Vec<&str> = spec.split(':').collect();
        let (host, sandbox, readonly) = match tokens.as_slice() {
            [host, sandbox] => (*host, *sandbox, false),
            [host, sandbox, "ro"] => (*host, *sandbox, true),
            [host, sandbox, "rw"] => (*host, *sandbox, false),
            _ => return Err(Error::invalid(format!("invalid mount: {}", spec))),
        };
        if host.is_empty() || sandbox.is_empty() {
            return Err(Error::invalid(format!("invalid mount: {}", spec)));
        }
        Ok(BindMount {
            host_path: PathBuf::from(host),
            sandbox_path: PathBuf::from(sandbox),
            readonly,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_two_tokens_defaults_rw() {
        let m = BindMount::parse("/etc:/etc").unwrap();
        assert_eq!(m.host_path, PathBuf::from("/etc"));
        assert_eq!(m.sandbox_path, PathBuf::from("/etc"));
        assert!(!m.readonly);
    }

    #[test]
    fn parse_ro() {
        let m = BindMount::parse("/etc:/etc:ro").unwrap();
        assert!(m.readonly);
    }

    #[test]
    fn parse_rw_explicit() {
        let m = BindMount::parse("/src:/dst:rw").unwrap();
        assert!(!m.readonly);
    }

    #[test]
    fn reject_one_token() {
        assert!(BindMount::parse("a").is_err());
    }

    #[test]
    fn reject_four_tokens() {
        assert!(BindMount::parse("a:b:ro:extra").is_err());
    }

    #[test]
    fn reject_bad_mode() {
        assert!(BindMount::parse("a:b:bogus").is_err());
    }

    #[test]
    fn reject_empty_host() {
        assert!(BindMount::parse(":b").is_err());
    }

    #[test]
    fn reject_empty_sandbox() {
        assert!(BindMount::parse("a:").is_err());
    }
}
