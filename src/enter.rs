//! `sandbox-enter`'s namespace-join loop (§4.4): attach the caller, or a
//! forked child of it, to the namespaces of a running sandbox.
use std::ffi::CString;
use std::fs;
use std::io;
use std::path::PathBuf;

use libc;
use log::{debug, warn};

use super::err::{Error, Result};
use super::proc::{self, Fork};
use super::runctx::{execute_run_ctx, RunCtx};

/// Namespaces whose `setns` failure is tolerated (§4.4 step 4, §7): they
/// may be intentionally shared with the host in permissive setups.
const BEST_EFFORT: &[&str] = &["user", "net"];

/// `chdir("/proc/<pid>/ns")` and join every namespace link found there,
/// then either fork and run `execute_run_ctx` in the child (if `fork` is
/// set) or run it directly in the caller.
///
/// Forking is required when the joined namespaces include a PID
/// namespace, since `setns(CLONE_NEWPID)` only affects children of the
/// caller, not the calling process itself.
pub fn enter(pid: libc::pid_t, run_ctx: &RunCtx, fork: bool) -> Result<i32> {
    join_namespaces(pid)?;

    if fork {
        match proc::fork()? {
            Fork::Child => {
                if 0 != unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL, 0, 0, 0) } {
                    eprintln!("sandbox-enter: {}", Error::last_os_error("set PR_SET_PDEATHSIG"));
                    unsafe { libc::_exit(1) };
                }
                if let Err(err) = execute_run_ctx(run_ctx) {
                    eprintln!("sandbox-enter: {}", err);
                    unsafe { libc::_exit(1) };
                }
                unreachable!("execute_run_ctx returned Ok");
            }
            Fork::Parent(child) => {
                drop_privileges(run_ctx)?;
                proc::supervise(child)
            }
        }
    } else {
        execute_run_ctx(run_ctx)?;
        unreachable!("execute_run_ctx returned Ok")
    }
}

fn drop_privileges(run_ctx: &RunCtx) -> Result<()> {
    use super::user;
    if run_ctx.uid.is_some() || run_ctx.gid.is_some() {
        user::clear_groups()?;
    }
    if let Some(gid) = run_ctx.gid {
        user::setgid(gid)?;
    }
    if let Some(uid) = run_ctx.uid {
        user::setuid(uid)?;
    }
    Ok(())
}

fn join_namespaces(pid: libc::pid_t) -> Result<()> {
    let ns_dir = PathBuf::from(format!("/proc/{}/ns", pid));
    std::env::set_current_dir(&ns_dir).map_err(|io| Error::setup("chdir", &ns_dir, io))?;

    let entries = fs::read_dir(".").map_err(|io| Error::setup("read namespace directory", &ns_dir, io))?;

    for entry in entries {
        let entry = entry.map_err(|io| Error::setup("read namespace directory", &ns_dir, io))?;
        let name = entry.file_name();
        let name = name.to_string_lossy().into_owned();

        let file_type = entry
            .file_type()
            .map_err(|io| Error::setup("stat namespace entry", &name, io))?;
        if !file_type.is_symlink() {
            continue;
        }

        join_one(&name)?;
    }
    Ok(())
}

fn join_one(name: &str) -> Result<()> {
    let cname = CString::new(name)?;
    let best_effort = BEST_EFFORT.contains(&name);

    let fd = unsafe { libc::open(cname.as_ptr(), libc::O_RDONLY) };
    if fd < 0 {
        let io = io::Error::last_os_error();
        if io.kind() == io::ErrorKind::NotFound {
            // kernel does not expose this namespace type; skip (§7).
            debug!("namespace link {:?} does not exist, skipping", name);
            return Ok(());
        }
        return Err(Error::setup("open namespace link", name, io));
    }

    debug!("setns({:?})", name);
    let ret = unsafe { libc::setns(fd, 0) };
    let setns_err = if ret != 0 { Some(io::Error::last_os_error()) } else { None };
    unsafe {
        libc::close(fd);
    }

    match setns_err {
        None => Ok(()),
        Some(io) if best_effort => {
            warn!("could not join {} namespace: {} (continuing)", name, io);
            Ok(())
        }
        Some(io) => Err(Error::setup("setns", name, io)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_effort_set_is_user_and_net_only() {
        assert!(BEST_EFFORT.contains(&"user"));
        assert!(BEST_EFFORT.contains(&"net"));
        assert!(!BEST_EFFORT.contains(&"mnt"));
        assert!(!BEST_EFFORT.contains(&"pid"));
    }

    #[test]
    fn join_one_skips_nonexistent_link() {
        // no symlink named this exists in the test's cwd
        join_one("definitely-not-a-namespace-link").unwrap();
    }
}
