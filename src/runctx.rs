//! `RunCtx`: the bundle describing the final in-sandbox (or in-namespace)
//! process, and `execute_run_ctx`, the shared exec path used by both
//! `sandbox-run` and `sandbox-enter` (§4.1).

use std::ffi::CString;
use std::path::PathBuf;

use libc;
use log::debug;

use super::err::{Error, Result};
use super::user;

/// uid/gid/cwd/env/command/flags describing how the final occupant
/// process of a sandbox (or joined namespace set) is launched.
#[derive(Debug, Clone)]
pub struct RunCtx {
    pub uid: Option<libc::uid_t>,
    pub gid: Option<libc::gid_t>,
    pub work_dir: Option<PathBuf>,
    /// The complete environment of the new process; the host environment
    /// is never inherited (§6.5).
    pub env: Vec<String>,
    /// `command[0]` is both the path passed to `execve` and `argv[0]`.
    pub command: Vec<String>,
    /// Request `PR_SET_NO_NEW_PRIVS`.  Always set by `sandbox-run` when a
    /// uid or gid is given; user-controlled otherwise (see DESIGN.md).
    pub lock_privs: bool,
}

impl RunCtx {
    pub fn new(command: Vec<String>) -> RunCtx {
        RunCtx {
            uid: None,
            gid: None,
            work_dir: None,
            env: Vec::new(),
            command,
            lock_privs: false,
        }
    }
}

/// Transition the current process into its final identity and replace
/// its image.  Returns only on failure — the caller must treat any
/// return as process-level failure, since there is no way to "continue"
/// past a failed privilege drop or a failed exec.
///
/// Step order is load-bearing (§4.1): groups before gid before uid;
/// `PR_SET_NO_NEW_PRIVS` after the uid/gid change (it only affects
/// subsequent execs); `chdir` last, immediately before `execve`.
pub fn execute_run_ctx(ctx: &RunCtx) -> Result<()> {
    if ctx.uid.is_some() || ctx.gid.is_some() {
        user::clear_groups()?;
    }
    if let Some(gid) = ctx.gid {
        user::setgid(gid)?;
    }
    if let Some(uid) = ctx.uid {
        user::setuid(uid)?;
    }
    if ctx.lock_privs {
        lock_privs()?;
    }
    if let Some(ref dir) = ctx.work_dir {
        std::env::set_current_dir(dir)
            .map_err(|io| Error::setup("chdir", dir, io))?;
    }

    exec(&ctx.command, &ctx.env)
}

fn lock_privs() -> Result<()> {
    debug!("prctl(PR_SET_NO_NEW_PRIVS, 1)");
    if 0 != unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) } {
        return Err(Error::last_privilege_error("cannot lock privileges"));
    }
    Ok(())
}

/// Final `execve`.  `command[0]` is the path to the binary and also
/// `argv[0]`; `env` is the complete environment, order-preserving.
fn exec(command: &[String], env: &[String]) -> Result<()> {
    if command.is_empty() {
        return Err(Error::invalid("empty command"));
    }
    let path = CString::new(command[0].as_bytes())?;
    let mut argv: Vec<CString> = Vec::with_capacity(command.len());
    for arg in command {
        argv.push(CString::new(arg.as_bytes())?);
    }
    let mut envp: Vec<CString> = Vec::with_capacity(env.len());
    for kv in env {
        envp.push(CString::new(kv.as_bytes())?);
    }

    let mut c_argv: Vec<*const libc::c_char> = argv.iter().map(|s| s.as_ptr()).collect();
    c_argv.push(std::ptr::null());
    let mut c_envp: Vec<*const libc::c_char> = envp.iter().map(|s| s.as_ptr()).collect();
    c_envp.push(std::ptr::null());

    debug!("execve({:?}, {:?}, env of {} vars)", command[0], command, env.len());
    unsafe {
        libc::execve(path.as_ptr(), c_argv.as_ptr(), c_envp.as_ptr());
    }
    // only reached if execve failed
    Err(Error::exec(&command[0]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_has_no_privilege_fields_set() {
        let ctx = RunCtx::new(vec!["/bin/sh".into()]);
        assert!(ctx.uid.is_none());
        assert!(ctx.gid.is_none());
        assert!(!ctx.lock_privs);
        assert!(ctx.env.is_empty());
    }

    #[test]
    fn exec_rejects_empty_command() {
        let err = exec(&[], &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn exec_rejects_embedded_nul() {
        let err = exec(&["bad\0path".to_string()], &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
