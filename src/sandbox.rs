//! Sandbox construction: the child entry of `sandbox-run` (§4.2), the
//! `clone(2)` call that creates it (§4.3), and the supervisor that holds
//! the sandbox open, writes the pid file, and reaps the child.
use std::ffi::c_void;
use std::fs;
use std::path::{Path, PathBuf};

use libc;
use log::debug;

use super::err::{Error, Result};
use super::mount::{self, BindMount};
use super::proc;
use super::runctx::{execute_run_ctx, RunCtx};
use super::user;

/// Literal name of the directory used as the pivot stash (§6.4, GLOSSARY).
pub const STASH_DIR: &str = ".hako";

/// Host directory that becomes the new root, the ordered bind mounts to
/// layer on top of it, and the `RunCtx` for the final occupant process.
/// Read-only from the child's perspective once the kernel clone has
/// handed it a copy (§3 lifecycles).
pub struct SandboxConfig {
    pub sandbox_dir: PathBuf,
    pub mounts: Vec<BindMount>,
    pub readonly: bool,
    pub run_ctx: RunCtx,
}

/// One page, matching the distilled spec's §4.3/§9 sizing (the original
/// C source uses eight pages; we follow the authoritative spec here).
fn child_stack_size() -> usize {
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page > 0 {
        page as usize
    } else {
        4096
    }
}

/// `clone(2)` stacks grow down on every architecture this crate targets;
/// hand back the (16-byte aligned) top of the allocation.
fn stack_top(stack: &mut [u8]) -> *mut c_void {
    let top = stack.as_mut_ptr_range().end;
    unsafe { top.sub(top as usize % 16).cast::<c_void>() }
}

extern "C" fn child_trampoline(arg: *mut c_void) -> libc::c_int {
    // Safety: `arg` is the `Box<SandboxConfig>` pointer handed to
    // `libc::clone` below; the clone callback is this process's only
    // consumer of it.
    let cfg = unsafe { Box::from_raw(arg as *mut SandboxConfig) };
    match child_entry(&cfg) {
        // execute_run_ctx only returns on failure; success replaces this
        // image entirely.
        Ok(()) => unreachable!("execute_run_ctx returned Ok"),
        Err(err) => {
            eprintln!("sandbox-run: {}", err);
            1
        }
    }
}

/// Create the child in new mount/PID/IPC/UTS/network namespaces via
/// `clone(2)`, with `CLONE_VFORK` semantics: the call does not return to
/// the caller until the child execs or exits (§4.3, §5). The child's
/// stack is a heap allocation owned by the caller; it must outlive the
/// clone call, which it does because `config` (and thus `stack`) is
/// leaked into the child via `Box::into_raw` and only freed inside the
/// trampoline.
pub fn clone_sandbox(config: SandboxConfig) -> Result<libc::pid_t> {
    let mut stack = vec![0u8; child_stack_size()];
    let top = stack_top(&mut stack);

    let arg = Box::into_raw(Box::new(config)) as *mut c_void;

    let flags = libc::CLONE_VFORK
        | libc::CLONE_NEWPID
        | libc::CLONE_NEWIPC
        | libc::CLONE_NEWNS
        | libc::CLONE_NEWUTS
        | libc::CLONE_NEWNET;

    debug!("clone(0x{:x})", flags);
    let pid = unsafe { libc::clone(child_trampoline, top, flags | libc::SIGCHLD, arg) };
    // `stack` must stay alive until the child has execve'd or exited,
    // which CLONE_VFORK guarantees has already happened by the time
    // clone() returns here.
    drop(stack);
    if pid == -1 {
        // the trampoline never ran; reclaim the leaked config.
        unsafe {
            drop(Box::from_raw(arg as *mut SandboxConfig));
        }
        return Err(Error::last_os_error("clone"));
    }
    Ok(pid)
}

/// Runs inside the freshly cloned child. Builds the filesystem view and
/// hands off to `execute_run_ctx`. Step order mirrors §4.2 exactly;
/// reordering any of these either fails outright or leaks host state
/// into the sandbox.
fn child_entry(cfg: &SandboxConfig) -> Result<()> {
    // 1. parent-death signal, before any other state is established.
    if 0 != unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL, 0, 0, 0) } {
        return Err(Error::last_os_error("set PR_SET_PDEATHSIG"));
    }

    // 2. make `/` a private subtree; pivot_root requires the new root's
    // parent mount not be shared.
    mount::mount("", "/", "", libc::MS_PRIVATE | libc::MS_REC)?;

    // 3. bind the sandbox dir onto itself so it is a mount point distinct
    // from the current root's mount.
    mount::mount(
        &cfg.sandbox_dir,
        &cfg.sandbox_dir,
        "",
        libc::MS_BIND | libc::MS_REC,
    )?;

    // 4. optionally remount read-only; later bind targets are unaffected
    // since this remount is per-mountpoint, not recursive.
    if cfg.readonly {
        mount::remount_readonly(&cfg.sandbox_dir)?;
    }

    // 5/6. pivot into the sandbox dir, stashing the old root at `.hako`.
    let stash = cfg.sandbox_dir.join(STASH_DIR);
    mount::pivot_root(&cfg.sandbox_dir, &stash)?;

    // 7. cwd may still name the pre-pivot root by an invalidated path.
    std::env::set_current_dir("/").map_err(|io| Error::setup("chdir", "/", io))?;

    // 8. apply bind mounts in order; source resolves through the
    // still-mounted old root at `/.hako`.
    let stash_root = Path::new("/").join(STASH_DIR);
    for bm in &cfg.mounts {
        let source = join_under(&stash_root, &bm.host_path);
        mount::mount(&source, &bm.sandbox_path, "", libc::MS_BIND | libc::MS_REC)
            .map_err(|e| annotate_bind_failure(e, &bm.host_path, &bm.sandbox_path))?;
        if bm.readonly {
            mount::remount_readonly(&bm.sandbox_path)
                .map_err(|e| annotate_bind_failure(e, &bm.host_path, &bm.sandbox_path))?;
        }
    }

    // 9. lazily detach the old root; nothing inside the sandbox may
    // reference it past this point.
    mount::umount_lazy(&stash_root)?;

    // 10. hand off to the shared exec path.
    execute_run_ctx(&cfg.run_ctx)
}

/// Re-tag a mount failure with both sides of the bind pair, without
/// re-reading `errno` (which the second syscall attempt would clobber).
fn annotate_bind_failure(err: Error, host: &Path, sandbox: &Path) -> Error {
    match err {
        Error::SandboxSetupFailed { io, .. } => Error::SandboxSetupFailed {
            op: format!("mount {} -> {}", host.display(), sandbox.display()),
            path: sandbox.to_path_buf(),
            io,
        },
        other => other,
    }
}

/// Join `base` with `rel` by treating `rel` as relative even though it
/// is absolute (`/etc` under `/.hako` must mean `/.hako/etc`, not
/// replace `base` outright the way `PathBuf::join` would for an
/// absolute `rel`). Only the leading root is stripped; any `..`/`.`
/// later in `rel` passes through unchanged, matching §4.2 step 8's
/// plain `"/.hako/" + host_path` concatenation (and `hako-run.c`'s
/// `asprintf(&new_host_path, HAKO_DIR "/%s", host_path)`), which leaves
/// such components for the kernel to resolve rather than normalizing
/// them ourselves.
fn join_under(base: &Path, rel: &Path) -> PathBuf {
    base.join(rel.strip_prefix("/").unwrap_or(rel))
}

/// Supervisor: drops its own privileges, optionally writes the pid
/// file, then blocks in the signal-driven wait loop (§4.3).
pub struct Supervisor {
    child: libc::pid_t,
}

impl Supervisor {
    pub fn new(child: libc::pid_t) -> Supervisor {
        Supervisor { child }
    }

    pub fn pid(&self) -> libc::pid_t {
        self.child
    }

    /// Drop the supervisor's own privileges per the same `RunCtx` the
    /// child was given. The supervisor holds no sandbox uid/gid beyond
    /// what is needed to write the pid file.
    pub fn drop_privileges(&self, run_ctx: &RunCtx) -> Result<()> {
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

    /// Open write-truncate, write the decimal pid, close. Both write and
    /// close must succeed.
    pub fn write_pid_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|io| Error::supervisor("open pid file", path, io))?;
        use std::io::Write;
        file.write_all(self.child.to_string().as_bytes())
            .map_err(|io| Error::supervisor("write pid file", path, io))?;
        drop(file);
        Ok(())
    }

    /// Block the supervised signal set and wait for the child to exit or
    /// a terminating signal to arrive, returning the exit code to use
    /// for this process (§4.3, §6.3).
    pub fn supervise(self) -> Result<i32> {
        proc::supervise(self.child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_under_strips_leading_slash() {
        let out = join_under(Path::new("/.hako"), Path::new("/etc/passwd"));
        assert_eq!(out, PathBuf::from("/.hako/etc/passwd"));
    }

    #[test]
    fn join_under_relative_host_path() {
        let out = join_under(Path::new("/.hako"), Path::new("data"));
        assert_eq!(out, PathBuf::from("/.hako/data"));
    }

    #[test]
    fn join_under_leaves_dotdot_for_the_kernel_to_resolve() {
        // mirrors plain "/.hako/" + host_path concatenation: we do not
        // normalize ".." ourselves, the kernel does at mount time.
        let out = join_under(Path::new("/.hako"), Path::new("/foo/../secret"));
        assert_eq!(out, PathBuf::from("/.hako/foo/../secret"));
    }

    #[test]
    fn child_stack_size_is_page_sized() {
        assert!(child_stack_size() >= 4096);
    }
}
