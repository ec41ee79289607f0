//! Process primitives: `fork()`, child-exit-status translation, and the
//! supervisor's signal-driven wait loop (§4.3, §5).
use std::io;

use libc;
use log::debug;

use signal_hook::iterator::Signals;

use super::err::{Error, Result};

/// Result of `fork()`.
pub enum Fork {
    Parent(libc::pid_t),
    Child,
}

/// Wraps `fork()`.
pub fn fork() -> Result<Fork> {
    match unsafe { libc::fork() } {
        -1 => Err(Error::last_os_error("fork")),
        0 => Ok(Fork::Child),
        pid => Ok(Fork::Parent(pid)),
    }
}

/// Wraps `kill()`.
pub fn kill(pid: libc::pid_t, sig: libc::c_int) -> Result<()> {
    debug!("kill({}, {})", pid, sig);
    if 0 != unsafe { libc::kill(pid, sig) } {
        return Err(Error::last_os_error("kill"));
    }
    Ok(())
}

enum Reaped {
    Busy,
    Done(i32),
}

/// Non-blocking `waitpid`, translating the raw status into an exit code
/// per §6.3 (exited -> its own code; signaled -> `128 + signal`).
fn try_reap(pid: libc::pid_t) -> Result<Reaped> {
    let mut status: libc::c_int = 0;
    let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    if ret == -1 {
        Err(Error::last_os_error("waitpid"))
    } else if ret == 0 {
        Ok(Reaped::Busy)
    } else {
        Ok(Reaped::Done(exit_code_of(status)))
    }
}

/// Translate a raw `waitpid` status into the process's exit code, per
/// §6.3: `0..127` is the process's own exit code; `128+N` means it was
/// terminated by signal `N`.
pub fn exit_code_of(status: libc::c_int) -> i32 {
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status)
    } else {
        1
    }
}

/// The four signals that the supervisor treats as a request to tear down
/// the sandbox (§4.3, §5).
const TERMINATING: [libc::c_int; 4] = [libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGQUIT];

/// Block the supervised signal set and enter the supervisor's wait loop
/// (§4.3's state machine: `SIGWAIT_LOOP`). Used identically by the
/// `sandbox-run` supervisor and by `sandbox-enter --fork`'s parent
/// (§4.4 step 5).
///
/// On a terminating signal (`SIGINT`/`SIGTERM`/`SIGHUP`/`SIGQUIT`): sends
/// `SIGKILL` to `child` and returns `128 + signal`. On reap via
/// `SIGCHLD`: returns the child's own translated exit code.
pub fn supervise(child: libc::pid_t) -> Result<i32> {
    let signals = Signals::new(TERMINATING.iter().chain([libc::SIGCHLD].iter()).copied())
        .map_err(|e: io::Error| Error::os("sigwait setup", e))?;
    let mut isig = signals.forever();

    debug!("supervisor waiting on PID {}", child);
    loop {
        match isig.next() {
            Some(libc::SIGCHLD) => {
                debug!("SIGCHLD");
                if let Reaped::Done(code) = try_reap(child)? {
                    return Ok(code);
                }
                // spurious wakeup (reaper raced a different descendant):
                // loop around and keep waiting.
            }
            Some(sig) => {
                debug!("supervisor received terminating signal {}", sig);
                // PR_SET_PDEATHSIG already targets the child with
                // SIGKILL, but it may have reset its death signal, so
                // send explicitly too.
                let _ = kill(child, libc::SIGKILL);
                return Ok(128 + sig);
            }
            None => return Err(Error::os("sigwait", io::Error::last_os_error())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_exited_zero() {
        // WIFEXITED(status) with exit code 0: raw status is (code << 8)
        assert_eq!(exit_code_of(0), 0);
    }

    #[test]
    fn exit_code_exited_nonzero() {
        assert_eq!(exit_code_of(3 << 8), 3);
    }

    #[test]
    fn exit_code_signaled() {
        // low byte holds the terminating signal for WIFSIGNALED statuses
        let sig = libc::SIGTERM;
        assert_eq!(exit_code_of(sig), 128 + sig);
    }

    #[test]
    fn fork_and_reap_child() {
        match fork().unwrap() {
            Fork::Child => unsafe { libc::_exit(7) },
            Fork::Parent(pid) => {
                let mut status: libc::c_int = 0;
                unsafe {
                    libc::waitpid(pid, &mut status, 0);
                }
                assert_eq!(exit_code_of(status), 7);
            }
        }
    }
}
