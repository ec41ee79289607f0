use std::path::{Path, PathBuf};
use std::{error, fmt, io};

/// Crate-wide error type.
///
/// Variants map onto the error kinds in the design: each failed syscall
/// carries the operation name and, where one exists, the path it acted on,
/// so callers can print a single actionable diagnostic line to stderr.
#[derive(Debug)]
pub enum Error {
    /// Malformed CLI input: a bad mount spec, unknown option, unresolvable
    /// user/group, or a missing positional argument.
    InvalidArgument(String),
    /// A mount, `pivot_root`, `chdir`, or `umount2` failed while building
    /// the sandbox filesystem view.
    SandboxSetupFailed {
        op: String,
        path: PathBuf,
        io: io::Error,
    },
    /// `setgroups`/`setgid`/`setuid`/`PR_SET_NO_NEW_PRIVS` failed.
    PrivilegeChangeFailed { op: String, io: io::Error },
    /// The final `execve` into the target command failed.
    ExecFailed { command: PathBuf, io: io::Error },
    /// The supervisor could not open/write/close the pid file.
    SupervisorIoFailed {
        op: String,
        path: PathBuf,
        io: io::Error,
    },
    /// A bare OS error with no associated path (unshare, clone, setns, fork, ...).
    Os { op: String, io: io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invalid<S: AsRef<str>>(msg: S) -> Self {
        Error::InvalidArgument(msg.as_ref().to_string())
    }

    pub fn setup<S: AsRef<str>, P: AsRef<Path>>(op: S, path: P, io: io::Error) -> Self {
        Error::SandboxSetupFailed {
            op: op.as_ref().to_string(),
            path: path.as_ref().to_path_buf(),
            io,
        }
    }

    pub fn last_setup_error<S: AsRef<str>, P: AsRef<Path>>(op: S, path: P) -> Self {
        Self::setup(op, path, io::Error::last_os_error())
    }

    pub fn privilege<S: AsRef<str>>(op: S, io: io::Error) -> Self {
        Error::PrivilegeChangeFailed {
            op: op.as_ref().to_string(),
            io,
        }
    }

    pub fn last_privilege_error<S: AsRef<str>>(op: S) -> Self {
        Self::privilege(op, io::Error::last_os_error())
    }

    pub fn exec<P: AsRef<Path>>(command: P) -> Self {
        Error::ExecFailed {
            command: command.as_ref().to_path_buf(),
            io: io::Error::last_os_error(),
        }
    }

    pub fn supervisor<S: AsRef<str>, P: AsRef<Path>>(op: S, path: P, io: io::Error) -> Self {
        Error::SupervisorIoFailed {
            op: op.as_ref().to_string(),
            path: path.as_ref().to_path_buf(),
            io,
        }
    }

    pub fn last_supervisor_error<S: AsRef<str>, P: AsRef<Path>>(op: S, path: P) -> Self {
        Self::supervisor(op, path, io::Error::last_os_error())
    }

    pub fn os<S: AsRef<str>>(op: S, io: io::Error) -> Self {
        Error::Os {
            op: op.as_ref().to_string(),
            io,
        }
    }

    pub fn last_os_error<S: AsRef<str>>(op: S) -> Self {
        Self::os(op, io::Error::last_os_error())
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::SandboxSetupFailed { io, .. } => Some(io),
            Self::PrivilegeChangeFailed { io, .. } => Some(io),
            Self::ExecFailed { io, .. } => Some(io),
            Self::SupervisorIoFailed { io, .. } => Some(io),
            Self::Os { io, .. } => Some(io),
            Self::InvalidArgument(_) => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "{}", msg),
            Self::SandboxSetupFailed { op, path, io } => {
                write!(f, "{} on {}: {}", op, path.display(), io)
            }
            Self::PrivilegeChangeFailed { op, io } => write!(f, "{}: {}", op, io),
            Self::ExecFailed { command, io } => {
                write!(f, "exec {} failed: {}", command.display(), io)
            }
            Self::SupervisorIoFailed { op, path, io } => {
                write!(f, "{} on {}: {}", op, path.display(), io)
            }
            Self::Os { op, io } => write!(f, "{}: {}", op, io),
        }
    }
}

impl From<std::ffi::NulError> for Error {
    fn from(_inp: std::ffi::NulError) -> Self {
        Error::invalid("argument contains an embedded NUL byte")
    }
}

impl From<std::num::ParseIntError> for Error {
    fn from(inp: std::num::ParseIntError) -> Self {
        Error::invalid(format!("not a number: {}", inp))
    }
}

impl From<io::Error> for Error {
    fn from(io: io::Error) -> Self {
        Error::os("io", io)
    }
}
