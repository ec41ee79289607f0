//! hako - minimal Linux container launcher
//!
//! Installs two executables:
//! - `sandbox-run`   - build a new sandbox (fresh namespaces + pivot_root
//!   filesystem view) and run a command inside it.
//! - `sandbox-enter` - join the namespaces of an already-running sandbox
//!   and run a command there.
//!
//! The hard part lives in [`sandbox`] (namespace/mount/pivot_root
//! ordering) and [`runctx`] (the shared privilege-drop-then-exec tail
//! used by both binaries).

pub mod enter;
pub mod err;
pub mod logging;
pub mod mount;
pub mod proc;
pub mod runctx;
pub mod sandbox;
pub mod user;

pub use err::{Error, Result};
