//! `sandbox-run` - build a fresh sandbox and run a command inside it
//! (§6.1).
use std::path::PathBuf;
use std::{env, process};

use hako::err::{Error, Result};
use hako::mount::BindMount;
use hako::proc::kill;
use hako::runctx::RunCtx;
use hako::sandbox::{clone_sandbox, SandboxConfig, Supervisor};
use hako::user;

const PROG_NAME: &str = "sandbox-run";

fn usage() {
    eprint!(
        "Usage: {PROG_NAME} [options] <target-dir> [--] [command [args...]]

Options:
    -h, --help                    Print this message
    -m, --mount HOST:SANDBOX[:ro|rw]
                                   Bind mount a file or directory into the
                                   sandbox. Repeatable.
    -R, --read-only               Remount the sandbox root read-only
    -u, --user USER|UID           Run as this user
    -g, --group GROUP|GID         Run as this group
    -L, --lock-privs              Prevent the sandboxed process from
                                   gaining new privileges
    -c, --chdir DIR               Change to this directory inside the
                                   sandbox
    -e, --env NAME=VALUE          Set an environment variable inside the
                                   sandbox (the sandbox's environment is
                                   exactly the set of -e flags given;
                                   the host environment is not inherited).
                                   Repeatable.
    -p, --pid-file FILE           Write the supervisor-observed child pid
                                   to this file

If no command is given, the default is /bin/sh.
"
    );
}

struct Parsed {
    mounts: Vec<BindMount>,
    readonly: bool,
    uid: Option<libc::uid_t>,
    gid: Option<libc::gid_t>,
    lock_privs: bool,
    work_dir: Option<PathBuf>,
    env: Vec<String>,
    pid_file: Option<PathBuf>,
    sandbox_dir: PathBuf,
    command: Vec<String>,
}

fn parse_args() -> Result<Parsed> {
    let mut args = env::args().skip(1).peekable();

    let mut mounts = Vec::new();
    let mut readonly = false;
    let mut uid = None;
    let mut gid = None;
    let mut lock_privs = false;
    let mut work_dir = None;
    let mut env_vars = Vec::new();
    let mut pid_file = None;

    while let Some(arg) = args.peek() {
        if arg == "--" || !arg.starts_with('-') {
            break;
        }
        let arg = args.next().unwrap();
        let mut argval = || {
            args.next()
                .ok_or_else(|| Error::invalid(format!("{}: option requires an argument", arg)))
        };
        match arg.as_str() {
            "-h" | "--help" => {
                usage();
                process::exit(0);
            }
            "-m" | "--mount" => mounts.push(BindMount::parse(&argval()?)?),
            "-R" | "--read-only" => readonly = true,
            "-u" | "--user" => uid = Some(user::resolve_user(&argval()?)?),
            "-g" | "--group" => gid = Some(user::resolve_group(&argval()?)?),
            "-L" | "--lock-privs" => lock_privs = true,
            "-c" | "--chdir" => work_dir = Some(PathBuf::from(argval()?)),
            "-e" | "--env" => env_vars.push(argval()?),
            "-p" | "--pid-file" => pid_file = Some(PathBuf::from(argval()?)),
            other => return Err(Error::invalid(format!("invalid option: {}", other))),
        }
    }

    if args.peek().map(|a| a == "--").unwrap_or(false) {
        args.next();
    }

    let sandbox_dir = args
        .next()
        .ok_or_else(|| Error::invalid(format!("{}: must provide sandbox dir", PROG_NAME)))?;
    let sandbox_dir = PathBuf::from(sandbox_dir);

    if args.peek().map(|a| a == "--").unwrap_or(false) {
        args.next();
    }

    let mut command: Vec<String> = args.collect();
    if command.is_empty() {
        // §9 Open Question: /bin/sh is the more defensible default for
        // interactive use.
        command.push("/bin/sh".to_string());
    }

    Ok(Parsed {
        mounts,
        readonly,
        uid,
        gid,
        lock_privs,
        work_dir,
        env: env_vars,
        pid_file,
        sandbox_dir,
        command,
    })
}

fn run() -> Result<i32> {
    let parsed = parse_args()?;

    if !parsed.sandbox_dir.is_dir() {
        return Err(Error::invalid(format!(
            "{}: not a directory: {}",
            PROG_NAME,
            parsed.sandbox_dir.display()
        )));
    }

    // §9 Open Question: lock_privs is always on for sandbox-run once a
    // uid or gid is requested, user-controlled otherwise.
    let lock_privs = parsed.lock_privs || parsed.uid.is_some() || parsed.gid.is_some();

    let mut run_ctx = RunCtx::new(parsed.command);
    run_ctx.uid = parsed.uid;
    run_ctx.gid = parsed.gid;
    run_ctx.work_dir = parsed.work_dir;
    run_ctx.env = parsed.env;
    run_ctx.lock_privs = lock_privs;

    let config = SandboxConfig {
        sandbox_dir: parsed.sandbox_dir,
        mounts: parsed.mounts,
        readonly: parsed.readonly,
        run_ctx: run_ctx.clone(),
    };

    let child = clone_sandbox(config)?;
    let supervisor = Supervisor::new(child);

    // Early supervisor failures (before the sigwait loop) kill the child
    // to avoid leaving it orphaned (§7).
    if let Err(err) = supervisor.drop_privileges(&run_ctx) {
        let _ = kill(child, libc::SIGKILL);
        return Err(err);
    }
    if let Some(ref pid_file) = parsed.pid_file {
        if let Err(err) = supervisor.write_pid_file(pid_file) {
            let _ = kill(child, libc::SIGKILL);
            return Err(err);
        }
    }

    supervisor.supervise()
}

fn main() {
    hako::logging::setup().ok();
    match run() {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("{}: {}", PROG_NAME, err);
            process::exit(1);
        }
    }
}
