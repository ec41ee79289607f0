//! `sandbox-enter` - join the namespaces of a running sandbox (§6.2).
use std::{env, process};

use hako::enter::enter;
use hako::err::{Error, Result};
use hako::runctx::RunCtx;
use hako::user;

const PROG_NAME: &str = "sandbox-enter";

fn usage() {
    eprint!(
        "Usage: {PROG_NAME} [options] <pid> [command [args...]]

Options:
    -h, --help              Print this message
    -f, --fork              Fork a new process inside the sandbox before
                             running the command (required if the joined
                             namespaces include a PID namespace)
    -u, --user USER|UID     Run as this user
    -g, --group GROUP|GID   Run as this group
    -L, --lock-privs        Prevent the process from gaining new privileges
    -c, --chdir DIR         Change to this directory inside the sandbox
    -e, --env NAME=VALUE    Set an environment variable. Repeatable.

If no command is given, the default is /bin/sh.
"
    );
}

struct Parsed {
    fork: bool,
    uid: Option<libc::uid_t>,
    gid: Option<libc::gid_t>,
    lock_privs: bool,
    work_dir: Option<std::path::PathBuf>,
    env: Vec<String>,
    pid: libc::pid_t,
    command: Vec<String>,
}

fn parse_args() -> Result<Parsed> {
    let mut args = env::args().skip(1).peekable();

    let mut fork = false;
    let mut uid = None;
    let mut gid = None;
    let mut lock_privs = false;
    let mut work_dir = None;
    let mut env_vars = Vec::new();

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
            "-f" | "--fork" => fork = true,
            "-u" | "--user" => uid = Some(user::resolve_user(&argval()?)?),
            "-g" | "--group" => gid = Some(user::resolve_group(&argval()?)?),
            "-L" | "--lock-privs" => lock_privs = true,
            "-c" | "--chdir" => work_dir = Some(std::path::PathBuf::from(argval()?)),
            "-e" | "--env" => env_vars.push(argval()?),
            other => return Err(Error::invalid(format!("invalid option: {}", other))),
        }
    }

    if args.peek().map(|a| a == "--").unwrap_or(false) {
        args.next();
    }

    let pid_arg = args
        .next()
        .ok_or_else(|| Error::invalid(format!("{}: must provide sandbox PID", PROG_NAME)))?;
    let pid: libc::pid_t = pid_arg
        .parse()
        .map_err(|_| Error::invalid(format!("invalid pid: {}", pid_arg)))?;

    if args.peek().map(|a| a == "--").unwrap_or(false) {
        args.next();
    }

    let mut command: Vec<String> = args.collect();
    if command.is_empty() {
        command.push("/bin/sh".to_string());
    }

    Ok(Parsed {
        fork,
        uid,
        gid,
        lock_privs,
        work_dir,
        env: env_vars,
        pid,
        command,
    })
}

fn run() -> Result<i32> {
    let parsed = parse_args()?;

    let mut run_ctx = RunCtx::new(parsed.command);
    run_ctx.uid = parsed.uid;
    run_ctx.gid = parsed.gid;
    run_ctx.work_dir = parsed.work_dir;
    run_ctx.env = parsed.env;
    // §9 Open Question: -L is user-controlled for sandbox-enter, unlike
    // sandbox-run where it is forced on for any uid/gid change.
    run_ctx.lock_privs = parsed.lock_privs;

    enter(parsed.pid, &run_ctx, parsed.fork)
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
