//! Tracing facade: translating external trace evidence into store inserts.
//!
//! Three backends share the same side effect, inserting `(path,
//! permission, origin)` evidence into the requirement store:
//!
//! - [`trace_static`] walks the loader chain of the command itself:
//!   `PATH` resolution, intermediate symbolic links, the ELF executable,
//!   and its dynamically loaded shared objects. It additionally returns
//!   the classified program type so the caller can suggest dynamic
//!   tracing for shell-script wrappers.
//! - [`trace_syscalls`] runs the command under `strace` for a bounded
//!   time and parses the merged per-child logs.
//! - [`trace_ebpf`] obtains equivalent evidence from an external
//!   eBPF-based tracer emitting the same log format.
//!
//! The collection work itself is fully delegated to the external tools;
//! this module only resolves, spawns, parses, and inserts.

mod parse;

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::origin::Origin;
use crate::permission::Permission;
use crate::session::Session;
use crate::store::{PolicyId, RequirementStore};

/// Exit status of `timeout` when the traced program was terminated at
/// the deadline. Not an error: the trace simply ran its allotted time.
const TIMEOUT_EXIT: i32 = 124;

/// Syscall filter handed to `strace`.
const TRACED_SYSCALLS: &str = "trace=execve,open,openat,creat,link,mkdir,mkdirat";

/// Log file prefix inside the session log directory.
const TRACE_LOG_PREFIX: &str = "foo.trace";

/// External eBPF tracer expected on `PATH`. It runs the given command to
/// completion and prints strace-format lines on stdout.
const EBPF_TRACER: &str = "dmng-bpf";

/// Classification of a resolved command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    /// A dynamically linked or static ELF executable.
    Elf,
    /// A POSIX shell script.
    PosixScript,
    /// A Bourne-again shell script.
    BourneScript,
    /// Anything else.
    Unknown,
}

impl ProgramKind {
    /// Human-readable label for CLI messaging.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Elf => "ELF program",
            Self::PosixScript => "POSIX shell script",
            Self::BourneScript => "Bourne-again shell script",
            Self::Unknown => "undetermined",
        }
    }
}

/// Resolves `cmd` to an absolute path by searching `PATH`.
///
/// A name containing a `/` is taken as a path and only checked for
/// existence.
///
/// # Errors
///
/// Returns [`Error::CommandNotFound`] when nothing matches.
pub fn resolve_command(cmd: &str) -> Result<PathBuf> {
    let not_found = || Error::CommandNotFound {
        cmd: cmd.to_string(),
    };

    if cmd.contains('/') {
        let path = PathBuf::from(cmd);
        return if path.exists() { Ok(path) } else { Err(not_found()) };
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(cmd))
        .find(|candidate| is_executable(candidate))
        .ok_or_else(not_found)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Follows the symbolic-link chain from `start`, inserting a `LINK` rule
/// (`r-x`) for every intermediate link. Returns the final target.
fn follow_links(store: &mut RequirementStore, pol: PolicyId, start: PathBuf) -> Result<PathBuf> {
    let mut current = start;
    loop {
        let meta = fs::symlink_metadata(&current)?;
        if !meta.file_type().is_symlink() {
            return Ok(current);
        }
        store.add_rule(
            pol,
            &current.to_string_lossy(),
            Permission::READ_EXEC,
            Origin::Link,
        )?;
        let target = fs::read_link(&current)?;
        current = if target.is_absolute() {
            target
        } else {
            current
                .parent()
                .unwrap_or_else(|| Path::new("/"))
                .join(target)
        };
    }
}

/// Classifies a file by content: ELF magic, shebang interpreter, or
/// unknown.
fn classify(path: &Path) -> Result<ProgramKind> {
    let mut file = fs::File::open(path)?;
    let mut head = [0u8; 256];
    let len = file.read(&mut head)?;
    let head = &head[..len];

    if head.starts_with(b"\x7fELF") {
        return Ok(ProgramKind::Elf);
    }
    if let Some(rest) = head.strip_prefix(b"#!") {
        let line = String::from_utf8_lossy(rest);
        let interpreter = line
            .lines()
            .next()
            .unwrap_or_default()
            .split_whitespace()
            .next()
            .unwrap_or_default();
        let base = interpreter.rsplit('/').next().unwrap_or_default();
        return Ok(match base {
            "bash" => ProgramKind::BourneScript,
            _ if base.ends_with("sh") => ProgramKind::PosixScript,
            _ => ProgramKind::Unknown,
        });
    }
    Ok(ProgramKind::Unknown)
}

/// Resolves and classifies `cmd`, storing the loader-chain evidence on
/// the way: every intermediate link as a `LINK` rule and, for ELF
/// targets, the executable itself as an `EXECUTABLE` rule.
///
/// Dynamic tracing runs this first so that the chain leading to the
/// program is covered even when the trace itself is short.
///
/// # Errors
///
/// Fails when the command is not on `PATH` or the filesystem walk fails.
pub fn classify_command(
    store: &mut RequirementStore,
    pol: PolicyId,
    cmd: &str,
) -> Result<(PathBuf, ProgramKind)> {
    let found = resolve_command(cmd)?;
    let target = follow_links(store, pol, found)?;
    let kind = classify(&target)?;
    debug!(path = %target.display(), kind = kind.describe(), "command classified");

    if kind == ProgramKind::Elf {
        store.add_rule(
            pol,
            &target.to_string_lossy(),
            Permission::READ_EXEC,
            Origin::Executable,
        )?;
    }

    Ok((target, kind))
}

/// Walks the loader chain of `cmd` and stores everything it finds: the
/// intermediate links, the executable itself, and (for ELF targets) its
/// dynamically loaded shared objects. Returns the resolved path and the
/// program type so the caller can suggest dynamic tracing for shell
/// wrappers.
///
/// # Errors
///
/// Fails when the command is not on `PATH` or the filesystem walk fails.
pub fn trace_static(
    store: &mut RequirementStore,
    pol: PolicyId,
    cmd: &str,
) -> Result<(PathBuf, ProgramKind)> {
    let (target, kind) = classify_command(store, pol, cmd)?;

    if kind == ProgramKind::Elf {
        let items: Vec<(String, Permission)> = shared_objects(&target)?
            .into_iter()
            .map(|lib| (lib, Permission::READ_EXEC))
            .collect();
        store.add_rules(pol, &items, Origin::SharedLib)?;
    }

    Ok((target, kind))
}

/// Lists the shared objects of an ELF program via `ldd`.
///
/// A non-zero `ldd` status (static binaries, non-ELF input) yields an
/// empty list rather than an error.
fn shared_objects(elf: &Path) -> Result<Vec<String>> {
    let output = Command::new("ldd").arg(elf).output()?;
    if !output.status.success() {
        debug!(status = %output.status, path = %elf.display(), "ldd listed no shared objects");
        return Ok(Vec::new());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut libs = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        // "libc.so.6 => /lib/x86_64-linux-gnu/libc.so.6 (0x...)" or the
        // loader line "/lib64/ld-linux-x86-64.so.2 (0x...)".
        if let Some((_, rest)) = line.split_once("=>") {
            if let Some(path) = rest.split_whitespace().next() {
                if path.starts_with('/') {
                    libs.push(path.to_string());
                }
            }
        } else if line.starts_with('/') {
            if let Some(path) = line.split_whitespace().next() {
                libs.push(path.to_string());
            }
        }
    }
    Ok(libs)
}

/// Runs `cmd_line` under `strace` for at most `duration_s` seconds and
/// ingests the observed filesystem accesses. Returns the number of
/// requirements collected.
///
/// # Errors
///
/// Fails when `strace` or `strace-log-merge` exits with an unexpected
/// status; termination by the timeout (status 124) is expected.
pub fn trace_syscalls(
    store: &mut RequirementStore,
    session: &Session,
    pol: PolicyId,
    cmd_line: &str,
    duration_s: f64,
) -> Result<usize> {
    // Force a clean slate in case an earlier run died mid-trace.
    clear_log_dir(session)?;
    fs::create_dir_all(session.log_dir())?;
    let log_prefix = session.log_dir().join(TRACE_LOG_PREFIX);

    let mut strace = Command::new("timeout");
    strace
        .arg("-s15")
        .arg(format!("{duration_s:.2}s"))
        .args(["strace", "-o"])
        .arg(&log_prefix)
        .args(["-ff", "-tt", "-e", TRACED_SYSCALLS])
        .args(cmd_line.split_whitespace());

    let output = strace.output()?;
    if !output.status.success() && output.status.code() != Some(TIMEOUT_EXIT) {
        debug!(stderr = %String::from_utf8_lossy(&output.stderr), "strace failed");
        return Err(Error::Tracer {
            tool: "strace",
            status: output.status,
        });
    }

    let merged = Command::new("strace-log-merge").arg(&log_prefix).output()?;
    if !merged.status.success() {
        debug!(stderr = %String::from_utf8_lossy(&merged.stderr), "log merge failed");
        return Err(Error::Tracer {
            tool: "strace-log-merge",
            status: merged.status,
        });
    }

    let log = String::from_utf8_lossy(&merged.stdout);
    let count = ingest_trace_log(store, pol, &log)?;
    clear_log_dir(session)?;
    Ok(count)
}

/// Obtains the same evidence as [`trace_syscalls`] from an external
/// eBPF-based tracer. Returns the number of requirements collected.
///
/// # Errors
///
/// Fails when the tracer exits with a non-zero status.
pub fn trace_ebpf(
    store: &mut RequirementStore,
    pol: PolicyId,
    cmd_line: &str,
) -> Result<usize> {
    let output = Command::new(EBPF_TRACER)
        .args(cmd_line.split_whitespace())
        .output()?;
    if !output.status.success() {
        return Err(Error::Tracer {
            tool: EBPF_TRACER,
            status: output.status,
        });
    }

    let log = String::from_utf8_lossy(&output.stdout);
    ingest_trace_log(store, pol, &log)
}

/// Parses a merged trace log and bulk-inserts the requirements with
/// origin `STRACE_FILE`; the store dedup pass runs after the ingest.
fn ingest_trace_log(store: &mut RequirementStore, pol: PolicyId, log: &str) -> Result<usize> {
    let mut items: Vec<(String, Permission)> = Vec::new();
    for line in log.lines() {
        if let Some(requirement) = parse::parse_trace_line(line) {
            items.push(requirement);
            if items.len() % 10 == 0 {
                info!(collected = items.len(), "collecting requirements");
            }
        }
    }
    info!(collected = items.len(), "requirements collected");

    store.add_rules(pol, &items, Origin::StraceFile)?;
    Ok(items.len())
}

fn clear_log_dir(session: &Session) -> Result<()> {
    match fs::remove_dir_all(session.log_dir()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn store_with_policy() -> (RequirementStore, PolicyId) {
        let mut store = RequirementStore::open_in_memory().unwrap();
        let pol = store.set_active_context("prog", "dev").unwrap();
        (store, pol)
    }

    #[test]
    fn resolve_finds_binaries_on_path() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("mytool");
        fs::write(&bin, b"#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let saved = std::env::var_os("PATH");
        std::env::set_var("PATH", dir.path());
        let resolved = resolve_command("mytool");
        if let Some(saved) = saved {
            std::env::set_var("PATH", saved);
        }
        assert_eq!(resolved.unwrap(), bin);
    }

    #[test]
    fn resolve_reports_missing_commands() {
        assert!(matches!(
            resolve_command("definitely-not-a-real-command-x9"),
            Err(Error::CommandNotFound { .. })
        ));
    }

    #[test]
    fn link_chain_records_intermediate_links() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real");
        fs::write(&target, b"\x7fELF rest-of-elf").unwrap();
        let inner = dir.path().join("inner");
        let outer = dir.path().join("outer");
        symlink(&target, &inner).unwrap();
        symlink(&inner, &outer).unwrap();

        let (mut store, pol) = store_with_policy();
        let resolved = follow_links(&mut store, pol, outer.clone()).unwrap();
        assert_eq!(resolved, target);

        let mut rules = store.rules(pol).unwrap();
        rules.sort_by(|a, b| a.req.cmp(&b.req));
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.origin == Origin::Link));
        assert!(rules.iter().all(|r| r.perm == Permission::READ_EXEC));
        assert_eq!(rules[0].req, inner.to_string_lossy());
        assert_eq!(rules[1].req, outer.to_string_lossy());
    }

    #[test]
    fn classify_by_content() {
        let dir = tempfile::tempdir().unwrap();

        let elf = dir.path().join("elf");
        fs::write(&elf, b"\x7fELF\x02\x01\x01").unwrap();
        assert_eq!(classify(&elf).unwrap(), ProgramKind::Elf);

        let posix = dir.path().join("posix");
        fs::write(&posix, b"#!/bin/sh\necho hi\n").unwrap();
        assert_eq!(classify(&posix).unwrap(), ProgramKind::PosixScript);

        let bourne = dir.path().join("bourne");
        fs::write(&bourne, b"#!/usr/bin/env bash\necho hi\n").unwrap();
        // `env`-style shebangs name the interpreter as the argument.
        assert_eq!(classify(&bourne).unwrap(), ProgramKind::Unknown);

        let bash = dir.path().join("bash");
        fs::write(&bash, b"#!/bin/bash\necho hi\n").unwrap();
        assert_eq!(classify(&bash).unwrap(), ProgramKind::BourneScript);

        let other = dir.path().join("other");
        fs::write(&other, b"just some text").unwrap();
        assert_eq!(classify(&other).unwrap(), ProgramKind::Unknown);
    }

    #[test]
    fn classify_command_records_the_executable() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("tool");
        fs::write(&target, b"\x7fELF\x02\x01\x01").unwrap();
        let link = dir.path().join("tool-link");
        symlink(&target, &link).unwrap();

        let (mut store, pol) = store_with_policy();
        let (resolved, kind) =
            classify_command(&mut store, pol, &link.to_string_lossy()).unwrap();
        assert_eq!(resolved, target);
        assert_eq!(kind, ProgramKind::Elf);

        let mut rules = store.rules(pol).unwrap();
        rules.sort_by(|a, b| a.req.cmp(&b.req));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].req, target.to_string_lossy());
        assert_eq!(rules[0].origin, Origin::Executable);
        assert_eq!(rules[1].req, link.to_string_lossy());
        assert_eq!(rules[1].origin, Origin::Link);
    }

    #[test]
    fn ingest_inserts_and_dedups() {
        let (mut store, pol) = store_with_policy();
        let log = concat!(
            "12:00:00.000001 execve(\"/usr/bin/tool\", [\"tool\"], 0x7ffd /* 10 vars */) = 0\n",
            "12:00:00.000002 openat(AT_FDCWD, \"/etc/config\", O_RDONLY) = 3\n",
            "12:00:00.000003 openat(AT_FDCWD, \"/etc/config\", O_RDWR) = 4\n",
            "12:00:00.000004 openat(AT_FDCWD, \"/gone\", O_RDONLY) = -1 ENOENT\n",
            "12:00:00.000005 close(3) = 0\n",
        );

        let count = ingest_trace_log(&mut store, pol, log).unwrap();
        assert_eq!(count, 3);

        let mut rules = store.rules(pol).unwrap();
        rules.sort_by(|a, b| a.req.cmp(&b.req));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].req, "/etc/config");
        assert_eq!(rules[0].perm, Permission::READ_WRITE);
        assert_eq!(rules[1].req, "/usr/bin/tool");
        assert_eq!(rules[1].perm, Permission::READ_EXEC);
        assert!(rules.iter().all(|r| r.origin == Origin::StraceFile));
    }
}
