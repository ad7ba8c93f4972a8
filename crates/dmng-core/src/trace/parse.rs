//! Syscall trace log parsing.
//!
//! One line of tracer output maps to at most one `(path, permission)`
//! pair. Lines reporting a failed syscall (`= -1`) are skipped, as are
//! syscalls whose flags imply no recognisable filesystem access.

use crate::permission::Permission;

/// Flags of `open`/`openat` implying read-write access.
const WRITE_FLAGS: &[&str] = &["O_WRONLY", "O_RDWR", "O_APPEND", "O_CREAT"];

/// Flags of `open`/`openat` implying read-only access.
const READ_FLAGS: &[&str] = &["O_RDONLY", "O_EXCL"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Syscall {
    Execve,
    Open,
    Creat,
    Link,
    Mkdir,
}

fn detect(line: &str) -> Option<Syscall> {
    if line.contains("execve(") {
        Some(Syscall::Execve)
    } else if line.contains("open(") || line.contains("openat(") {
        Some(Syscall::Open)
    } else if line.contains("creat(") {
        Some(Syscall::Creat)
    } else if line.contains("link(") {
        Some(Syscall::Link)
    } else if line.contains("mkdir(") || line.contains("mkdirat(") {
        Some(Syscall::Mkdir)
    } else {
        None
    }
}

/// Extracts the argument list of a logged syscall, stripping a leading
/// shebang from the first argument.
fn arguments(line: &str) -> Option<Vec<&str>> {
    let open = line.find('(')?;
    let close = line.find(')')?;
    let inner = line.get(open + 1..close)?;

    let mut args: Vec<&str> = inner.split(", ").collect();
    if let Some(first) = args.first_mut() {
        if let Some(stripped) = first.strip_prefix("#!") {
            *first = stripped;
        }
    }
    Some(args)
}

/// Removes the surrounding double quotes of a logged path argument.
fn unquote(quoted: &str) -> String {
    if quoted.len() > 2 {
        quoted
            .get(1..quoted.len() - 1)
            .map(str::to_string)
            .unwrap_or_default()
    } else {
        String::new()
    }
}

/// Derives the permission implied by an `open`/`openat` flag argument,
/// or `None` when no flag is recognised.
fn open_flags_permission(flag_arg: &str) -> Option<Permission> {
    let flags: Vec<&str> = flag_arg.split('|').collect();
    if flags.iter().any(|f| WRITE_FLAGS.contains(f)) {
        return Some(Permission::READ_WRITE);
    }
    if flags.iter().any(|f| READ_FLAGS.contains(f)) {
        return Some(Permission::READ_ONLY);
    }
    None
}

/// Parses one tracer log line into a requirement, or `None` when the line
/// carries none.
///
/// Recognised syscalls and the evidence they yield:
///
/// - `execve`: argument 0, read + execute
/// - `open`, `openat`: argument 1, permission derived from the flags
/// - `creat`: argument 1, read + write
/// - `mkdir`, `mkdirat`: argument 0, read + write
/// - `link`: recognised but not converted to a requirement
///
// TODO: the link family is heterogeneous (link, linkat, symlink); map
// each variant to its own path arguments before converting them.
pub(crate) fn parse_trace_line(line: &str) -> Option<(String, Permission)> {
    if line.contains("= -1") {
        return None;
    }
    let syscall = detect(line)?;
    let args = arguments(line)?;

    match syscall {
        Syscall::Execve => Some((unquote(args.first()?), Permission::READ_EXEC)),
        Syscall::Open => {
            let req = unquote(args.get(1)?);
            let perm = open_flags_permission(args.get(2)?)?;
            Some((req, perm))
        },
        Syscall::Creat => Some((unquote(args.get(1)?), Permission::READ_WRITE)),
        Syscall::Mkdir => Some((unquote(args.first()?), Permission::READ_WRITE)),
        Syscall::Link => None,
    }
}
