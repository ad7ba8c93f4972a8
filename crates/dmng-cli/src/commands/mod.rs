//! Command handlers and shared helpers.

pub mod context;
pub mod inspect;
pub mod pipeline;
pub mod rules;
pub mod trace;

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use anyhow::Result;

/// Tokens never rewritten by command sanitisation.
const SHELL_OPERATORS: &[&str] = &[">", ">>", "<", "<<", "|"];

/// Sanitises a (possibly multi-token) command line: every token after the
/// program name that refers to an existing file is rewritten to its
/// lexically-clean absolute form, unless it is a shell operator.
pub fn sanitize_command(raw: &str) -> Result<String> {
    let mut tokens = raw.split_whitespace();
    let Some(program) = tokens.next() else {
        anyhow::bail!("empty command");
    };

    let mut out = vec![program.to_string()];
    for token in tokens {
        let rewritten = if !SHELL_OPERATORS.contains(&token) && Path::new(token).exists() {
            let absolute = if token.starts_with('/') {
                PathBuf::from(token)
            } else {
                std::env::current_dir()?.join(token)
            };
            clean_path(&absolute).to_string_lossy().into_owned()
        } else {
            token.to_string()
        };
        out.push(rewritten);
    }
    Ok(out.join(" "))
}

/// Lexically normalises an absolute path: drops `.` components and folds
/// `..` into its parent. No filesystem access.
fn clean_path(path: &Path) -> PathBuf {
    let mut parts: Vec<&OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {},
            Component::ParentDir => {
                parts.pop();
            },
            Component::Normal(part) => parts.push(part),
        }
    }
    let mut out = PathBuf::from("/");
    for part in parts {
        out.push(part);
    }
    out
}
