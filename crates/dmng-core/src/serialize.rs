//! The on-disk JSON policy document.
//!
//! One document collects every policy in the store, grouping each profile's
//! paths by the R/W/X bits and listing the denials. The serializer also
//! appends the policy-output directory itself to every policy's deny list:
//! the sandboxed program must not be able to edit its own policy.
//!
//! `max_depth` is an auxiliary hint for enforcers that need to know how
//! deep denial paths nest. It is the maximum over all denial paths of the
//! number of segments after the leading `/`, accumulated across every
//! policy serialized into the document (zero when no policy carries a
//! denial). [`fix_depth`] repairs the field on an existing document.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::store::{PolicyIdent, Rule};

/// The rules of one policy, grouped by permission bit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPolicy {
    /// `<command>_<context>`.
    pub policy_name: String,
    /// Paths the program may read.
    pub read: Vec<String>,
    /// Paths the program may write.
    pub write: Vec<String>,
    /// Paths the program may execute.
    pub exec: Vec<String>,
    /// Paths the program must not touch, regardless of matching rules.
    pub deny: Vec<String>,
}

/// The document written to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    /// One entry per policy in the store.
    pub policies: Vec<CommandPolicy>,
    /// Maximum denial depth across all policies.
    pub max_depth: i64,
}

/// Accumulates policies and writes the document.
#[derive(Debug)]
pub struct Serializer {
    profiles_dir: PathBuf,
    document: PolicyDocument,
}

impl Serializer {
    /// Creates a serializer targeting the given policy-output directory.
    #[must_use]
    pub fn new(profiles_dir: impl Into<PathBuf>) -> Self {
        Self {
            profiles_dir: profiles_dir.into(),
            document: PolicyDocument::default(),
        }
    }

    /// Adds one policy to the document under construction.
    pub fn add_policy(&mut self, ident: &PolicyIdent, entries: &[Rule], denials: &[String]) {
        let mut policy = CommandPolicy {
            policy_name: format!("{}_{}", ident.cmd, ident.ctx),
            read: Vec::new(),
            write: Vec::new(),
            exec: Vec::new(),
            deny: Vec::new(),
        };

        for entry in entries {
            if entry.perm.read {
                policy.read.push(entry.req.clone());
            }
            if entry.perm.write {
                policy.write.push(entry.req.clone());
            }
            if entry.perm.exec {
                policy.exec.push(entry.req.clone());
            }
        }

        policy.deny.extend(denials.iter().cloned());
        policy
            .deny
            .push(self.profiles_dir.to_string_lossy().into_owned());

        let depth = max_denial_depth(&policy.deny);
        if depth > self.document.max_depth {
            self.document.max_depth = depth;
        }

        self.document.policies.push(policy);
    }

    /// The document accumulated so far.
    #[must_use]
    pub const fn document(&self) -> &PolicyDocument {
        &self.document
    }

    /// Writes the document to `<profiles_dir>/<fname>`, creating the
    /// directory (mode 0750) and truncating any prior file.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be prepared or the file cannot be
    /// written.
    pub fn write(&self, fname: &str) -> Result<PathBuf> {
        prepare_profiles_dir(&self.profiles_dir, fname)?;
        write_document(&self.profiles_dir, fname, &self.document)
    }
}

/// Re-reads an existing policy document, recomputes `max_depth` purely
/// from the `deny` arrays, and rewrites the file.
///
/// # Errors
///
/// Fails when the document cannot be read, parsed, or rewritten.
pub fn fix_depth(profiles_dir: &Path, fname: &str) -> Result<PathBuf> {
    let data = fs::read_to_string(profiles_dir.join(fname))?;
    let mut document: PolicyDocument = serde_json::from_str(&data)?;

    let mut max_depth = 0;
    for policy in &document.policies {
        for denial in &policy.deny {
            max_depth = max_depth.max(denial_depth(denial));
        }
    }
    document.max_depth = max_depth;

    write_document(profiles_dir, fname, &document)
}

/// Number of path segments after the leading `/`.
fn denial_depth(path: &str) -> i64 {
    path.split('/').skip(1).count() as i64
}

/// Maximum denial depth of one policy, or -1 when it has no denials.
fn max_denial_depth(denials: &[String]) -> i64 {
    if denials.is_empty() {
        return -1;
    }
    denials
        .iter()
        .map(|denial| denial_depth(denial))
        .max()
        .unwrap_or(0)
}

/// Creates the profiles directory (0750) if absent; otherwise removes the
/// prior document. The mode is re-applied either way.
fn prepare_profiles_dir(dir: &Path, fname: &str) -> Result<()> {
    if dir.exists() {
        match fs::remove_file(dir.join(fname)) {
            Ok(()) => {},
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
            Err(err) => return Err(err.into()),
        }
    } else {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new().recursive(true).mode(0o750).create(dir)?;
        }
        #[cfg(not(unix))]
        fs::create_dir_all(dir)?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o750))?;
    }
    Ok(())
}

/// Serializes a document with 3-space indentation.
fn write_document(dir: &Path, fname: &str, document: &PolicyDocument) -> Result<PathBuf> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"   ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    document.serialize(&mut serializer)?;

    let target = dir.join(fname);
    fs::write(&target, buf)?;
    debug!(path = %target.display(), "policy document written");
    Ok(target)
}
