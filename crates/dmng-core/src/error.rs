//! Error types for the policy engine.
//!
//! Every fallible operation in the crate returns [`Result`]. There is no
//! local recovery: errors carry enough context (component, operation,
//! relevant identifiers) for the operator to remediate manually. The only
//! non-fatal condition in the engine, a pruning shortfall, is modelled as a
//! value ([`crate::trie::PruneOutcome`]) rather than an error.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the policy engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Permission literal outside `{r,-}{w,-}{x,-}`.
    #[error("invalid permission `{input}` (expected 3 characters from `{{r,-}}{{w,-}}{{x,-}}`)")]
    InvalidPermission {
        /// The rejected input.
        input: String,
    },

    /// Permission mask outside `{r,-,_}{w,-,_}{x,-,_}`.
    #[error("invalid permission mask `{input}` (expected 3 characters from `{{r,-,_}}{{w,-,_}}{{x,-,_}}`)")]
    InvalidMask {
        /// The rejected input.
        input: String,
    },

    /// The requested operation needs a permission and none was supplied.
    #[error("a permission is required for this operation")]
    MissingPermission,

    /// A permission was supplied alongside a denial, which takes none.
    #[error("a permission is not needed with a denial")]
    PermissionWithDenial,

    /// Pruning goal is zero or negative.
    #[error("invalid pruning goal {goal} (must be a positive number of profile entries)")]
    InvalidGoal {
        /// The rejected goal.
        goal: i64,
    },

    /// A user-supplied requirement path does not exist on the filesystem.
    #[error("requirement `{path}` does not name an existing file or directory")]
    RequirementNotFound {
        /// The rejected path.
        path: PathBuf,
    },

    /// No active context has been set for the command.
    #[error("no active context for command `{cmd}`, set one with --setcontext")]
    NoActiveContext {
        /// The command the lookup was for.
        cmd: String,
    },

    /// No policy row exists for the `(command, context)` pair.
    #[error("no policy recorded for command `{cmd}` under context `{ctx}`")]
    PolicyNotFound {
        /// The command the lookup was for.
        cmd: String,
        /// The context the lookup was for.
        ctx: String,
    },

    /// The command could not be resolved on `PATH`.
    #[error("command `{cmd}` not found on PATH")]
    CommandNotFound {
        /// The unresolved command name.
        cmd: String,
    },

    /// An external tracer exited with an unexpected status.
    #[error("tracer `{tool}` exited with {status}")]
    Tracer {
        /// The external tool that failed.
        tool: &'static str,
        /// Its exit status.
        status: ExitStatus,
    },

    /// The current user's home directory could not be located.
    #[error("unable to locate the current user's home directory")]
    HomeNotFound,

    /// Requirement store I/O failed.
    #[error("requirement store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Filesystem I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Policy document (de)serialization failed.
    #[error("policy document error: {0}")]
    Json(#[from] serde_json::Error),
}
