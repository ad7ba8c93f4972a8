//! # dmng-core
//!
//! Policy engine for generating least-privilege filesystem access profiles
//! for Linux programs.
//!
//! For a given command (plus an optional user-defined *context*
//! discriminating e.g. "prod" vs "dev" use), this crate collects every
//! filesystem path the program needs to read, write, or execute, distills
//! that evidence into a compact permissioned profile, and emits a portable
//! JSON policy consumable by an external sandbox enforcer (Landlock, an
//! AppArmor wrapper, and the like).
//!
//! ## Components
//!
//! - [`permission`]: 3-bit R/W/X value with textual/numeric codecs and mask
//!   matching
//! - [`store`]: persistent mapping from `(policy, path)` to the evidence
//!   collected for it, plus an independent deny list
//! - [`trie`]: in-memory prefix tree of paths with a pruner that folds
//!   thousands of concrete paths into a handful of coarse rules
//! - [`builder`]: the store → trie → pruner → store pipeline
//! - [`serialize`]: the on-disk JSON policy document
//! - [`trace`]: static and dynamic tracing backends feeding the store
//!
//! ## Example
//!
//! ```rust,no_run
//! use dmng_core::{builder, Permission, RequirementStore, Session};
//! use dmng_core::origin::Origin;
//!
//! # fn main() -> dmng_core::Result<()> {
//! let session = Session::new()?;
//! let mut store = RequirementStore::open(&session)?;
//! let pol = store.set_active_context("vim", "dev")?;
//! store.add_rule(pol, "/usr/bin/vim", Permission::parse("r-x")?, Origin::UserInputFile)?;
//! let ident = store.policies()?.remove(0);
//! let profile = builder::build_profile(&mut store, &session, &ident, 0)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod builder;
pub mod error;
pub mod origin;
pub mod permission;
pub mod serialize;
pub mod session;
pub mod store;
pub mod trace;
pub mod trie;

pub use error::{Error, Result};
pub use permission::{Mask, Permission};
pub use session::Session;
pub use store::{PolicyId, PolicyIdent, ProfileEntry, RequirementStore, Rule};
pub use trie::PathTrie;
