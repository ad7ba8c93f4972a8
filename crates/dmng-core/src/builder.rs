//! The store → trie → pruner → store profile pipeline.

use tracing::{debug, warn};

use crate::error::Result;
use crate::session::Session;
use crate::store::{PolicyIdent, ProfileEntry, RequirementStore, Rule};
use crate::trie::PathTrie;

/// Pruning goal applied when the operator does not supply one.
pub const DEFAULT_GOAL: usize = 50;

/// The in-memory result of a profile build.
#[derive(Debug, Clone)]
pub struct BuiltProfile {
    /// The profile rows, as written back to the store.
    pub entries: Vec<Rule>,
    /// Whether the pruner reached the goal. A shortfall is not an error:
    /// the pruned profile is still written and returned.
    pub achieved: bool,
}

/// Builds the profile of one policy and replaces its stored rows.
///
/// A `goal` of zero selects [`DEFAULT_GOAL`].
///
/// # Errors
///
/// Fails on store I/O errors. A pruning shortfall is reported through
/// [`BuiltProfile::achieved`] (and a warning), not as an error.
pub fn build_profile(
    store: &mut RequirementStore,
    session: &Session,
    ident: &PolicyIdent,
    goal: usize,
) -> Result<BuiltProfile> {
    let goal = if goal == 0 { DEFAULT_GOAL } else { goal };

    let rules = store.rules(ident.pol)?;
    let mut trie = PathTrie::build(&ident.cmd, session.home(), &rules);
    debug!(
        pol = %ident.pol,
        cmd = %ident.cmd,
        nodes = trie.count_permissioned(),
        "trie built"
    );
    if session.debug() {
        debug!("trie before pruning:\n{}", trie.render());
    }

    let outcome = trie.prune(goal)?;
    if session.debug() {
        debug!("trie after pruning:\n{}", trie.render());
    }
    if outcome.achieved {
        debug!(pol = %ident.pol, remaining = outcome.remaining, "trie pruned");
    } else {
        warn!(
            pol = %ident.pol,
            cmd = %ident.cmd,
            remaining = outcome.remaining,
            goal,
            "pruning goal not achieved"
        );
    }

    let entries = trie.collect_profile();
    let profile_rows: Vec<ProfileEntry> = entries
        .iter()
        .map(|rule| ProfileEntry {
            req: rule.req.clone(),
            perm: rule.perm,
        })
        .collect();
    store.replace_profile(ident.pol, &profile_rows)?;

    Ok(BuiltProfile {
        entries,
        achieved: outcome.achieved,
    })
}
