//! Trie pruning: folding concrete paths into coarse rules.
//!
//! Pruning runs up to two passes, in order, each constrained to a curated
//! allow-set of filesystem regions:
//!
//! 1. **Read/execute coarsening** over [`AllowSets::read`] regions. A
//!    program may need to reach anywhere below `/usr` or `/lib` to load
//!    dependencies and default settings, so collapsing read-only leaves
//!    into their parent loses little. Write permissions are never widened
//!    by this pass.
//! 2. **Read/write coarsening** over [`AllowSets::write`] regions, the
//!    last chance to reach the goal. For regions like `/dev` the primary
//!    sandboxing mechanism is expected to be DAC, so a coarse rule there
//!    does not meaningfully weaken the profile.
//!
//! Nodes outside both allow-sets (and their prefixes) are never touched:
//! their permission and position survive pruning verbatim.

use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::origin::Origin;
use crate::permission::{Mask, MaskCell, Permission};

use super::{Node, PathTrie};

/// Terminal nodes a read/execute collapse may subsume: no write bit.
const RX_TERMINAL: Mask = Mask::from_cells(MaskCell::Any, MaskCell::Clear, MaskCell::Any);

/// Read-only terminals considered by the read/write pass.
const RO_TERMINAL: Mask = Mask::from_cells(MaskCell::Set, MaskCell::Clear, MaskCell::Any);

/// Read-write terminals considered by the read/write pass.
const RW_TERMINAL: Mask = Mask::from_cells(MaskCell::Set, MaskCell::Set, MaskCell::Clear);

/// Filesystem regions whose subtrees the pruner may coarsen.
#[derive(Debug, Clone)]
pub struct AllowSets {
    read: HashSet<String>,
    write: HashSet<String>,
}

impl AllowSets {
    /// Builds the allow-sets for a command, augmenting the fixed system
    /// regions with the per-user and per-command entries.
    #[must_use]
    pub fn for_command(home: &Path, cmd: &str) -> Self {
        let home = home.to_string_lossy();

        let mut read: HashSet<String> = [
            "/bin", "/lib", "/lib32", "/lib64", "/libx32", "/sbin", "/opt", "/usr", "/etc/fonts",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        read.insert(format!("{home}/.local/share"));
        read.insert(format!("{home}/.cache/fontconfig"));

        let mut write: HashSet<String> = ["/dev", "/var", "/sys"]
            .into_iter()
            .map(String::from)
            .collect();
        write.insert(format!("{home}/.cache/{cmd}"));
        write.insert(format!("{home}/.config/{cmd}"));
        write.insert(format!("/tmp/{cmd}"));
        write.insert("/tmp/".to_string());

        Self { read, write }
    }
}

/// Result of a pruning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct PruneOutcome {
    /// Whether the permissioned-node count reached the goal.
    pub achieved: bool,
    /// The permissioned-node count after pruning.
    pub remaining: usize,
}

impl PathTrie {
    /// Prunes the tree until at most `goal` permissioned nodes remain, or
    /// both passes are exhausted.
    ///
    /// On a shortfall the tree keeps its pruned state: partial coarsening
    /// is still valuable, and the caller decides how loudly to warn.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidGoal`] for a goal of zero.
    pub fn prune(&mut self, goal: usize) -> Result<PruneOutcome> {
        if goal == 0 {
            return Err(Error::InvalidGoal { goal: 0 });
        }

        let initial = self.root.count_permissioned();
        if initial <= goal {
            debug!(count = initial, goal, "no need to prune");
            return Ok(PruneOutcome {
                achieved: true,
                remaining: initial,
            });
        }

        walk_coarse_read(&mut self.root, &self.allow.read);
        let remaining = self.root.count_permissioned();
        debug!(remaining, goal, "read-execute pass done");
        if remaining <= goal {
            return Ok(PruneOutcome {
                achieved: true,
                remaining,
            });
        }

        walk_coarse_write(&mut self.root, &self.allow.write);
        let remaining = self.root.count_permissioned();
        debug!(remaining, goal, "read-write pass done");
        Ok(PruneOutcome {
            achieved: remaining <= goal,
            remaining,
        })
    }
}

/// Descends towards read-coarsenable regions: a child whose path is an
/// allow entry roots a collapse; a child whose path is a prefix of some
/// entry is traversed deeper; anything else is left alone.
fn walk_coarse_read(node: &mut Node, allow: &HashSet<String>) {
    for child in node.children.values_mut() {
        if allow.contains(&child.path) {
            debug!(path = %child.path, "coarsening read-execute branch");
            collapse_rx(child);
        } else if allow.iter().any(|entry| entry.starts_with(&child.path)) {
            walk_coarse_read(child, allow);
        }
    }
}

fn walk_coarse_write(node: &mut Node, allow: &HashSet<String>) {
    for child in node.children.values_mut() {
        if allow.contains(&child.path) {
            debug!(path = %child.path, "coarsening read-write branch");
            collapse_rw(child);
        } else if allow.iter().any(|entry| entry.starts_with(&child.path)) {
            walk_coarse_write(child, allow);
        }
    }
}

/// Bottom-up read/execute collapse of one subtree.
///
/// At each inner node the terminal children without a write bit are
/// watermarked: the parent takes the union of their R and X bits, becomes
/// permissioned with origin `PRUNING_RX`, and the subsumed terminals are
/// removed. A collapse happens only when it pays off, i.e. with at least
/// two such terminals. Leaves are never pruned from their own position.
fn collapse_rx(node: &mut Node) {
    if node.children.is_empty() {
        return;
    }
    for child in node.children.values_mut() {
        if !child.children.is_empty() {
            collapse_rx(child);
        }
    }

    let mut subsumed = Vec::new();
    let (mut has_read, mut has_exec) = (false, false);
    for (name, child) in &node.children {
        if child.children.is_empty() && child.perm.matches(RX_TERMINAL) {
            subsumed.push(name.clone());
            has_read |= child.perm.read;
            has_exec |= child.perm.exec;
        }
    }
    if subsumed.len() <= 1 {
        return;
    }

    node.perm.read = has_read;
    node.perm.exec = has_exec;
    node.permissioned = true;
    node.origin = Some(Origin::PruningRx);
    for name in &subsumed {
        node.children.remove(name);
    }
    debug!(path = %node.path, pruned = subsumed.len() - 1, "collapsed read-execute terminals");
}

/// Bottom-up read/write collapse of one subtree.
///
/// Terminal children are split into a read-only class (`r`, no `w`) and a
/// read-write class (`rw`, no `x`). With two or more such terminals the
/// parent takes `(R = union of read-only R bits, W = set, X = union of
/// read-only X bits)` and every terminal in both classes is removed. A
/// lone read-only terminal is absorbed into the parent as-is; any other
/// single-terminal configuration leaves the node unchanged.
fn collapse_rw(node: &mut Node) {
    if node.children.is_empty() {
        return;
    }
    for child in node.children.values_mut() {
        if !child.children.is_empty() {
            collapse_rw(child);
        }
    }

    let mut read_only = Vec::new();
    let mut read_write = Vec::new();
    let (mut has_read, mut has_exec) = (false, false);
    for (name, child) in &node.children {
        if !child.children.is_empty() {
            continue;
        }
        if child.perm.matches(RO_TERMINAL) {
            read_only.push(name.clone());
            has_read |= child.perm.read;
            has_exec |= child.perm.exec;
        } else if child.perm.matches(RW_TERMINAL) {
            read_write.push(name.clone());
        }
    }

    if read_only.len() + read_write.len() <= 1 {
        if read_write.is_empty() && read_only.len() == 1 {
            if let Some(child) = node.children.remove(&read_only[0]) {
                node.perm = child.perm;
                node.permissioned = true;
                node.origin = Some(Origin::PruningRw);
                debug!(path = %node.path, "absorbed lone read-only terminal");
            }
        }
        return;
    }

    node.perm = Permission {
        read: has_read,
        write: true,
        exec: has_exec,
    };
    node.permissioned = true;
    node.origin = Some(Origin::PruningRw);
    let pruned = read_only.len() + read_write.len() - 1;
    for name in read_only.iter().chain(&read_write) {
        node.children.remove(name);
    }
    debug!(path = %node.path, pruned, "collapsed read-write terminals");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Rule;

    fn perm(literal: &str) -> Permission {
        Permission::parse(literal).unwrap()
    }

    fn test_trie() -> PathTrie {
        PathTrie::new(AllowSets::for_command(Path::new("/home/u"), "prog"))
    }

    fn sorted(rows: Vec<Rule>) -> Vec<(String, Permission, Origin)> {
        let mut out: Vec<_> = rows
            .into_iter()
            .map(|r| (r.req, r.perm, r.origin))
            .collect();
        out.sort();
        out
    }

    /// Every pre-prune path must still be covered by an ancestor-or-self
    /// row whose permission includes the original bits in the coarsened
    /// directions.
    fn assert_covered(before: &[(String, Permission)], after: &[Rule]) {
        for (path, _) in before {
            assert!(
                after
                    .iter()
                    .any(|row| path == &row.req || path.starts_with(&format!("{}/", row.req))),
                "no output row covers `{path}`"
            );
        }
    }

    #[test]
    fn rx_pruning_collapses_library_leaves() {
        let mut trie = test_trie();
        for path in ["/lib/a", "/lib/b", "/lib/c"] {
            trie.insert(path, perm("r-x"), Origin::SharedLib);
        }

        let outcome = trie.prune(1).unwrap();
        assert!(outcome.achieved);
        assert_eq!(outcome.remaining, 1);

        let rows = trie.collect_profile();
        assert_eq!(
            sorted(rows.clone()),
            vec![("/lib".to_string(), perm("r-x"), Origin::PruningRx)]
        );
        assert_covered(
            &[
                ("/lib/a".to_string(), perm("r-x")),
                ("/lib/b".to_string(), perm("r-x")),
                ("/lib/c".to_string(), perm("r-x")),
            ],
            &rows,
        );
    }

    #[test]
    fn rx_pruning_watermarks_mixed_terminals() {
        let mut trie = test_trie();
        trie.insert("/usr/share/doc", perm("r--"), Origin::StraceFile);
        trie.insert("/usr/share/man", perm("--x"), Origin::StraceFile);
        trie.insert("/usr/share/misc", perm("r-x"), Origin::StraceFile);

        let outcome = trie.prune(1).unwrap();
        assert!(outcome.achieved);
        // The watermark is the union of the R and X bits of the subsumed
        // terminals.
        assert_eq!(
            sorted(trie.collect_profile()),
            vec![("/usr/share".to_string(), perm("r-x"), Origin::PruningRx)]
        );
    }

    #[test]
    fn pruning_never_touches_paths_outside_the_allow_sets() {
        let mut trie = test_trie();
        trie.insert("/opt/x", perm("r-x"), Origin::StraceFile);
        trie.insert("/opt/y", perm("r-x"), Origin::StraceFile);
        trie.insert("/home/u/data", perm("r--"), Origin::UserInputFile);

        let before = trie.count_permissioned();
        let outcome = trie.prune(1).unwrap();
        assert!(!outcome.achieved);
        assert_eq!(outcome.remaining, 2);
        assert!(outcome.remaining <= before);

        // `/opt` collapsed, the home file survived untouched.
        assert_eq!(
            sorted(trie.collect_profile()),
            vec![
                ("/home/u/data".to_string(), perm("r--"), Origin::UserInputFile),
                ("/opt".to_string(), perm("r-x"), Origin::PruningRx),
            ]
        );
    }

    #[test]
    fn rw_pruning_with_mixed_children() {
        let mut trie = test_trie();
        trie.insert("/dev/null", perm("rw-"), Origin::StraceFile);
        trie.insert("/dev/zero", perm("rw-"), Origin::StraceFile);
        trie.insert("/dev/random", perm("r--"), Origin::StraceFile);

        let outcome = trie.prune(1).unwrap();
        assert!(outcome.achieved);
        assert_eq!(
            sorted(trie.collect_profile()),
            vec![("/dev".to_string(), perm("rw-"), Origin::PruningRw)]
        );
    }

    #[test]
    fn rw_pruning_write_only_watermark() {
        // With no read-only terminals the watermark contributes nothing:
        // the collapsed parent carries the write bit alone.
        let mut trie = test_trie();
        trie.insert("/dev/null", perm("rw-"), Origin::StraceFile);
        trie.insert("/dev/zero", perm("rw-"), Origin::StraceFile);
        trie.insert("/etc/hosts", perm("r--"), Origin::UserInputFile);

        let outcome = trie.prune(2).unwrap();
        assert!(outcome.achieved);
        assert_eq!(
            sorted(trie.collect_profile()),
            vec![
                ("/dev".to_string(), perm("-w-"), Origin::PruningRw),
                ("/etc/hosts".to_string(), perm("r--"), Origin::UserInputFile),
            ]
        );
    }

    #[test]
    fn rw_pruning_absorbs_a_lone_read_only_terminal() {
        let mut trie = test_trie();
        trie.insert("/dev/urandom", perm("r--"), Origin::StraceFile);
        trie.insert("/etc/hosts", perm("r--"), Origin::UserInputFile);

        let outcome = trie.prune(1).unwrap();
        // `/dev/urandom` is absorbed into `/dev`; the `/etc` entry cannot
        // be coarsened, so the goal stays out of reach.
        assert!(!outcome.achieved);
        assert_eq!(outcome.remaining, 2);
        assert_eq!(
            sorted(trie.collect_profile()),
            vec![
                ("/dev".to_string(), perm("r--"), Origin::PruningRw),
                ("/etc/hosts".to_string(), perm("r--"), Origin::UserInputFile),
            ]
        );
    }

    #[test]
    fn rw_pruning_leaves_a_lone_read_write_terminal_alone() {
        let mut trie = test_trie();
        trie.insert("/dev/null", perm("rw-"), Origin::StraceFile);
        trie.insert("/etc/hosts", perm("r--"), Origin::UserInputFile);

        let outcome = trie.prune(1).unwrap();
        assert!(!outcome.achieved);
        assert_eq!(
            sorted(trie.collect_profile()),
            vec![
                ("/dev/null".to_string(), perm("rw-"), Origin::StraceFile),
                ("/etc/hosts".to_string(), perm("r--"), Origin::UserInputFile),
            ]
        );
    }

    #[test]
    fn per_command_write_regions_are_coarsenable() {
        let mut trie = test_trie();
        trie.insert("/home/u/.cache/prog/a", perm("rw-"), Origin::StraceFile);
        trie.insert("/home/u/.cache/prog/b", perm("rw-"), Origin::StraceFile);
        trie.insert("/home/u/.cache/other/c", perm("rw-"), Origin::StraceFile);

        let outcome = trie.prune(2).unwrap();
        assert!(outcome.achieved);
        assert_eq!(
            sorted(trie.collect_profile()),
            vec![
                (
                    "/home/u/.cache/other/c".to_string(),
                    perm("rw-"),
                    Origin::StraceFile
                ),
                ("/home/u/.cache/prog".to_string(), perm("-w-"), Origin::PruningRw),
            ]
        );
    }

    #[test]
    fn rx_pass_short_circuits_rw_pass() {
        let mut trie = test_trie();
        trie.insert("/lib/a", perm("r-x"), Origin::SharedLib);
        trie.insert("/lib/b", perm("r-x"), Origin::SharedLib);
        trie.insert("/dev/null", perm("rw-"), Origin::StraceFile);
        trie.insert("/dev/zero", perm("rw-"), Origin::StraceFile);

        // Goal 3 is reachable by the read-execute pass alone, so the
        // `/dev` leaves must survive as-is.
        let outcome = trie.prune(3).unwrap();
        assert!(outcome.achieved);
        assert_eq!(
            sorted(trie.collect_profile()),
            vec![
                ("/dev/null".to_string(), perm("rw-"), Origin::StraceFile),
                ("/dev/zero".to_string(), perm("rw-"), Origin::StraceFile),
                ("/lib".to_string(), perm("r-x"), Origin::PruningRx),
            ]
        );
    }

    #[test]
    fn prune_is_a_no_op_when_already_under_goal() {
        let mut trie = test_trie();
        trie.insert("/lib/a", perm("r-x"), Origin::SharedLib);
        trie.insert("/lib/b", perm("r-x"), Origin::SharedLib);

        let outcome = trie.prune(10).unwrap();
        assert!(outcome.achieved);
        assert_eq!(outcome.remaining, 2);
        assert_eq!(trie.count_permissioned(), 2);
    }

    #[test]
    fn zero_goal_is_rejected() {
        let mut trie = test_trie();
        trie.insert("/lib/a", perm("r-x"), Origin::SharedLib);
        assert!(matches!(
            trie.prune(0),
            Err(Error::InvalidGoal { goal: 0 })
        ));
    }

    #[test]
    fn prune_never_expands_the_count() {
        let mut trie = test_trie();
        for path in [
            "/lib/a", "/lib/b", "/usr/bin/x", "/usr/bin/y", "/opt/tool/bin/z",
        ] {
            trie.insert(path, perm("r-x"), Origin::StraceFile);
        }
        trie.insert("/dev/null", perm("rw-"), Origin::StraceFile);
        trie.insert("/var/log/app", perm("rw-"), Origin::StraceFile);
        trie.insert("/home/u/keep", perm("rw-"), Origin::UserInputFile);

        let before: Vec<_> = trie
            .collect_profile()
            .into_iter()
            .map(|r| (r.req, r.perm))
            .collect();
        let outcome = trie.prune(1).unwrap();
        assert!(outcome.remaining <= before.len());
        let rows = trie.collect_profile();
        assert_eq!(rows.len(), outcome.remaining);
        assert_covered(&before, &rows);
        // The node outside every allow region is preserved verbatim.
        assert!(rows
            .iter()
            .any(|r| r.req == "/home/u/keep" && r.perm == perm("rw-")));
    }
}
