//! In-memory prefix tree of permissioned filesystem paths.
//!
//! The trie is rebuilt from store state on every profile build, so
//! insertion is last-write-wins at the leaf (the store already enforces
//! monotonic permission broadening before the trie ever sees a rule).
//!
//! Paths under an ignored prefix (`/proc`) never enter the tree: those
//! regions are not something a profile should try to restrict.

mod prune;

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

pub use prune::{AllowSets, PruneOutcome};

use crate::origin::Origin;
use crate::permission::Permission;
use crate::store::Rule;

/// Path prefixes excluded from profiles at insertion time.
const IGNORED_PATHS: &[&str] = &["/proc"];

/// One node of the trie: a path segment and its children.
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) path: String,
    pub(crate) perm: Permission,
    pub(crate) origin: Option<Origin>,
    pub(crate) permissioned: bool,
    pub(crate) children: HashMap<String, Node>,
}

impl Node {
    fn new(path: String) -> Self {
        Self {
            path,
            perm: Permission::default(),
            origin: None,
            permissioned: false,
            children: HashMap::new(),
        }
    }

    pub(crate) fn count_permissioned(&self) -> usize {
        let own = usize::from(self.permissioned);
        own + self
            .children
            .values()
            .map(Node::count_permissioned)
            .sum::<usize>()
    }

    fn collect_into(&self, out: &mut Vec<Rule>) {
        if self.permissioned {
            out.push(Rule {
                req: self.path.clone(),
                perm: self.perm,
                origin: self.origin.unwrap_or(Origin::Exception),
            });
        }
        for child in self.children.values() {
            child.collect_into(out);
        }
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        if depth != 0 {
            let _ = write!(out, "{depth}|__");
        }
        let shown = if self.path.is_empty() { "/" } else { &self.path };
        out.push_str(shown);
        if self.permissioned {
            let _ = write!(out, " [{}]", self.perm);
            if let Some(origin) = self.origin {
                let _ = write!(out, " [{origin}]");
            }
        }
        out.push('\n');
        let mut names: Vec<&String> = self.children.keys().collect();
        names.sort();
        for name in names {
            self.children[name].render_into(out, depth + 1);
        }
    }
}

/// Prefix tree of the paths a command requires, ready for pruning.
#[derive(Debug)]
pub struct PathTrie {
    root: Node,
    allow: AllowSets,
}

impl PathTrie {
    /// Creates an empty trie with the given coarsening allow-sets.
    #[must_use]
    pub fn new(allow: AllowSets) -> Self {
        Self {
            root: Node::new(String::new()),
            allow,
        }
    }

    /// Builds the trie of a command from its stored rules.
    #[must_use]
    pub fn build(cmd: &str, home: &Path, rules: &[Rule]) -> Self {
        let mut trie = Self::new(AllowSets::for_command(home, cmd));
        for rule in rules {
            trie.insert(&rule.req, rule.perm, rule.origin);
        }
        trie
    }

    /// Inserts a requirement.
    ///
    /// The final path segment's node receives the permission, origin, and
    /// the permissioned flag; intermediate nodes stay unpermissioned
    /// unless a separate insertion lands on them exactly. Re-inserting an
    /// existing leaf path overwrites its permission and origin.
    pub fn insert(&mut self, req: &str, perm: Permission, origin: Origin) {
        if IGNORED_PATHS.iter().any(|p| req.starts_with(p)) {
            return;
        }

        let mut names: Vec<&str> = req.split('/').collect();
        if names.len() > 1 && names[0].is_empty() {
            names.remove(0);
        }

        let last = names.len().saturating_sub(1);
        let mut node = &mut self.root;
        for (idx, name) in names.into_iter().enumerate() {
            let child_path = format!("{}/{name}", node.path);
            node = node
                .children
                .entry(name.to_string())
                .or_insert_with(|| Node::new(child_path));
            if idx == last {
                node.perm = perm;
                node.origin = Some(origin);
                node.permissioned = true;
            }
        }
    }

    /// Number of permissioned nodes currently in the tree.
    #[must_use]
    pub fn count_permissioned(&self) -> usize {
        self.root.count_permissioned()
    }

    /// Returns every permissioned node as a profile row, depth first.
    ///
    /// Sibling order is unspecified; callers that need determinism sort
    /// the result.
    #[must_use]
    pub fn collect_profile(&self) -> Vec<Rule> {
        let mut out = Vec::new();
        self.root.collect_into(&mut out);
        out
    }

    /// Deterministic textual rendering of the whole tree, for debugging.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.root.render_into(&mut out, 0);
        out
    }

    /// Deterministic textual rendering of the permissioned nodes only.
    #[must_use]
    pub fn render_profile(&self) -> String {
        let mut rows = self.collect_profile();
        rows.sort_by(|a, b| a.req.cmp(&b.req));
        let mut out = String::new();
        for row in rows {
            let _ = writeln!(out, "    {} [{}] [{}]", row.req, row.perm, row.origin);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perm(literal: &str) -> Permission {
        Permission::parse(literal).unwrap()
    }

    fn test_trie() -> PathTrie {
        PathTrie::new(AllowSets::for_command(Path::new("/home/u"), "prog"))
    }

    fn sorted_paths(trie: &PathTrie) -> Vec<(String, Permission)> {
        let mut rows: Vec<_> = trie
            .collect_profile()
            .into_iter()
            .map(|r| (r.req, r.perm))
            .collect();
        rows.sort();
        rows
    }

    #[test]
    fn collect_returns_exactly_what_was_inserted() {
        let mut trie = test_trie();
        trie.insert("/etc/hosts", perm("r--"), Origin::UserInputFile);
        trie.insert("/usr/bin/prog", perm("r-x"), Origin::Executable);
        trie.insert("/home/u/out.log", perm("rw-"), Origin::StraceFile);

        assert_eq!(trie.count_permissioned(), 3);
        assert_eq!(
            sorted_paths(&trie),
            vec![
                ("/etc/hosts".to_string(), perm("r--")),
                ("/home/u/out.log".to_string(), perm("rw-")),
                ("/usr/bin/prog".to_string(), perm("r-x")),
            ]
        );
    }

    #[test]
    fn proc_paths_are_ignored() {
        let mut trie = test_trie();
        trie.insert("/proc/self/status", perm("r--"), Origin::StraceFile);
        assert_eq!(trie.count_permissioned(), 0);
        assert!(trie.collect_profile().is_empty());
    }

    #[test]
    fn reinserting_a_leaf_overwrites_in_place() {
        let mut trie = test_trie();
        trie.insert("/etc/hosts", perm("r--"), Origin::UserInputFile);
        trie.insert("/etc/hosts", perm("rw-"), Origin::StraceFile);

        let rows = trie.collect_profile();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].perm, perm("rw-"));
        assert_eq!(rows[0].origin, Origin::StraceFile);
    }

    #[test]
    fn intermediate_nodes_are_not_permissioned() {
        let mut trie = test_trie();
        trie.insert("/a/b/c", perm("r--"), Origin::UserInputFile);
        assert_eq!(trie.count_permissioned(), 1);

        // A later insertion landing on an intermediate node exactly makes
        // it permissioned without disturbing the leaf.
        trie.insert("/a/b", perm("rw-"), Origin::UserInputFile);
        assert_eq!(
            sorted_paths(&trie),
            vec![
                ("/a/b".to_string(), perm("rw-")),
                ("/a/b/c".to_string(), perm("r--")),
            ]
        );
    }

    #[test]
    fn render_is_deterministic_and_marks_depth() {
        let mut trie = test_trie();
        trie.insert("/lib/b", perm("r-x"), Origin::SharedLib);
        trie.insert("/lib/a", perm("r-x"), Origin::SharedLib);

        let rendered = trie.render();
        assert_eq!(rendered, trie.render());
        assert!(rendered.starts_with("/\n"));
        assert!(rendered.contains("1|__/lib\n"));
        let a = rendered.find("2|__/lib/a [R-X] [SHARED_LIB]").unwrap();
        let b = rendered.find("2|__/lib/b [R-X] [SHARED_LIB]").unwrap();
        assert!(a < b);
    }

    #[test]
    fn render_profile_lists_permissioned_nodes_only() {
        let mut trie = test_trie();
        trie.insert("/lib/a", perm("r-x"), Origin::SharedLib);
        let listing = trie.render_profile();
        assert_eq!(listing, "    /lib/a [R-X] [SHARED_LIB]\n");
    }
}
