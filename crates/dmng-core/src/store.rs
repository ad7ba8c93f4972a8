//! Persistent requirement store.
//!
//! The store is a single `SQLite` file under the per-user configuration
//! directory. It persists five tables:
//!
//! - `CACHE(cmd, ctx)`: the active context per command (last write wins),
//! - `POLICY(pol, cmd, ctx)`: the identity service assigning a policy
//!   identifier to every `(command, context)` pair ever activated,
//! - `RULE(rule, pol, req, perm, origin)`: raw filesystem evidence,
//! - `DENY(deny, pol, req)`: the independent deny list,
//! - `PROFILE(id, pol, req, perm)`: the output of the profile builder.
//!
//! # Monotonic permission
//!
//! Multiple tracers and user inputs may mention the same path with
//! different permissions. The store keeps **at most one `RULE` row per
//! `(pol, req)` pair, holding the maximum permission ever observed** for
//! that pair. A dedup pass enforcing this runs after every add or update,
//! regardless of insertion order.
//!
//! Patterns accepted by the remove/update operations use SQL `LIKE`
//! semantics: `%` matches any substring, `_` any single character.

use std::collections::BTreeMap;
use std::fmt;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::Result;
use crate::origin::Origin;
use crate::permission::Permission;
use crate::session::Session;

/// Opaque identifier of a `(command, context)` policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PolicyId(
    /// Raw store identifier.
    pub i64,
);

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A policy together with the pair it identifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyIdent {
    /// Policy identifier.
    pub pol: PolicyId,
    /// Command name.
    pub cmd: String,
    /// Context label.
    pub ctx: String,
}

/// One row of filesystem evidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Absolute filesystem path.
    pub req: String,
    /// Permission granted on the path.
    pub perm: Permission,
    /// How the evidence entered the store.
    pub origin: Origin,
}

/// One row of a built profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntry {
    /// Absolute filesystem path.
    pub req: String,
    /// Permission granted on the path.
    pub perm: Permission,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS CACHE (
    cmd TEXT NOT NULL PRIMARY KEY,
    ctx TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS POLICY (
    pol INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
    cmd TEXT NOT NULL,
    ctx TEXT NOT NULL,
    UNIQUE (cmd, ctx)
);
CREATE TABLE IF NOT EXISTS RULE (
    rule INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
    pol INTEGER NOT NULL,
    req TEXT NOT NULL,
    perm INTEGER NOT NULL,
    origin TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS DENY (
    deny INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
    pol INTEGER NOT NULL,
    req TEXT NOT NULL,
    UNIQUE (pol, req)
);
CREATE TABLE IF NOT EXISTS PROFILE (
    id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
    pol INTEGER NOT NULL,
    req TEXT NOT NULL,
    perm INTEGER NOT NULL
);
";

/// Handle over the persistent store.
#[derive(Debug)]
pub struct RequirementStore {
    conn: Connection,
}

impl RequirementStore {
    /// Opens the store, creating the directory (mode 0750) and the schema
    /// if absent. Idempotent.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created or the database cannot
    /// be opened.
    pub fn open(session: &Session) -> Result<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o750)
                .create(session.store_dir())?;
        }
        #[cfg(not(unix))]
        std::fs::create_dir_all(session.store_dir())?;

        let conn = Connection::open(session.store_path())?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = %session.store_path().display(), "requirement store opened");
        Ok(Self { conn })
    }

    /// Opens an in-memory store. Test-only convenience.
    #[cfg(test)]
    pub(crate) fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Makes `ctx` the active context of `cmd`, creating the policy row
    /// on first activation. Returns the policy identifier.
    ///
    /// A previously active context is not deleted; its policy stays
    /// addressable for later reactivation.
    ///
    /// # Errors
    ///
    /// Fails on store I/O errors.
    pub fn set_active_context(&mut self, cmd: &str, ctx: &str) -> Result<PolicyId> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM CACHE WHERE cmd = ?1", params![cmd])?;
        tx.execute(
            "INSERT INTO CACHE (cmd, ctx) VALUES (?1, ?2)",
            params![cmd, ctx],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO POLICY (cmd, ctx) VALUES (?1, ?2)",
            params![cmd, ctx],
        )?;
        let pol: i64 = tx.query_row(
            "SELECT pol FROM POLICY WHERE cmd = ?1 AND ctx = ?2",
            params![cmd, ctx],
            |row| row.get(0),
        )?;
        tx.commit()?;
        info!(cmd, ctx, pol, "active context set");
        Ok(PolicyId(pol))
    }

    /// Returns the active context of `cmd`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::NoActiveContext`] when none is set.
    pub fn active_context(&self, cmd: &str) -> Result<String> {
        self.conn
            .query_row(
                "SELECT ctx FROM CACHE WHERE cmd = ?1",
                params![cmd],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| crate::Error::NoActiveContext {
                cmd: cmd.to_string(),
            })
    }

    /// Returns the policy identifier of a `(command, context)` pair.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::PolicyNotFound`] when the pair was never
    /// activated.
    pub fn policy(&self, cmd: &str, ctx: &str) -> Result<PolicyId> {
        self.conn
            .query_row(
                "SELECT pol FROM POLICY WHERE cmd = ?1 AND ctx = ?2",
                params![cmd, ctx],
                |row| row.get(0),
            )
            .optional()?
            .map(PolicyId)
            .ok_or_else(|| crate::Error::PolicyNotFound {
                cmd: cmd.to_string(),
                ctx: ctx.to_string(),
            })
    }

    /// Lists every policy ever activated.
    ///
    /// # Errors
    ///
    /// Fails on store I/O errors.
    pub fn policies(&self) -> Result<Vec<PolicyIdent>> {
        let mut stmt = self
            .conn
            .prepare("SELECT pol, cmd, ctx FROM POLICY ORDER BY pol")?;
        let rows = stmt.query_map([], |row| {
            Ok(PolicyIdent {
                pol: PolicyId(row.get(0)?),
                cmd: row.get(1)?,
                ctx: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Returns the contexts recorded for each command.
    ///
    /// # Errors
    ///
    /// Fails on store I/O errors.
    pub fn contexts(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut map: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for ident in self.policies()? {
            map.entry(ident.cmd).or_default().push(ident.ctx);
        }
        Ok(map)
    }

    /// Adds a single rule and re-runs the dedup pass.
    ///
    /// # Errors
    ///
    /// Fails on store I/O errors.
    pub fn add_rule(
        &mut self,
        pol: PolicyId,
        req: &str,
        perm: Permission,
        origin: Origin,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO RULE (pol, req, perm, origin) VALUES (?1, ?2, ?3, ?4)",
            params![pol.0, req, i64::from(perm.bits()), origin.as_str()],
        )?;
        self.dedup_rules(pol)?;
        debug!(%pol, req, perm = %perm, origin = %origin, "rule added");
        Ok(())
    }

    /// Adds a batch of rules sharing one origin in a single transaction,
    /// then re-runs the dedup pass.
    ///
    /// # Errors
    ///
    /// Fails on store I/O errors.
    pub fn add_rules(
        &mut self,
        pol: PolicyId,
        items: &[(String, Permission)],
        origin: Origin,
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO RULE (pol, req, perm, origin) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (req, perm) in items {
                stmt.execute(params![pol.0, req, i64::from(perm.bits()), origin.as_str()])?;
            }
        }
        tx.commit()?;
        self.dedup_rules(pol)?;
        info!(%pol, count = items.len(), origin = %origin, "rules added");
        Ok(())
    }

    /// Post-processing after any rule add or update.
    ///
    /// 1. For each `(pol, req)`, drop all rows whose permission is below
    ///    the maximum for that pair.
    /// 2. Collapse identical `(pol, req, perm)` triples into one row.
    fn dedup_rules(&self, pol: PolicyId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM RULE WHERE rule IN (
                 SELECT R.rule FROM RULE R WHERE R.perm < (
                     SELECT max(perm) FROM RULE
                     WHERE req = R.req AND pol = R.pol AND pol = ?1
                 )
             )",
            params![pol.0],
        )?;
        self.conn.execute(
            "DELETE FROM RULE WHERE rule NOT IN (
                 SELECT rule FROM RULE GROUP BY pol, req, perm
             )",
            [],
        )?;
        Ok(())
    }

    /// Adds a denial; duplicate `(pol, req)` pairs are ignored silently.
    ///
    /// # Errors
    ///
    /// Fails on store I/O errors.
    pub fn add_denial(&self, pol: PolicyId, req: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO DENY (pol, req) VALUES (?1, ?2)",
            params![pol.0, req],
        )?;
        debug!(%pol, req, "denial added");
        Ok(())
    }

    /// Removes the denials matching a `LIKE` pattern.
    ///
    /// # Errors
    ///
    /// Fails on store I/O errors.
    pub fn remove_denials(&self, pol: PolicyId, pattern: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM DENY WHERE pol = ?1 AND req LIKE ?2",
            params![pol.0, pattern],
        )?;
        Ok(())
    }

    /// Removes every denial of a policy.
    ///
    /// # Errors
    ///
    /// Fails on store I/O errors.
    pub fn wipe_denials(&self, pol: PolicyId) -> Result<()> {
        self.conn
            .execute("DELETE FROM DENY WHERE pol = ?1", params![pol.0])?;
        Ok(())
    }

    /// Removes the rules matching a `LIKE` pattern and an exact
    /// permission.
    ///
    /// # Errors
    ///
    /// Fails on store I/O errors.
    pub fn remove_rules(&self, pol: PolicyId, pattern: &str, perm: Permission) -> Result<()> {
        self.conn.execute(
            "DELETE FROM RULE WHERE pol = ?1 AND req LIKE ?2 AND perm = ?3",
            params![pol.0, pattern, i64::from(perm.bits())],
        )?;
        Ok(())
    }

    /// Sets the permission of every rule matching a `LIKE` pattern, then
    /// re-runs the dedup pass.
    ///
    /// # Errors
    ///
    /// Fails on store I/O errors.
    pub fn update_rule_perm(&self, pol: PolicyId, pattern: &str, perm: Permission) -> Result<()> {
        self.conn.execute(
            "UPDATE RULE SET perm = ?1 WHERE pol = ?2 AND req LIKE ?3",
            params![i64::from(perm.bits()), pol.0, pattern],
        )?;
        self.dedup_rules(pol)?;
        Ok(())
    }

    /// Removes a policy together with its cache entry, rules, and denials.
    ///
    /// # Errors
    ///
    /// Fails on store I/O errors.
    pub fn wipe_command(&mut self, pol: PolicyId, cmd: &str, ctx: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM CACHE WHERE cmd = ?1 AND ctx = ?2",
            params![cmd, ctx],
        )?;
        tx.execute("DELETE FROM POLICY WHERE pol = ?1", params![pol.0])?;
        tx.execute("DELETE FROM RULE WHERE pol = ?1", params![pol.0])?;
        tx.execute("DELETE FROM DENY WHERE pol = ?1", params![pol.0])?;
        tx.commit()?;
        info!(%pol, cmd, ctx, "policy wiped");
        Ok(())
    }

    /// Empties the cache, policy, rule, and deny tables.
    ///
    /// Profile rows are owned by the profile builder and are left in
    /// place; the next build replaces them wholesale.
    ///
    /// # Errors
    ///
    /// Fails on store I/O errors.
    pub fn wipe_all(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM CACHE", [])?;
        tx.execute("DELETE FROM POLICY", [])?;
        tx.execute("DELETE FROM RULE", [])?;
        tx.execute("DELETE FROM DENY", [])?;
        tx.commit()?;
        info!("requirement store wiped");
        Ok(())
    }

    /// Returns every rule of a policy.
    ///
    /// # Errors
    ///
    /// Fails on store I/O errors.
    pub fn rules(&self, pol: PolicyId) -> Result<Vec<Rule>> {
        let mut stmt = self
            .conn
            .prepare("SELECT req, perm, origin FROM RULE WHERE pol = ?1")?;
        let rows = stmt.query_map(params![pol.0], |row| {
            Ok(Rule {
                req: row.get(0)?,
                perm: Permission::from_stored(row.get(1)?),
                origin: Origin::from_label(&row.get::<_, String>(2)?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Returns every denied path of a policy.
    ///
    /// # Errors
    ///
    /// Fails on store I/O errors.
    pub fn denials(&self, pol: PolicyId) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT req FROM DENY WHERE pol = ?1")?;
        let rows = stmt.query_map(params![pol.0], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }

    /// Replaces the stored profile of a policy with `entries`, atomically.
    ///
    /// # Errors
    ///
    /// Fails on store I/O errors; on failure the previous profile is kept.
    pub fn replace_profile(&mut self, pol: PolicyId, entries: &[ProfileEntry]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM PROFILE WHERE pol = ?1", params![pol.0])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO PROFILE (pol, req, perm) VALUES (?1, ?2, ?3)")?;
            for entry in entries {
                stmt.execute(params![pol.0, entry.req, i64::from(entry.perm.bits())])?;
            }
        }
        tx.commit()?;
        debug!(%pol, count = entries.len(), "profile replaced");
        Ok(())
    }

    /// Returns the stored profile of a policy.
    ///
    /// # Errors
    ///
    /// Fails on store I/O errors.
    pub fn profile(&self, pol: PolicyId) -> Result<Vec<ProfileEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT req, perm FROM PROFILE WHERE pol = ?1")?;
        let rows = stmt.query_map(params![pol.0], |row| {
            Ok(ProfileEntry {
                req: row.get(0)?,
                perm: Permission::from_stored(row.get(1)?),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<_>>()?)
    }
}
