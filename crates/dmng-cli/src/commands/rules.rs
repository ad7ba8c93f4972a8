//! Direct mutation of rules and denials.

use std::path::Path;

use anyhow::Result;
use dmng_core::origin::Origin;
use dmng_core::{Error, Permission, PolicyId, RequirementStore};

/// Adds a requirement or a denial to the active policy.
///
/// The path must exist on the filesystem; a requirement additionally
/// needs a valid permission literal, a denial takes none.
pub fn add(
    store: &mut RequirementStore,
    pol: PolicyId,
    cmd: &str,
    path: &str,
    permission: Option<&str>,
    deny: bool,
) -> Result<()> {
    if !Path::new(path).exists() {
        return Err(Error::RequirementNotFound { path: path.into() }.into());
    }

    if deny {
        if permission.is_some() {
            return Err(Error::PermissionWithDenial.into());
        }
        store.add_denial(pol, path)?;
        println!("[*] Denial for command {cmd} added");
    } else {
        let perm = Permission::parse(permission.ok_or(Error::MissingPermission)?)?;
        store.add_rule(pol, path, perm, Origin::UserInputFile)?;
        println!("[*] Requirement of command {cmd} added");
    }
    Ok(())
}

/// Removes denials or permissioned requirements matching a pattern.
pub fn remove(
    store: &RequirementStore,
    pol: PolicyId,
    cmd: &str,
    pattern: &str,
    permission: Option<&str>,
    deny: bool,
) -> Result<()> {
    if deny {
        if permission.is_some() {
            return Err(Error::PermissionWithDenial.into());
        }
        store.remove_denials(pol, pattern)?;
        println!("[*] Denial for command {cmd} removed");
    } else {
        let Some(permission) = permission else {
            anyhow::bail!("`--remove` without a permission is unsupported, use `--wipe` instead");
        };
        let perm = Permission::parse(permission)?;
        store.remove_rules(pol, pattern, perm)?;
        println!("[*] Requirements of policy {pol} removed");
    }
    Ok(())
}

/// Sets the permission of every requirement matching a pattern.
pub fn update(
    store: &RequirementStore,
    pol: PolicyId,
    pattern: &str,
    permission: Option<&str>,
) -> Result<()> {
    let perm = Permission::parse(permission.ok_or(Error::MissingPermission)?)?;
    store.update_rule_perm(pol, pattern, perm)?;
    println!("[*] Requirements of policy {pol} updated");
    Ok(())
}

/// Wipes the active policy, or only its deny list.
pub fn wipe(
    store: &mut RequirementStore,
    pol: PolicyId,
    cmd: &str,
    ctx: &str,
    deny: bool,
) -> Result<()> {
    if deny {
        store.wipe_denials(pol)?;
        println!("[*] Denials associated with policy {pol} wiped");
    } else {
        store.wipe_command(pol, cmd, ctx)?;
        println!("[*] Entries related to {cmd} wiped out");
    }
    Ok(())
}
