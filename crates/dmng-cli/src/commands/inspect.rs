//! Read-only views over the store.

use anyhow::Result;
use dmng_core::{Mask, PolicyId, RequirementStore};

/// Prints the rules of the active policy (optionally filtered by a
/// permission mask) followed by its deny list.
pub fn entries(
    store: &RequirementStore,
    pol: PolicyId,
    cmd: &str,
    ctx: &str,
    mask: Option<&str>,
) -> Result<()> {
    let filter = match mask {
        Some(raw) => {
            let mask = Mask::parse(raw)?;
            println!("[*] Inspect command {cmd}, mask {raw}");
            Some(mask)
        },
        None => {
            println!("[*] Inspect command {cmd}, mask ___ => ANY");
            None
        },
    };

    println!("\n  Permissions (CTX: {ctx}, POL: {pol}):");
    for rule in store.rules(pol)? {
        if filter.map_or(true, |mask| rule.perm.matches(mask)) {
            println!("    {} | {} | {}", rule.req, rule.perm, rule.origin);
        }
    }

    println!("\n  Denials (CTX: {ctx}, POL: {pol}):");
    for denial in store.denials(pol)? {
        println!("    {denial}");
    }
    Ok(())
}

/// Prints the built profile of the active policy.
pub fn profile(store: &RequirementStore, pol: PolicyId, cmd: &str, ctx: &str) -> Result<()> {
    println!("[*] Security profile CTX: {ctx}, CMD: {cmd}, POL: {pol}");
    for (index, row) in store.profile(pol)?.iter().enumerate() {
        println!(" {index},\t{},\t{}", row.perm, row.req);
    }
    Ok(())
}
