//! Profile building and policy serialization.

use anyhow::Result;
use dmng_core::builder::build_profile;
use dmng_core::serialize::{fix_depth, Serializer};
use dmng_core::{Error, PolicyId, PolicyIdent, RequirementStore, Session};

/// Validates the operator-supplied goal. Zero selects the builder
/// default; a negative value is rejected.
fn validate_goal(goal: i64) -> Result<usize> {
    usize::try_from(goal).map_err(|_| Error::InvalidGoal { goal }.into())
}

/// Builds the profile of the active policy and stores it.
pub fn build(
    store: &mut RequirementStore,
    session: &Session,
    pol: PolicyId,
    cmd: &str,
    ctx: &str,
    goal: i64,
) -> Result<()> {
    let goal = validate_goal(goal)?;
    let ident = PolicyIdent {
        pol,
        cmd: cmd.to_string(),
        ctx: ctx.to_string(),
    };

    let built = build_profile(store, session, &ident, goal)?;
    if !built.achieved {
        println!(
            "[W] Pruning goal not achieved (still {} nodes)!",
            built.entries.len()
        );
    }
    println!("[*] New {cmd} profile created successfully");
    Ok(())
}

/// Builds every policy in the store and serializes them into one
/// document under the session profiles directory.
pub fn serialize_all(
    store: &mut RequirementStore,
    session: &Session,
    goal: i64,
    fname: &str,
) -> Result<()> {
    let goal = validate_goal(goal)?;
    let idents = store.policies()?;

    let mut serializer = Serializer::new(session.profiles_dir());
    for ident in &idents {
        let built = build_profile(store, session, ident, goal)?;
        if !built.achieved {
            println!(
                "[W] Pruning goal not achieved for {} (still {} nodes)!",
                ident.cmd,
                built.entries.len()
            );
        }
        serializer.add_policy(ident, &built.entries, &store.denials(ident.pol)?);
        println!(
            "[*] Policy for CMD: {} and CTX: {} created successfully",
            ident.cmd, ident.ctx
        );
    }

    let target = serializer.write(fname)?;
    println!("[*] Policy serialized to file {}", target.display());
    Ok(())
}

/// Repairs the `max_depth` attribute of a serialized policy document.
pub fn fixdepth(session: &Session, fname: &str) -> Result<()> {
    let target = fix_depth(session.profiles_dir(), fname)?;
    println!("[*] Policy {} updated successfully", target.display());
    Ok(())
}
