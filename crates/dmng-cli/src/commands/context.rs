//! Context selection commands.

use anyhow::Result;
use dmng_core::RequirementStore;

/// Activates a context for a command, creating the policy on first use.
pub fn set(store: &mut RequirementStore, cmd: &str, ctx: &str) -> Result<()> {
    let pol = store.set_active_context(cmd, ctx)?;
    println!("[*] Set CTX: {ctx}, CMD: {cmd}, POL: {pol}");
    Ok(())
}

/// Prints the active context of a command.
pub fn get(store: &RequirementStore, cmd: &str) -> Result<()> {
    let ctx = store.active_context(cmd)?;
    println!("[*] CMD: {cmd}, CTX: {ctx}");
    Ok(())
}

/// Prints every context recorded for every command.
pub fn list(store: &RequirementStore) -> Result<()> {
    for (cmd, contexts) in store.contexts()? {
        print!("[*] CMD {cmd}: available CTX: |");
        for ctx in contexts {
            print!(" {ctx} |");
        }
        println!();
    }
    Ok(())
}
