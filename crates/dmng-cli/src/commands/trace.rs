//! Tracing commands.

use anyhow::Result;
use dmng_core::trace::{classify_command, trace_ebpf, trace_static, trace_syscalls, ProgramKind};
use dmng_core::{PolicyId, RequirementStore, Session};

use crate::TraceMode;

/// Runs the selected tracing backend against the active policy.
pub fn run(
    store: &mut RequirementStore,
    session: &Session,
    pol: PolicyId,
    cmd: &str,
    cmd_line: &str,
    mode: TraceMode,
    simulate: Option<f64>,
) -> Result<()> {
    match mode {
        TraceMode::Static => {
            let (path, kind) = trace_static(store, pol, cmd)?;
            println!("[*] Command path:\t{}", path.display());
            println!("[*] Program type:\t{}", kind.describe());
            match kind {
                ProgramKind::Elf => {},
                ProgramKind::PosixScript | ProgramKind::BourneScript => {
                    println!("[*] Command wrapper found, try the `--simulate` option");
                },
                ProgramKind::Unknown => {
                    println!("[*] No direct path to the ELF program, try the `--simulate` option");
                },
            }
        },
        TraceMode::Ptrace => {
            let duration = simulate.filter(|seconds| *seconds > 0.0).ok_or_else(|| {
                anyhow::anyhow!(
                    "dynamic tracing requires the tracing timeframe, set it with `--simulate`"
                )
            })?;
            classify_command(store, pol, cmd)?;
            println!("[*] Tracing command with `ptrace`:\t{cmd}");
            let count = trace_syscalls(store, session, pol, cmd_line, duration)?;
            println!("[*] Collected {count} requirements");
        },
        TraceMode::Ebpf => {
            classify_command(store, pol, cmd)?;
            println!("[*] Tracing command with `ebpf`:\t{cmd}");
            let count = trace_ebpf(store, pol, cmd_line)?;
            println!("[*] Collected {count} requirements");
        },
    }
    Ok(())
}
