//! dmng - least-privilege filesystem profiles for Linux programs.
//!
//! CLI front end over `dmng-core`: collects the filesystem requirements
//! of a command, distills them into a compact profile, and serializes
//! sandbox-ready policy documents.

use anyhow::Result;
use clap::{CommandFactory, Parser, ValueEnum};
use dmng_core::{RequirementStore, Session};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;

/// Manage the requirements associated with a binary (or script) and
/// emit least-privilege filesystem policies.
#[derive(Parser, Debug)]
#[command(name = "dmng")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Print additional information to console
    #[arg(long)]
    debug: bool,

    /// Serialize every policy to the given file name
    #[arg(long, value_name = "FILE")]
    serialize: Option<String>,

    /// Recompute the `max_depth` attribute of a serialized policy from
    /// the content of its deny lists
    #[arg(long, value_name = "FILE")]
    fixdepth: Option<String>,

    /// Set the active policy context of a command. A context stays
    /// active until replaced by another one
    #[arg(long, value_name = "CTX")]
    setcontext: Option<String>,

    /// Print the active policy context (all commands when no --command
    /// is given)
    #[arg(long)]
    getcontext: bool,

    /// Print to console the profile of a command
    #[arg(long)]
    profile: bool,

    /// Set the command name
    #[arg(short, long, value_name = "CMD")]
    command: Option<String>,

    /// Add a requirement (the absolute path) to the active policy
    #[arg(short, long, value_name = "PATH")]
    add: Option<String>,

    /// Remove a requirement from the active policy. SQL-like requirement
    /// patterns supported
    #[arg(short, long, value_name = "PATTERN")]
    remove: Option<String>,

    /// Update the permission associated with a requirement in the active
    /// policy. SQL-like requirement patterns supported
    #[arg(short, long, value_name = "PATTERN")]
    update: Option<String>,

    /// Set the Unix-like permission mask. Valid symbols are `r`, `w`,
    /// `x`, `-`. Order matters
    #[arg(short, long, value_name = "PERM")]
    permission: Option<String>,

    /// Add/remove/wipe a requirement to/from the deny list. To be used
    /// in conjunction with `--add`, `--remove` or `--wipe`
    #[arg(short, long)]
    deny: bool,

    /// Print to console the entries stored by the current policy
    #[arg(short, long)]
    inspect: bool,

    /// Trace the program and automatically add its requirements to the
    /// active policy
    #[arg(short, long, value_enum, value_name = "MODE")]
    trace: Option<TraceMode>,

    /// Set dynamic tracing. To be used in conjunction with `--trace`.
    /// Requires the simulation time in seconds (e.g., 1, 2, 3.5)
    #[arg(short, long, value_name = "SECONDS")]
    simulate: Option<f64>,

    /// Build the security profile for the active policy
    #[arg(short, long)]
    build: bool,

    /// Set the maximum number of entries in the security profile
    /// (0 selects the default of 50)
    #[arg(short, long, default_value_t = 0, value_name = "N", allow_negative_numbers = true)]
    goal: i64,

    /// Wipe the entries associated with the active policy. If no other
    /// option is provided, wipes the whole store
    #[arg(short, long)]
    wipe: bool,

    /// Print some usage examples
    #[arg(short, long)]
    example: bool,
}

/// Supported tracing backends.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum TraceMode {
    /// Loader-chain walk: links, executable, shared objects.
    Static,
    /// Dynamic tracing under strace.
    Ptrace,
    /// Dynamic tracing via an external eBPF tracer.
    Ebpf,
}

const EXAMPLES: &str = "\
dmng usage examples:

  # declare the `dev` context of vim as active
  dmng --command vim --setcontext dev

  # trace vim statically (loader chain and shared objects)
  dmng --command vim --trace static

  # trace a full command line for 3.5 seconds under strace
  dmng --command 'vim /tmp/notes.txt' --trace ptrace --simulate 3.5

  # add a handpicked requirement with read-write permission
  dmng --command vim --add /home/me/notes --permission rw-

  # deny a path regardless of matching rules
  dmng --command vim --add /home/me/.ssh --deny

  # inspect the collected evidence, optionally filtered by mask
  dmng --command vim --inspect
  dmng --command vim --inspect --permission r__

  # build a profile with at most 20 entries and print it
  dmng --command vim --build --goal 20
  dmng --command vim --profile

  # serialize every policy into one document
  dmng --serialize policy.json
";

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if cli.example {
        print!("{EXAMPLES}");
        return Ok(());
    }

    let session = Session::new()?.with_debug(cli.debug);
    let mut store = RequirementStore::open(&session)?;

    if let Some(fname) = &cli.serialize {
        return commands::pipeline::serialize_all(&mut store, &session, cli.goal, fname);
    }
    if let Some(fname) = &cli.fixdepth {
        return commands::pipeline::fixdepth(&session, fname);
    }

    let permission = cli.permission.as_deref().map(str::to_ascii_lowercase);

    if let Some(raw) = &cli.command {
        let cmd_line = commands::sanitize_command(raw.trim())?;
        let cmd = cmd_line
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        println!("[*] Command to trace: `{cmd_line}`");

        if let Some(ctx) = &cli.setcontext {
            return commands::context::set(&mut store, &cmd, ctx);
        }
        if cli.getcontext {
            return commands::context::get(&store, &cmd);
        }

        let ctx = store.active_context(&cmd)?;
        let pol = store.policy(&cmd, &ctx)?;

        if let Some(mode) = cli.trace {
            return commands::trace::run(
                &mut store,
                &session,
                pol,
                &cmd,
                &cmd_line,
                mode,
                cli.simulate,
            );
        }
        if cli.wipe {
            return commands::rules::wipe(&mut store, pol, &cmd, &ctx, cli.deny);
        }
        if cli.build {
            return commands::pipeline::build(&mut store, &session, pol, &cmd, &ctx, cli.goal);
        }
        if cli.inspect {
            return commands::inspect::entries(&store, pol, &cmd, &ctx, permission.as_deref());
        }
        if cli.profile {
            return commands::inspect::profile(&store, pol, &cmd, &ctx);
        }
        if let Some(path) = &cli.add {
            if cli.remove.is_some() {
                anyhow::bail!("cannot use `--add` and `--remove` at the same time");
            }
            return commands::rules::add(&mut store, pol, &cmd, path, permission.as_deref(), cli.deny);
        }
        if let Some(pattern) = &cli.remove {
            return commands::rules::remove(&store, pol, &cmd, pattern, permission.as_deref(), cli.deny);
        }
        if let Some(pattern) = &cli.update {
            return commands::rules::update(&store, pol, pattern, permission.as_deref());
        }
    } else if cli.wipe {
        store.wipe_all()?;
        println!("[*] Requirement store wiped out");
        return Ok(());
    } else if cli.getcontext {
        return commands::context::list(&store);
    }

    // No operation selected.
    Cli::command().print_help()?;
    std::process::exit(1);
}
