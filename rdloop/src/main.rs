//! rdloop command-line entry point.
//!
//! Wraps the decision engine for shell callers and runs the approval bridge
//! plus the channel-side commands that talk to it through the bridge directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use rdloop::bridge::{Bridge, BridgeExit, BridgeOptions};
use rdloop::channel;
use rdloop::decide::{decide_json, read_file_or_stdin, read_inline_or_stdin, verdict_errors};
use rdloop::exit_codes;
use rdloop::io::config::{BridgeConfig, load_config};
use rdloop::io::ipc::{BridgeIpc, BridgePaths, SessionAction};
use rdloop::io::stop::StopFlag;
use rdloop::io::watch::PendingWatcher;
use rdloop::logging;

#[derive(Parser)]
#[command(
    name = "rdloop",
    version,
    about = "Decision engine and approval bridge for agent task loops"
)]
struct Cli {
    /// Bridge directory holding pending/, responses/, state.json and events.jsonl.
    #[arg(long, global = true, env = "BRIDGE_DIR", default_value = "out/claude_bridge")]
    bridge_dir: PathBuf,

    /// Config file (defaults to `<bridge-dir>/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decide the next task state from an execution context (JSON or `-` for stdin).
    Decide {
        /// Serialized execution context.
        context: String,
    },
    /// Check a judge verdict file (`-` for stdin).
    ValidateVerdict {
        /// Verdict JSON file.
        verdict: String,
    },
    /// Run a subprocess under the approval bridge.
    Bridge(BridgeArgs),
    /// Print pending requests as JSON lines.
    Pending {
        /// Keep watching and print each new request once.
        #[arg(long)]
        watch: bool,
    },
    /// Answer a pending request.
    Respond {
        id: String,
        choice: String,
        /// Channel name recorded with the response.
        #[arg(long, default_value = "cli")]
        source: String,
        #[arg(long)]
        chat_id: Option<String>,
    },
    /// Resume or cancel a usage-limited session.
    Signal {
        action: ActionArg,
        /// Channel name recorded with the limit response.
        #[arg(long, default_value = "cli")]
        source: String,
    },
    /// Print the current session state.
    Status,
}

#[derive(clap::Args)]
struct BridgeArgs {
    /// Program to supervise.
    #[arg(long, env = "CLAUDE_CMD")]
    command: Option<String>,

    #[arg(long, env = "BRIDGE_SESSION_ID")]
    session_id: Option<String>,

    /// Seconds to wait for an approval before auto-rejecting.
    #[arg(long, env = "BRIDGE_APPROVAL_TIMEOUT")]
    approval_timeout: Option<u64>,

    /// Milliseconds between response checks.
    #[arg(long, env = "BRIDGE_POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Do not mirror subprocess output.
    #[arg(long)]
    no_relay: bool,

    /// Arguments passed to the subprocess.
    #[arg(last = true, required = true)]
    args: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ActionArg {
    Resume,
    Cancel,
}

impl From<ActionArg> for SessionAction {
    fn from(action: ActionArg) -> Self {
        match action {
            ActionArg::Resume => SessionAction::Resume,
            ActionArg::Cancel => SessionAction::Cancel,
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Decide { context } => cmd_decide(&context),
        Command::ValidateVerdict { verdict } => cmd_validate_verdict(&verdict),
        Command::Bridge(args) => cmd_bridge(&cli.bridge_dir, cli.config, args),
        Command::Pending { watch } => cmd_pending(&cli.bridge_dir, cli.config, watch),
        Command::Respond {
            id,
            choice,
            source,
            chat_id,
        } => {
            let ipc = BridgeIpc::open(&cli.bridge_dir)?;
            let response = channel::respond(&ipc, &id, &choice, &source, chat_id.as_deref())?;
            print_json(&response)?;
            Ok(exit_codes::OK)
        }
        Command::Signal { action, source } => {
            let ipc = BridgeIpc::open(&cli.bridge_dir)?;
            let state = channel::signal(&ipc, action.into(), &source)?;
            print_json(&state)?;
            Ok(exit_codes::OK)
        }
        Command::Status => {
            let ipc = BridgeIpc::open(&cli.bridge_dir)?;
            let Some(state) = ipc.read_state() else {
                bail!("no session state at {}", ipc.paths().state_path.display());
            };
            print_json(&state)?;
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_decide(input: &str) -> Result<i32> {
    let raw = read_inline_or_stdin(input)?;
    let decision = decide_json(&raw)?;
    print_json(&decision)?;
    Ok(exit_codes::OK)
}

fn cmd_validate_verdict(input: &str) -> Result<i32> {
    let raw = read_file_or_stdin(input)?;
    let errors = verdict_errors(&raw)?;
    if errors.is_empty() {
        return Ok(exit_codes::OK);
    }
    for error in &errors {
        eprintln!("VALIDATION ERROR: {error}");
    }
    Ok(exit_codes::INVALID)
}

fn cmd_bridge(bridge_dir: &Path, config: Option<PathBuf>, args: BridgeArgs) -> Result<i32> {
    let mut cfg = load_bridge_config(bridge_dir, config)?;
    if let Some(command) = args.command {
        cfg.command = command;
    }
    if let Some(secs) = args.approval_timeout {
        cfg.approval_timeout_secs = secs;
    }
    if let Some(ms) = args.poll_interval {
        cfg.poll_interval_ms = ms;
    }
    if args.no_relay {
        cfg.relay_output = false;
    }
    cfg.validate().context("invalid bridge options")?;

    let ipc = BridgeIpc::open(bridge_dir)?;
    let mut options = BridgeOptions::from_config(&cfg, args.args);
    if let Some(session_id) = args.session_id {
        options.session_id = session_id;
    }

    let mut bridge = Bridge::new(options, ipc);
    install_stop_handler(bridge.stop_flag())?;
    let exit = bridge.run()?;
    if let BridgeExit::SpawnFailed { error } = &exit {
        eprintln!("{error}");
    }
    Ok(exit.exit_code())
}

fn cmd_pending(bridge_dir: &Path, config: Option<PathBuf>, watch: bool) -> Result<i32> {
    let ipc = BridgeIpc::open(bridge_dir)?;
    if !watch {
        for request in ipc.list_pending() {
            println!("{}", serde_json::to_string(&request).context("serialize request")?);
        }
        return Ok(exit_codes::OK);
    }

    let cfg = load_bridge_config(bridge_dir, config)?;
    let stop = StopFlag::new();
    install_stop_handler(stop.clone())?;
    let mut watcher = PendingWatcher::new(cfg.stale_after(), cfg.seen_cache_capacity);
    loop {
        for request in watcher.poll(&ipc, Utc::now()) {
            println!("{}", serde_json::to_string(&request).context("serialize request")?);
        }
        if stop.sleep(cfg.poll_interval()) {
            return Ok(exit_codes::OK);
        }
    }
}

fn load_bridge_config(bridge_dir: &Path, config: Option<PathBuf>) -> Result<BridgeConfig> {
    let path = config.unwrap_or_else(|| BridgePaths::new(bridge_dir).config_path);
    load_config(&path).with_context(|| format!("load config {}", path.display()))
}

fn install_stop_handler(stop: StopFlag) -> Result<()> {
    ctrlc::set_handler(move || stop.request_stop()).context("install signal handler")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value).context("serialize json")?);
    Ok(())
}
