//! simlink console client entry point.
//!
//! ```text
//! simlink-client                    Connect with defaults
//! simlink-client --config <path>   Use custom config TOML
//! simlink-client --gen-config      Dump default config and exit
//! simlink-client --write-config    Write default config to --config and exit
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use simlink_core::{MemoryStore, Role, Session, SessionOutcome, UserCommand};

use simlink_client::commands::{self, ConsoleCommand, HELP};
use simlink_client::config::ClientConfig;
use simlink_client::console::Console;
use simlink_client::transport::TcpTransport;

/// Queued console commands before input backs up.
const COMMAND_QUEUE: usize = 32;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "simlink-client", about = "Streamed training simulation console")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "simlink-client.toml")]
    config: PathBuf,

    /// Simulation address (overrides config). Example: 10.0.0.5:7440
    #[arg(short, long)]
    sim: Option<String>,

    /// User id (overrides config).
    #[arg(short, long)]
    user: Option<String>,

    /// Role: student, instructor, admin or demo (overrides config).
    #[arg(short, long)]
    role: Option<Role>,

    /// Treat the launch as coming from a learning platform.
    #[arg(long)]
    lti: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the --config path and exit.
    #[arg(long)]
    write_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    if cli.write_config {
        ClientConfig::write_default(&cli.config)?;
        println!("wrote {}", cli.config.display());
        return Ok(());
    }

    let mut config = ClientConfig::load(&cli.config);
    if let Some(addr) = cli.sim {
        config.network.sim_address = addr;
    }
    if let Some(user) = cli.user {
        config.user.user_id = user;
    }
    if let Some(role) = cli.role {
        config.user.role = role;
    }
    if cli.lti {
        config.user.lti = true;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("simlink-client v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Build the session ────────────────────────────────────

    let transport = TcpTransport::new(config.network.sim_address.clone(), config.timeout());
    let session = Session::new(
        config.to_session_config(),
        config.launch_context(),
        transport,
        MemoryStore::new(),
    );
    let mut events = session.subscribe();
    let conn_state = session.connection_state();
    let screen_state = session.screen_state();

    // ── 2. Run it ───────────────────────────────────────────────

    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
    let mut session_task = tokio::spawn(session.run(cmd_rx));
    cmd_tx.send(UserCommand::Start).await?;

    // ── 3. Console loop ─────────────────────────────────────────

    let mut console = Console::new(config.session.log_capacity);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("type /help for commands");

    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    // Stdin closed; detach the session.
                    drop(cmd_tx);
                    break session_task.await?;
                };
                match commands::parse(&line) {
                    ConsoleCommand::Session(cmd) => {
                        if cmd_tx.send(cmd).await.is_err() {
                            break session_task.await?;
                        }
                    }
                    ConsoleCommand::Log { count } => {
                        for entry in console.log_lines(count) {
                            println!("{entry}");
                        }
                    }
                    ConsoleCommand::Status => {
                        let (conn, screen) = (*conn_state.borrow(), *screen_state.borrow());
                        println!("{}", console.status(conn, screen));
                    }
                    ConsoleCommand::Help => println!("{HELP}"),
                    ConsoleCommand::Empty => {}
                    ConsoleCommand::Unknown { input } => {
                        println!("unknown command: {input} (try /help)");
                    }
                    ConsoleCommand::InvalidArgs { command, error } => {
                        println!("/{command}: {error}");
                    }
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(text) = console.on_event(&event) {
                        println!("{text}");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("console lagged, {n} events skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break session_task.await?,
            },
            outcome = &mut session_task => break outcome?,
        }
    };

    match outcome {
        SessionOutcome::Completed => println!("training complete"),
        SessionOutcome::Quit => println!("bye"),
        SessionOutcome::Detached => info!("input closed, session detached"),
    }
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn write_config_uses_config_path() {
        let cli = Cli::try_parse_from(["simlink-client", "--write-config", "-c", "lab.toml"]).unwrap();
        assert!(cli.write_config);
        assert!(!cli.gen_config);
        assert_eq!(cli.config, PathBuf::from("lab.toml"));
    }

    #[test]
    fn overrides_parse() {
        let cli = Cli::try_parse_from([
            "simlink-client",
            "--sim",
            "10.0.0.5:7440",
            "--role",
            "instructor",
            "--lti",
        ])
        .unwrap();
        assert_eq!(cli.sim.as_deref(), Some("10.0.0.5:7440"));
        assert_eq!(cli.role, Some(Role::Instructor));
        assert!(cli.lti && !cli.write_config);
    }
}
