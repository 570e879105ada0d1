use anyhow::Result;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prusti_assistant::config::Config;
use prusti_assistant::notify::LogNotifier;
use prusti_assistant::process::{self, RunOptions};
use prusti_assistant::server::ServerStatus;
use prusti_assistant::session::{Session, SessionPaths};
use prusti_assistant::toolchain::{progress_channel, ProgressReporter};

#[derive(Parser)]
#[command(name = "prusti-assistant")]
#[command(about = "Installs the Prusti verifier and supervises its server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install the Prusti toolchain for the configured channel
    Install {
        /// Download again even if a toolchain is already installed
        #[arg(long)]
        update: bool,
    },
    /// Install if needed, then run the Prusti server until interrupted
    Server,
    /// Run a command once and report its output and exit code
    Run {
        /// Working directory for the command
        #[arg(long)]
        cwd: Option<PathBuf>,
        program: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Configure prusti-assistant
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
        /// Set the build channel (nightly or local)
        #[arg(long)]
        channel: Option<String>,
        /// Set the path of a local Prusti build
        #[arg(long)]
        local_path: Option<String>,
        /// Use an external server at this address (empty to supervise locally)
        #[arg(long)]
        server_address: Option<String>,
        /// Set the Java home (empty to auto-detect)
        #[arg(long)]
        java_home: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prusti_assistant=info,prusti_server=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Install { update } => {
            let session = open_session()?;
            install(&session, update).await?;
        }
        Commands::Server => {
            let session = open_session()?;
            run_server(&session).await?;
        }
        Commands::Run { cwd, program, args } => {
            let code = run_once(cwd, program, args).await?;
            std::process::exit(code);
        }
        Commands::Config {
            show,
            channel,
            local_path,
            server_address,
            java_home,
        } => {
            handle_config(show, channel, local_path, server_address, java_home)?;
        }
    }

    Ok(())
}

fn open_session() -> Result<Session> {
    let config = Config::load()?;
    let paths = SessionPaths::default_for_user()?;
    Ok(Session::new(config, paths, Arc::new(LogNotifier)))
}

async fn install(session: &Session, update: bool) -> Result<()> {
    let (reporter, mut stream) = progress_channel();
    let printer = tokio::spawn(async move {
        while let Some(progress) = stream.next().await {
            eprintln!("{:>3.0}% {}", progress.fraction * 100.0, progress.step);
        }
    });

    let result = session.install_dependencies(update, reporter).await;
    printer.await?;

    let prusti = result?;
    println!("Prusti toolchain: {}", prusti.base().display());
    Ok(())
}

async fn run_server(session: &Session) -> Result<()> {
    if session.config().await.server_address().is_none() {
        session
            .install_dependencies(false, ProgressReporter::silent())
            .await?;
    }
    session.restart_server().await?;

    match session.supervisor().wait_until_settled().await {
        ServerStatus::Running { address } => println!("Prusti server listening on {}", address),
        _ => anyhow::bail!("Prusti server stopped before announcing its port"),
    }

    tokio::signal::ctrl_c().await?;
    println!("\nStopping Prusti server...");
    session.stop_server().await;
    Ok(())
}

async fn run_once(cwd: Option<PathBuf>, program: String, args: Vec<String>) -> Result<i32> {
    let options = RunOptions {
        cwd,
        ..RunOptions::default()
    };
    let output = process::run(&program, &args[..], &options).await?;

    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    Ok(output.code.unwrap_or(1))
}

fn handle_config(
    show: bool,
    channel: Option<String>,
    local_path: Option<String>,
    server_address: Option<String>,
    java_home: Option<String>,
) -> Result<()> {
    let mut config = Config::load()?;

    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let mut changed = false;

    if let Some(c) = channel {
        config.build_channel = c;
        changed = true;
        println!("Build channel updated");
    }

    if let Some(p) = local_path {
        config.local_prusti_path = p;
        changed = true;
        println!("Local Prusti path updated");
    }

    if let Some(a) = server_address {
        config.server_address = a;
        changed = true;
        println!("Server address updated");
    }

    if let Some(j) = java_home {
        config.java_home = j;
        changed = true;
        println!("Java home updated");
    }

    if changed {
        config.save()?;
        println!("Configuration saved to: {:?}", Config::config_path()?);
    } else {
        println!("No changes made. Use --show to view current configuration.");
    }

    Ok(())
}
