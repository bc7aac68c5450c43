//! Demo binary: registers itself with the native service manager via the
//! lifecycle subcommands, and runs a TCP echo service when started with
//! no subcommand (which is what the generated service config does).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info};

use warden_core::{new_service, ServiceDescriptor, ServiceKind};

#[derive(Parser, Debug)]
#[command(name = "svcwarden")]
#[command(about = "Manage this process as a native system service")]
#[command(version)]
struct Cli {
    /// Service name; must match the executable file name
    #[arg(long, default_value = "svcwarden", env = "SVCWARDEN_NAME", global = true)]
    name: String,

    /// Description written into the generated service config
    #[arg(
        long,
        default_value = "Svcwarden echo service",
        env = "SVCWARDEN_DESCRIPTION",
        global = true
    )]
    description: String,

    /// Register as a per-user service instead of a system daemon
    #[arg(long, global = true)]
    user: bool,

    /// Service that must be up before this one (repeatable)
    #[arg(long = "requires", value_name = "SERVICE", global = true)]
    dependencies: Vec<String>,

    /// TCP port the echo service listens on
    #[arg(long, default_value_t = 9977, env = "SVCWARDEN_PORT", global = true)]
    port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "SVCWARDEN_LOG_LEVEL", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register the service with the native service manager
    Install {
        /// Extra arguments appended to the service invocation
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Unregister the service and delete its config
    Remove,
    /// Start the registered service
    Start,
    /// Stop the running service
    Stop,
    /// Report the current service state
    Status {
        /// Emit machine-readable JSON instead of the status line
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let kind = if cli.user {
        ServiceKind::UserAgent
    } else {
        ServiceKind::SystemDaemon
    };
    let descriptor = ServiceDescriptor::new(&cli.name, &cli.description, kind)
        .with_dependencies(cli.dependencies.clone());

    let command = match cli.command {
        Some(command) => command,
        // No subcommand: this is the supervised process itself.
        None => return run_echo(cli.port).await,
    };

    let service = new_service(descriptor)?;
    let outcome = match command {
        Commands::Install { args } => service.install(&args),
        Commands::Remove => service.remove(),
        Commands::Start => service.start(),
        Commands::Stop => service.stop(),
        Commands::Status { json } => {
            if json {
                let state = service.state()?;
                println!("{}", serde_json::to_string_pretty(&state)?);
                return Ok(());
            }
            service.status()
        }
    };

    match outcome {
        Ok(line) => {
            println!("{line}");
            Ok(())
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    }
}

async fn run_echo(port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("cannot bind echo listener on port {port}"))?;
    info!(port, "echo service listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "client connected");
                        tokio::spawn(echo_client(stream));
                    }
                    Err(err) => error!(%err, "accept failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt, shutting down");
                break;
            }
        }
    }
    Ok(())
}

async fn echo_client(mut stream: tokio::net::TcpStream) {
    let mut buf = vec![0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if stream.write_all(&buf[..n]).await.is_err() {
                    return;
                }
            }
        }
    }
}
