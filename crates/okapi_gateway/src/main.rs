// Okapi Gateway
//
// Local SSO-authenticated proxy in front of the API gateway

use clap::{Parser, Subcommand};
use okapi_gateway::{launcher, start_server, GatewayConfig, LaunchArgs, ServerArgs};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "okapi-gateway", version, about = "Local SSO-authenticated API gateway proxy")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the server in the foreground
    Serve(ServerArgs),
    /// Start the server as a detached background process
    Launch(LaunchArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => {
            let config = GatewayConfig::from_args(&args)?;
            start_server(config).await?;
            // Stop was requested; in-flight requests are abandoned
            std::process::exit(0);
        }
        Commands::Launch(args) => {
            let message = launcher::launch(&args)?;
            println!("{}", message);
        }
    }

    Ok(())
}
