use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;

#[derive(Parser)]
#[command(name = "appforge")]
#[command(version, about = "Prompt-to-APK app generation service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API server
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (CORS permissive for local frontend dev)
        #[arg(long)]
        dev: bool,
    },
    /// Generate and build a single app from the command line
    Generate {
        /// What the app should do
        prompt: String,

        /// Conversation id to continue (a fresh one is minted when omitted)
        #[arg(short, long)]
        user: Option<String>,

        /// Return as soon as the build is triggered instead of waiting for it
        #[arg(long)]
        no_wait: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    appforge::logging::init_from_env();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { port, dev } => cmd::cmd_serve(port, dev).await?,
        Commands::Generate {
            prompt,
            user,
            no_wait,
        } => cmd::cmd_generate(&prompt, user, no_wait).await?,
    }

    Ok(())
}
