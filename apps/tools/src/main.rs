use anyhow::Result;
use clap::{Parser, Subcommand};
use storage::Storage;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "Operator commands for the talk review database")]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/review.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Creates a reviewer, or updates the name and role of an existing email.
    CreateReviewer {
        email: String,
        full_name: String,
        #[arg(long)]
        admin: bool,
    },
    /// Prints the stored vote phase. Changing it is an administrator action
    /// on the running server.
    ShowPhase,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url).await?;

    match cli.command {
        Command::CreateReviewer {
            email,
            full_name,
            admin,
        } => {
            let reviewer_id = storage.create_reviewer(&email, &full_name, admin).await?;
            info!(reviewer_id = reviewer_id.0, %email, admin, "reviewer saved");
            println!("reviewer_id={} admin={admin}", reviewer_id.0);
        }
        Command::ShowPhase => {
            println!("{}", storage.load_vote_phase().await?);
        }
    }

    Ok(())
}
