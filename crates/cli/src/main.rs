//! Starshop CLI - database migrations, webhook and development tools.
//!
//! # Usage
//!
//! ```bash
//! # Run database migrations
//! starshop-cli migrate
//!
//! # Load categories and products from a YAML file
//! starshop-cli seed catalog -f catalog.yaml
//!
//! # Point the bot's webhook at the server
//! starshop-cli webhook set https://shop.example.com/api/payments/webhook
//!
//! # Produce init data for local testing against the API
//! starshop-cli init-data sign --telegram-id 123456789 --username alice
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "starshop-cli")]
#[command(author, version, about = "Starshop CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Seed the database
    Seed {
        #[command(subcommand)]
        target: SeedTarget,
    },
    /// Manage the bot's webhook registration
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },
    /// Mini App init data helpers
    InitData {
        #[command(subcommand)]
        action: InitDataAction,
    },
}

#[derive(Subcommand)]
enum SeedTarget {
    /// Insert categories and products from a YAML file
    Catalog {
        /// Path to the YAML catalog
        #[arg(short, long)]
        file: String,
    },
}

#[derive(Subcommand)]
enum WebhookAction {
    /// Register the webhook URL (uses `TELEGRAM_WEBHOOK_SECRET` if set)
    Set {
        /// Public HTTPS URL of the webhook route
        url: String,
    },
    /// Remove the webhook
    Delete,
}

#[derive(Subcommand)]
enum InitDataAction {
    /// Sign init data for a test user with `TELEGRAM_BOT_TOKEN`
    Sign {
        /// Telegram user id
        #[arg(long)]
        telegram_id: i64,

        /// Telegram username
        #[arg(long)]
        username: Option<String>,

        /// First name
        #[arg(long, default_value = "Test")]
        first_name: String,

        /// Unix time of signing (defaults to now)
        #[arg(long)]
        auth_date: Option<i64>,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Seed { target } => match target {
            SeedTarget::Catalog { file } => commands::seed::catalog(&file).await?,
        },
        Commands::Webhook { action } => match action {
            WebhookAction::Set { url } => commands::webhook::set(&url).await?,
            WebhookAction::Delete => commands::webhook::delete().await?,
        },
        Commands::InitData { action } => match action {
            InitDataAction::Sign {
                telegram_id,
                username,
                first_name,
                auth_date,
            } => {
                let signed = commands::init_data::sign(
                    telegram_id,
                    username.as_deref(),
                    &first_name,
                    auth_date,
                )?;
                #[allow(clippy::print_stdout)]
                {
                    println!("{signed}");
                }
            }
        },
    }
    Ok(())
}
