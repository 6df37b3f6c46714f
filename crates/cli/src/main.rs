//! cartsync CLI - inspect and change the cart from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Show the current cart (bootstraps an anonymous session on first use)
//! cartsync show
//!
//! # Add two units of a product
//! cartsync add 8f6c2a38-7f0e-4a55-9d1e-0b1f9a8f6d11 -q 2
//!
//! # Set a product's quantity, refusing anything above 5
//! cartsync set 8f6c2a38-7f0e-4a55-9d1e-0b1f9a8f6d11 4 --stock 5
//!
//! # Sign in with a bearer token, then sign out again
//! cartsync login "$TOKEN"
//! cartsync logout
//! ```
//!
//! # Environment Variables
//!
//! - `CART_API_BASE_URL` - Cart API base URL (required)
//! - `CART_STORAGE_PATH` - Identity file (default: `.cartsync.json`)
//! - `SENTRY_DSN` - Optional error tracking
//!
//! See `cartsync_client::config` for the rest.

#![cfg_attr(not(test), forbid(unsafe_code))]

use cartsync_client::CartClientConfig;
use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "cartsync")]
#[command(author, version, about = "Cart synchronization client")]
struct Cli {
    /// Print carts as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current cart
    Show,
    /// Show the cart summary
    Summary,
    /// Add units of a product
    Add {
        /// Product ID
        product: String,

        /// Units to add
        #[arg(short, long, default_value_t = 1)]
        quantity: u32,
    },
    /// Set a product's quantity (0 removes it)
    Set {
        /// Product ID
        product: String,

        /// Target quantity
        #[arg(allow_negative_numbers = true)]
        quantity: i64,

        /// Known available stock; larger targets are refused locally
        #[arg(long)]
        stock: Option<u32>,
    },
    /// Remove a cart line
    Remove {
        /// Cart item ID
        item: String,
    },
    /// Remove every line
    Clear,
    /// Store a bearer token
    Login {
        /// Access token
        token: String,
    },
    /// Forget the bearer token and the anonymous session
    Logout,
    /// Show which identity requests are sent with
    Whoami,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &CartClientConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    // Defaults to info level for our crates if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cartsync_cli=info,cartsync_client=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Configuration is loaded before tracing so Sentry can be initialized first
    let config = CartClientConfig::from_env();
    let _sentry_guard = config.as_ref().ok().and_then(init_sentry);
    init_tracing();

    let result = match config {
        Ok(config) => run(cli, config).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: CartClientConfig) -> Result<(), commands::CommandError> {
    let ctx = commands::Context::new(config, cli.json)?;

    match cli.command {
        Commands::Show => commands::cart::show(&ctx).await,
        Commands::Summary => commands::cart::summary(&ctx).await,
        Commands::Add { product, quantity } => commands::cart::add(&ctx, &product, quantity).await,
        Commands::Set {
            product,
            quantity,
            stock,
        } => commands::cart::set(&ctx, &product, quantity, stock).await,
        Commands::Remove { item } => commands::cart::remove(&ctx, &item).await,
        Commands::Clear => commands::cart::clear(&ctx).await,
        Commands::Login { token } => commands::session::login(&ctx, token),
        Commands::Logout => commands::session::logout(&ctx),
        Commands::Whoami => {
            commands::session::whoami(&ctx);
            Ok(())
        }
    }
}
