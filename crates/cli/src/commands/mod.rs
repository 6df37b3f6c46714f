//! CLI subcommands.

pub mod cart;
pub mod session;

use std::path::PathBuf;

use cartsync_client::{
    CartClientConfig, CartError, CartService, ConfigError, IdentityError, IdentityStore, Transport,
};
use thiserror::Error;

/// Identity file used when `CART_STORAGE_PATH` is not set.
const DEFAULT_STORAGE_PATH: &str = ".cartsync.json";

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A cart operation failed.
    #[error(transparent)]
    Cart(#[from] CartError),

    /// The identity store failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// A cart could not be rendered.
    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

/// Everything a command needs.
pub struct Context {
    pub config: CartClientConfig,
    pub service: CartService,
    pub json: bool,
}

impl Context {
    /// Build the client stack from configuration.
    pub fn new(mut config: CartClientConfig, json: bool) -> Result<Self, CommandError> {
        config
            .storage_path
            .get_or_insert_with(|| PathBuf::from(DEFAULT_STORAGE_PATH));

        let identity = IdentityStore::from_config(&config)?;
        let transport = Transport::new(&config, identity)?;

        Ok(Self {
            service: CartService::new(transport),
            config,
            json,
        })
    }

    pub fn identity(&self) -> &IdentityStore {
        self.service.transport().identity()
    }
}
