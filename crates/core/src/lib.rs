//! cartsync core - shared types library.
//!
//! This crate provides the types shared by every cartsync component:
//! - `client` - The cart synchronization engine (transport, service, optimistic controller)
//! - `cli` - Command-line front end over the engine
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no HTTP
//! clients, no storage. The server is the source of truth for every cart;
//! these types only describe what it last said.
//!
//! # Modules
//!
//! - [`types`] - Typed IDs, ownership identity, carts, summaries, and price normalization

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
