//! TCP front end for the Dimensions proxy.
//!
//! Accepts game clients, binds each one to the default dimension, and pumps
//! frames between the client and its current backend while chat commands move
//! it between backends.

pub mod error;
pub mod link;
pub mod server;

pub use error::ServerError;
pub use link::connect_backend;
pub use server::{ConnectionMap, IdGenerator, ProxyConfig, ProxyServer, build_directory};
