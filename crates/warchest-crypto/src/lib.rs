//! Decryption support for encrypted container blocks.
//!
//! This crate provides:
//! - The process-wide ring of named 16-byte TACT keys, with import from the
//!   text and JSON shapes the ecosystem ships keys in
//! - The Salsa20 variant used by encrypted blocks (block-index-salted nonce)

pub mod error;
pub mod keyring;
pub mod salsa20;

pub use error::Error;
pub use keyring::KeyRing;

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, Error>;
