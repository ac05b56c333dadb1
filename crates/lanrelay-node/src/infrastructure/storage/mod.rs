//! Storage infrastructure: configuration and node identity persistence.
//!
//! - **`config`** – Reads and writes the TOML configuration file in the
//!   platform config directory, falling back to defaults on first run.
//! - **`identity`** – Generates the persistent node id once and reuses it
//!   across restarts.

pub mod config;
pub mod identity;
