mod backfill;
mod client;
mod config;

pub use backfill::{backfill_addresses, refresh_addresses};
pub use client::HttpAddressValidator;
