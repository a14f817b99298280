mod client;
mod provider;
pub mod types;

pub use client::BambooClient;
pub use provider::BambooProvider;
