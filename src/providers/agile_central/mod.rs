mod client;
mod provider;
pub mod types;

pub use client::AgileCentralClient;
pub use provider::AgileCentralProvider;
