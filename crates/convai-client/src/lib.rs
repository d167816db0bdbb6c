mod client;
pub mod types;

pub use client::config::{Config, ConfigBuilder};
pub use client::stats::Stats;
pub use client::consts::DEFAULT_CAPACITY;
pub use client::{Client, ClientTx, ConvaiConnection, ServerRx, connect, connect_with_config};
