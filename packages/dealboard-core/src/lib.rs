pub mod filter;
pub mod metrics;
pub mod realtime;
pub mod store;
pub mod types;
