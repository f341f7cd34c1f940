pub mod api;
pub mod config;
pub mod realtime_client;
pub mod reconciler;
