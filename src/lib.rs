pub mod api;
pub mod core;
pub mod monitoring;
pub mod server;
