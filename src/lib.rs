pub mod types;
pub mod config;
pub mod data;
pub mod nearest;
pub mod vulnerability;
pub mod charts;
pub mod render;
pub mod server;
