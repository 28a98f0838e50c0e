pub mod channel;
pub mod config;
pub mod display;
pub mod models;
pub mod services;
pub mod sim;
pub mod utils;
