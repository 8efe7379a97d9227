pub mod clients;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fanout;
pub mod models;
pub mod utils;
