pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod registry;
pub mod server;
pub mod template;
