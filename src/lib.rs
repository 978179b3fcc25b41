pub mod aliases;
pub mod command_handler;
pub mod commands;
pub mod config;
pub mod config_watcher;
pub mod error;
pub mod http_server;
pub mod permissions;
