pub mod api;
pub mod bus;
pub mod config;
pub mod consumer;
pub mod db;
pub mod error;
pub mod event;
pub mod market;
pub mod publisher;
pub mod reserve;
pub mod watcher;
