pub mod config;
pub mod consumer;
pub mod display;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod models;
pub mod query;
pub mod storage;
pub mod utils;
