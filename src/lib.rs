mod routes;
mod server;
mod telemetry;

pub mod app;
pub mod chatbot;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod labels;
pub mod postprocess;
pub mod preprocess;
pub mod service;

pub use app::start_app;
