//! chanfs server
//!
//! Configuration loading, logging, the HTTP and WebDAV surfaces and the
//! command line tools built on `chanfs-core`.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod http;
pub mod logging;
pub mod webdav;

pub use app::App;
pub use config::AppConfig;
