//! Command line interface

use crate::config::AppConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "chanfs", version, about = "Filesystem hosted on messaging channels")]
pub struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short = 'f', long, global = true)]
    pub config: Option<PathBuf>,

    /// Data folder for the local database
    #[arg(short, long, global = true)]
    pub data: Option<PathBuf>,

    /// Log level, e.g. `debug` or `chanfs_core=trace`
    #[arg(long, global = true)]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(long)]
        http_user: Option<String>,
        #[arg(long)]
        http_pass: Option<String>,
        /// Also serve the tree over WebDAV
        #[arg(long)]
        webdav: bool,
        #[arg(long)]
        webdav_port: Option<u16>,
    },
    /// Upload a local file to a remote path
    Upload { local: PathBuf, remote: String },
    /// Download a remote file, optionally a byte range of it
    Download {
        remote: String,
        local: PathBuf,
        #[arg(long)]
        start: Option<u64>,
        #[arg(long, requires = "start")]
        end: Option<u64>,
    },
    /// Create a folder and any missing parents
    Mkdir { path: String },
    /// List a folder
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    Copy { from: String, to: String },
    Move { from: String, to: String },
    /// Delete a file or folder, removing hosted messages
    Delete {
        path: String,
        /// Log what would be deleted without changing anything
        #[arg(long)]
        simulate: bool,
    },
    /// Permanently remove a deleted record by id
    Purge { id: String },
    /// Register a document posted directly to a channel
    Ingest {
        channel: String,
        message_id: i64,
        filename: String,
        #[arg(long)]
        mime: Option<String>,
    },
}

impl Cli {
    /// Apply command line overrides on top of the loaded file
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(data) = &self.data {
            config.data = Some(data.clone());
        }
        if let Some(log) = &self.log {
            config.logger = log.clone();
        }
        if let Commands::Serve {
            host,
            port,
            http_user,
            http_pass,
            webdav,
            webdav_port,
        } = &self.command
        {
            if let Some(host) = host {
                config.http.host = host.clone();
            }
            if let Some(port) = port {
                config.http.port = *port;
            }
            if http_user.is_some() {
                config.http.user = http_user.clone();
            }
            if http_pass.is_some() {
                config.http.pass = http_pass.clone();
            }
            if *webdav {
                config.webdav.enabled = true;
            }
            if let Some(port) = webdav_port {
                config.webdav.port = *port;
            }
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(AppConfig::default_path)
    }
}
