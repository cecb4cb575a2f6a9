//! Command execution
//!
//! Each subcommand runs against one freshly built [`App`]. Failures are
//! relayed to the notification channel before they reach `main`.

use crate::app::App;
use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::http;
use crate::webdav;
use crate::logging::init_logger;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chanfs_core::transfer::WriterSink;
use chanfs_core::{ChangeHandler, ChangeListener, ChannelPost, StoreChange};
use std::sync::Arc;
use tracing::{debug, info};

/// Load configuration, initialise logging and run the selected command
pub async fn run(cli: Cli) -> Result<()> {
    let path = cli.config_path();
    let mut config = AppConfig::load(&path)?;
    cli.apply_overrides(&mut config);
    init_logger(&config.logger);
    info!("Loaded configuration from {}", path.display());

    let app = App::build(config).await?;
    let result = execute(&app, cli.command).await;
    if let Err(e) = &result {
        tracing::error!("{:#}", e);
        app.notify(e).await;
    }
    result
}

async fn execute(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Serve { .. } => serve(app).await,
        Commands::Upload { local, remote } => {
            let file = tokio::fs::File::open(&local)
                .await
                .with_context(|| format!("Failed to open {}", local.display()))?;
            let node = app.files.upload(&remote, file).await?;
            info!("Uploaded {} to {} ({} bytes)", local.display(), remote, node.size());
            Ok(())
        }
        Commands::Download {
            remote,
            local,
            start,
            end,
        } => {
            let node = app.files.resolve_file(&remote).await?;
            let range = app.files.resolve_range(&node, start, end)?;
            let file = tokio::fs::File::create(&local)
                .await
                .with_context(|| format!("Failed to create {}", local.display()))?;
            let mut sink = WriterSink::new(file);
            let written = app.files.read_node_content(&node, range, &mut sink).await?;
            info!("Downloaded {} to {} ({} bytes)", remote, local.display(), written);
            Ok(())
        }
        Commands::Mkdir { path } => {
            let folder = app.tree.resolver().create_folder_recursive(&path, false).await?;
            info!("Folder {} ready ({})", path, folder.id);
            Ok(())
        }
        Commands::Ls { path } => {
            for node in app.tree.list_dir(&path).await? {
                let marker = if node.is_folder() { "/" } else { "" };
                println!("{:>12}  {}  {}{}", node.size(), node.id, node.filename, marker);
            }
            Ok(())
        }
        Commands::Copy { from, to } => {
            let node = app.tree.copy_node(&from, &to).await?;
            info!("Copied {} to {}", from, app.tree.resolver().build_path(&node).await?);
            Ok(())
        }
        Commands::Move { from, to } => {
            let node = app.tree.move_node(&from, &to).await?;
            info!("Moved {} to {}", from, app.tree.resolver().build_path(&node).await?);
            Ok(())
        }
        Commands::Delete { path, simulate } => {
            let report = app.tree.delete(&path, simulate).await?;
            info!(
                "Delete of {} finished: {} succeeded, {} failed{}",
                path,
                report.succeeded,
                report.failed,
                if report.simulated { " (simulated)" } else { "" }
            );
            if !report.is_success() {
                anyhow::bail!("{} item(s) could not be deleted", report.failed);
            }
            Ok(())
        }
        Commands::Purge { id } => {
            let removed = app.tree.purge(&id).await?;
            info!("Purged {} record(s)", removed);
            Ok(())
        }
        Commands::Ingest {
            channel,
            message_id,
            filename,
            mime,
        } => ingest(app, channel, message_id, filename, mime).await,
    }
}

/// Look up a channel message and record it as a file
pub async fn ingest(
    app: &App,
    channel: String,
    message_id: i64,
    filename: String,
    mime: Option<String>,
) -> Result<()> {
    let media = app
        .ctx
        .clients()
        .next_client(true)
        .fetch_media(&channel, message_id)
        .await?
        .with_context(|| format!("Message {} in {} has no document", message_id, channel))?;

    let post = ChannelPost {
        channel,
        message_id,
        filename,
        blob_id: media.blob_id,
        size: media.size,
        mime,
    };
    match app.tree.register_channel_post(post).await? {
        Some(node) => info!(
            "Registered '{}' at {}",
            node.filename,
            app.tree.resolver().build_path(&node).await?
        ),
        None => info!("Message {} is already part of a file", message_id),
    }
    Ok(())
}

async fn serve(app: &App) -> Result<()> {
    let mut listener = ChangeListener::new();
    listener.register(Arc::new(ChangeLog));
    let feed = listener.spawn(app.ctx.store());

    let api = http::start_server(app.http_state(), &app.config.http.host, app.config.http.port);
    let result = if app.config.webdav.enabled {
        let dav = &app.config.webdav;
        let share = webdav::start_server(
            app.dav_filesystem(),
            dav.credentials(),
            &dav.host,
            dav.port,
        );
        tokio::try_join!(api, share).map(|_| ())
    } else {
        api.await
    };
    feed.abort();
    result
}

/// Logs every committed change
struct ChangeLog;

#[async_trait]
impl ChangeHandler for ChangeLog {
    async fn handle(&self, change: &StoreChange) -> Result<()> {
        debug!(
            "{} {} '{}' ({})",
            change.event_type(),
            change.node.id,
            change.node.filename,
            change.node.state
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "change-log"
    }
}
