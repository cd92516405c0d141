//! Command-line client for Atelier.

mod api_client;

use anyhow::{Context, Result};
use api_client::ApiClient;
use atelier_core::asset::{ReserveAssetRequest, entity_topic};
use atelier_core::{AssetId, AssetRecord, AssetState, EntityId};
use atelier_realtime::{ChannelStatus, Entry, HttpChangeSource, MergedView, Reconciler};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;

/// Pause before resubscribing after the live feed closed.
const RESYNC_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "atelierctl")]
#[command(about = "Command-line client for Atelier")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    api: ApiArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ApiArgs {
    /// Server API URL
    #[arg(
        long,
        env = "ATELIER_SERVER",
        default_value = "http://127.0.0.1:8080",
        global = true
    )]
    server: String,

    /// Bearer token
    #[arg(long, env = "ATELIER_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reserve, transfer and confirm a file
    Upload {
        file: PathBuf,
        /// Parent entity to attach the asset to
        #[arg(long)]
        entity: Option<String>,
        /// Content type (guessed from the extension when omitted)
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Attach an uploaded asset to a parent entity
    Attach { asset_id: String, entity_id: String },
    /// Delete an asset
    Delete { asset_id: String },
    /// Show an asset record
    Show { asset_id: String },
    /// Register a parent entity
    RegisterEntity { entity_id: String },
    /// Delete a parent entity and every attached asset
    DeleteEntity { entity_id: String },
    /// Follow the assets of a parent entity live
    Watch { entity_id: String },
    /// Run a reclamation pass now (elevated)
    Reclaim,
    /// Check server health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let Cli { api, command } = Cli::parse();
    let client = ApiClient::new(&api.server, api.token.as_deref())?;

    match command {
        Commands::Upload {
            file,
            entity,
            content_type,
        } => handle_upload(&client, &file, entity, content_type).await,
        Commands::Attach {
            asset_id,
            entity_id,
        } => {
            let response = client.attach(parse_asset_id(&asset_id)?, &entity_id).await?;
            println!("Attached {} to {}", response.record.id, entity_id);
            Ok(())
        }
        Commands::Delete { asset_id } => {
            let response = client.delete(parse_asset_id(&asset_id)?).await?;
            println!("Deleted {}", response.asset_id);
            if !response.content_deleted {
                eprintln!("Warning: content object was left behind; the reclaimer will remove it");
            }
            Ok(())
        }
        Commands::Show { asset_id } => {
            let response = client.get(parse_asset_id(&asset_id)?).await?;
            print_record(&response.record);
            Ok(())
        }
        Commands::RegisterEntity { entity_id } => {
            let entity = client.register_entity(&entity_id).await?;
            println!("Registered entity {} (owner {})", entity.id, entity.owner_id);
            Ok(())
        }
        Commands::DeleteEntity { entity_id } => {
            let response = client.delete_entity(&entity_id).await?;
            println!(
                "Deleted entity {} with {} asset(s)",
                entity_id, response.assets_deleted
            );
            if response.content_delete_failures > 0 {
                eprintln!(
                    "Warning: {} content object(s) were left behind",
                    response.content_delete_failures
                );
            }
            Ok(())
        }
        Commands::Watch { entity_id } => handle_watch(&client, &api, &entity_id).await,
        Commands::Reclaim => {
            let stats = client.reclaim().await?;
            println!("Orphans found:          {}", stats.orphans_found);
            println!("Orphans reclaimed:      {}", stats.orphans_reclaimed);
            println!("Stray objects deleted:  {}", stats.stray_objects_deleted);
            println!("Content delete failures: {}", stats.content_delete_failures);
            Ok(())
        }
        Commands::Health => {
            let health = client.health().await?;
            println!("Status: {}", health.status);
            println!("Server version: {}", health.version);
            println!("Metadata healthy: {}", health.metadata.healthy);
            println!(
                "Storage healthy: {} ({})",
                health.storage.healthy,
                health.storage.backend.as_deref().unwrap_or("unknown")
            );
            Ok(())
        }
    }
}

fn parse_asset_id(raw: &str) -> Result<AssetId> {
    AssetId::parse(raw).with_context(|| format!("invalid asset id: {raw}"))
}

async fn handle_upload(
    client: &ApiClient,
    file: &Path,
    entity: Option<String>,
    content_type: Option<String>,
) -> Result<()> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("path has no file name")?;
    let content_type = content_type.unwrap_or_else(|| guess_content_type(file).to_string());

    let request = ReserveAssetRequest {
        filename,
        content_type,
        size_bytes: data.len() as u64,
        parent_entity_id: entity,
    };
    let reserved = client
        .reserve_with_retry(&request)
        .await
        .context("reservation failed")?;
    eprintln!("Reserved {} ({} bytes)", reserved.asset_id, request.size_bytes);

    client
        .transfer(&reserved.write_grant, data)
        .await
        .context("transfer failed; the reservation will be reclaimed")?;

    let confirmed = client
        .confirm(reserved.asset_id)
        .await
        .context("confirmation failed")?;
    if confirmed.replayed {
        eprintln!("Asset was already confirmed");
    }
    print_record(&confirmed.record);
    Ok(())
}

/// Content type for well-known media extensions.
fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

async fn handle_watch(client: &ApiClient, api: &ApiArgs, entity_id: &str) -> Result<()> {
    let entity = EntityId::parse(entity_id)?;
    // Shown while the feed connects; replaced by a fresh read once it is live.
    let snapshot = client.entity_assets(entity_id).await?;
    let source = HttpChangeSource::new(&api.server, api.token.clone())?;
    let handle = Reconciler::spawn(source, entity_topic(&entity), snapshot.assets);

    let mut view_rx = handle.subscribe_view();
    let mut status_rx = handle.subscribe_status();
    print_view(&handle.view());

    loop {
        tokio::select! {
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view_rx.borrow_and_update().clone();
                print_view(&view);
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status_rx.borrow_and_update().clone();
                print_status(&status);
                match status {
                    // Read the snapshot only once the stream is open, so changes
                    // committed in between arrive as live events.
                    ChannelStatus::Connected => match client.entity_assets(entity_id).await {
                        Ok(snapshot) => handle.resync(snapshot.assets).await?,
                        Err(e) => eprintln!("Resync failed: {e:#}"),
                    },
                    ChannelStatus::Closed { .. } => {
                        tokio::time::sleep(RESYNC_BACKOFF).await;
                        handle.reconnect().await?;
                    }
                    ChannelStatus::Connecting => {}
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.close().await;
    Ok(())
}

fn print_status(status: &ChannelStatus) {
    match status {
        ChannelStatus::Connecting => eprintln!("[feed] connecting"),
        ChannelStatus::Connected => eprintln!("[feed] connected"),
        ChannelStatus::Closed { reason } => eprintln!("[feed] closed: {reason}"),
    }
}

fn print_view(view: &MergedView<AssetRecord>) {
    println!("--- {} asset(s) ---", view.len());
    for entry in view.entries() {
        match entry {
            Entry::Confirmed { entity } => println!("{}", record_line(entity)),
            Entry::Pending { temp_id, payload, .. } => {
                println!("{temp_id}  {:<9}  {}", "pending", payload.filename)
            }
        }
    }
}

fn record_line(record: &AssetRecord) -> String {
    format!(
        "{}  {:<9}  {:>10}  {}",
        record.id,
        state_label(record.state()),
        format_bytes(record.size_bytes),
        record.filename
    )
}

fn state_label(state: AssetState) -> &'static str {
    match state {
        AssetState::Reserved => "reserved",
        AssetState::Confirmed => "confirmed",
    }
}

fn print_record(record: &AssetRecord) {
    println!("Asset:        {}", record.id);
    println!("Owner:        {}", record.owner_id);
    println!(
        "Parent:       {}",
        record
            .parent_entity_id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string())
    );
    println!("Filename:     {}", record.filename);
    println!("Content type: {}", record.content_type);
    println!("Size:         {}", format_bytes(record.size_bytes));
    println!("Object key:   {}", record.object_key);
    println!("State:        {}", state_label(record.state()));
    println!("Created:      {}", format_timestamp(record.created_at));
    if let Some(confirmed_at) = record.confirmed_at {
        println!("Confirmed:    {}", format_timestamp(confirmed_at));
    }
}

fn format_timestamp(ts: time::OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string())
}

fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
