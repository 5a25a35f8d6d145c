use std::path::Path;

use chartbook_core::auth::StaticTokenProvider;
use chartbook_core::models::{ConflictRemote, SyncConflict};
use chartbook_core::sync::{AlwaysOnline, HttpSyncTransport, SyncManager, SyncOutcome};
use chartbook_core::CatalogService;
use serde::Serialize;

use super::common;
use crate::cli::SyncCommands;
use crate::cli_config::CliConfig;
use crate::error::CliError;

pub async fn run(
    db_path: &Path,
    command: Option<SyncCommands>,
    trace: bool,
) -> Result<(), CliError> {
    match command {
        None => run_cycle(db_path, trace).await,
        Some(SyncCommands::Status) => run_status(db_path).await,
        Some(SyncCommands::Conflicts { json }) => run_conflicts(db_path, json).await,
        Some(SyncCommands::Resolve {
            id,
            keep_local,
            accept_remote,
        }) => run_resolve(db_path, &id, keep_local, accept_remote).await,
        Some(SyncCommands::Repair { older_than }) => run_repair(db_path, older_than).await,
        Some(SyncCommands::Reset { hard }) => run_reset(db_path, hard).await,
    }
}

fn build_manager(
    service: CatalogService,
    config: &CliConfig,
) -> Result<SyncManager<HttpSyncTransport, StaticTokenProvider, AlwaysOnline>, CliError> {
    let Some(server_url) = config.resolved_server_url() else {
        return Err(CliError::SyncNotConfigured);
    };
    tracing::info!("Syncing against {server_url}");

    let transport = HttpSyncTransport::new(server_url)?;
    let tokens = StaticTokenProvider::new(config.resolved_token());
    Ok(SyncManager::new(service, transport, tokens, AlwaysOnline))
}

async fn run_cycle(db_path: &Path, trace: bool) -> Result<(), CliError> {
    let service = common::open_service(db_path).await?;
    let config = CliConfig::load()?;
    let manager = build_manager(service, &config)?;

    let outcome = manager.force_sync().await;

    if trace {
        for entry in manager.trace() {
            println!("{}  {}", entry.at.format("%H:%M:%S%.3f"), entry.message);
        }
        println!();
    }

    match outcome {
        SyncOutcome::Completed { pushed, pulled } => {
            println!("Sync complete: pushed {pushed}, pulled {pulled}");
            Ok(())
        }
        SyncOutcome::Offline => {
            println!("Offline; nothing synced.");
            Ok(())
        }
        SyncOutcome::AlreadyRunning => {
            println!("A sync cycle is already running.");
            Ok(())
        }
        SyncOutcome::Failed { message, .. } => Err(CliError::SyncFailed(message)),
    }
}

async fn run_status(db_path: &Path) -> Result<(), CliError> {
    let service = common::open_service(db_path).await?;
    let state = service.load_sync_state().await?;
    let counts = service.outbox_counts().await?;
    let conflicts = service.list_conflicts().await?;

    println!(
        "Last sync:   {}",
        state.last_sync_at.map_or_else(
            || "never".to_string(),
            |at| at.format("%Y-%m-%d %H:%M UTC").to_string()
        )
    );
    println!(
        "Cursor:      {}",
        state.last_cursor.as_deref().unwrap_or("(none)")
    );
    if let (Some(id), Some(mode)) = (&state.last_sync_id, &state.last_sync_mode) {
        println!("Last cycle:  {id} ({mode})");
    }
    if let Some(error) = &state.last_error {
        println!("Last error:  {error}");
    }

    println!("\nOutbox:");
    for (status, count) in &counts {
        println!("  {status:<9} {count}");
    }

    if conflicts.is_empty() {
        println!("\nNo unresolved conflicts.");
    } else {
        println!(
            "\n{} unresolved conflict(s). See `chartbook sync conflicts`.",
            conflicts.len()
        );
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ConflictListItem {
    id: String,
    entity_type: String,
    entity_id: String,
    remote: &'static str,
    created_at: String,
}

fn remote_kind(conflict: &SyncConflict) -> &'static str {
    match conflict.remote_snapshot {
        Some(ConflictRemote::Upsert { .. }) => "remote edit",
        Some(ConflictRemote::Delete { .. }) => "remote delete",
        None => "rejected push",
    }
}

async fn run_conflicts(db_path: &Path, json: bool) -> Result<(), CliError> {
    let service = common::open_service(db_path).await?;
    let conflicts = service.list_conflicts().await?;

    if json {
        let items: Vec<_> = conflicts
            .iter()
            .map(|conflict| ConflictListItem {
                id: conflict.id.to_string(),
                entity_type: conflict.entity_type.as_str().to_string(),
                entity_id: conflict.entity_id.to_string(),
                remote: remote_kind(conflict),
                created_at: conflict.created_at.to_rfc3339(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No unresolved conflicts.");
        return Ok(());
    }

    for conflict in &conflicts {
        println!(
            "{}  {:<12} {}  {}",
            common::short_id(&conflict.id.to_string()),
            conflict.entity_type.as_str(),
            common::short_id(&conflict.entity_id.to_string()),
            remote_kind(conflict)
        );
    }
    println!("\nResolve with `chartbook sync resolve <id> --keep-local` or `--accept-remote`.");
    Ok(())
}

async fn run_resolve(
    db_path: &Path,
    id: &str,
    keep_local: bool,
    accept_remote: bool,
) -> Result<(), CliError> {
    if keep_local == accept_remote {
        return Err(CliError::NoResolutionChosen);
    }

    let service = common::open_service(db_path).await?;
    let conflict = find_conflict(&service, id).await?;

    if keep_local {
        service.resolve_keep_local(&conflict.id).await?;
        println!(
            "Kept local copy of {} {}; it will push on the next sync.",
            conflict.entity_type.as_str(),
            common::short_id(&conflict.entity_id.to_string())
        );
    } else {
        service.resolve_accept_remote(&conflict.id).await?;
        println!(
            "Accepted remote copy of {} {}.",
            conflict.entity_type.as_str(),
            common::short_id(&conflict.entity_id.to_string())
        );
    }
    Ok(())
}

/// Match a conflict by full ID or unique ID prefix over the unresolved set.
async fn find_conflict(service: &CatalogService, query: &str) -> Result<SyncConflict, CliError> {
    let query = common::normalize_identifier(query)?;
    let conflicts = service.list_conflicts().await?;

    let mut matches = conflicts
        .into_iter()
        .filter(|conflict| conflict.id.to_string().starts_with(&query));

    let Some(first) = matches.next() else {
        return Err(chartbook_core::Error::NotFound(query).into());
    };
    if matches.next().is_some() {
        return Err(chartbook_core::Error::InvalidInput(format!(
            "Conflict ID prefix '{query}' is ambiguous"
        ))
        .into());
    }
    Ok(first)
}

async fn run_repair(db_path: &Path, older_than_minutes: i64) -> Result<(), CliError> {
    let service = common::open_service(db_path).await?;
    let requeued = service
        .requeue_stale_sent(chrono::Duration::minutes(older_than_minutes))
        .await?;

    if requeued == 0 {
        println!("Nothing to repair.");
    } else {
        println!("Requeued {requeued} stuck item(s); they will push on the next sync.");
    }
    Ok(())
}

async fn run_reset(db_path: &Path, hard: bool) -> Result<(), CliError> {
    let service = common::open_service(db_path).await?;
    let purged = service.reset_sync(hard).await?;

    if hard {
        println!("Cursor cleared; purged {purged} clean synced row(s). Next sync pulls everything.");
    } else {
        println!("Cursor cleared. Next sync pulls everything from the start.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_server_url_refuses_to_build_a_manager() {
        let service = CatalogService::open_in_memory("device-test").await.unwrap();
        let result = build_manager(service, &CliConfig::default());
        assert!(matches!(result, Err(CliError::SyncNotConfigured)));
    }

    #[tokio::test]
    async fn configured_server_url_builds_a_manager() {
        let service = CatalogService::open_in_memory("device-test").await.unwrap();
        let config = CliConfig {
            server_url: Some("https://sync.chartbook.example.com".to_string()),
            token: Some("secret".to_string()),
            ..CliConfig::default()
        };
        assert!(build_manager(service, &config).is_ok());
    }
}
