//! Helpers shared by the command modules.

use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use chartbook_core::models::{EntityType, SectionNote, Song, SongId, SongVersion, VersionId};
use chartbook_core::CatalogService;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli_config::CliConfig;
use crate::error::CliError;

pub const SHORT_ID_LEN: usize = 13;

/// Open the catalog service at `db_path` with this installation's device id.
pub async fn open_service(db_path: &Path) -> Result<CatalogService, CliError> {
    let mut config = CliConfig::load()?;
    let device_id = config.resolved_device_id()?;
    tracing::debug!("Opening catalog at {}", db_path.display());
    Ok(CatalogService::open_path(db_path, device_id).await?)
}

pub async fn resolve_song(service: &CatalogService, query: &str) -> Result<Song, CliError> {
    let query = normalize_identifier(query)?;
    let id = SongId::from(service.resolve_id(EntityType::Song, &query).await?);
    service
        .get_song(&id)
        .await?
        .ok_or_else(|| chartbook_core::Error::NotFound(query).into())
}

pub async fn resolve_version(
    service: &CatalogService,
    query: &str,
) -> Result<SongVersion, CliError> {
    let query = normalize_identifier(query)?;
    let id = VersionId::from(service.resolve_id(EntityType::SongVersion, &query).await?);
    service
        .get_version(&id)
        .await?
        .ok_or_else(|| chartbook_core::Error::NotFound(query).into())
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn normalize_text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

// List rendering

#[derive(Debug, Serialize)]
pub struct SongListItem {
    pub id: String,
    pub title: String,
    pub artist: Option<String>,
    pub default_key: Option<String>,
    pub tempo_bpm: Option<u32>,
    pub dirty: bool,
    pub synced: bool,
    pub updated_at: DateTime<Utc>,
}

pub fn song_to_list_item(song: &Song) -> SongListItem {
    SongListItem {
        id: song.id.to_string(),
        title: song.title.clone(),
        artist: song.artist.clone(),
        default_key: song.default_key.clone(),
        tempo_bpm: song.tempo_bpm,
        dirty: song.dirty,
        synced: !song.is_local_only(),
        updated_at: song.updated_at,
    }
}

pub fn format_song_lines(songs: &[Song]) -> Vec<String> {
    songs
        .iter()
        .map(|song| {
            let id = short_id(&song.id.to_string());
            let marker = sync_marker(song.dirty, song.is_local_only());
            let artist = song.artist.as_deref().unwrap_or("-");
            let key = song.default_key.as_deref().unwrap_or("-");
            format!("{id:<13}  {marker}  {:<32}  {artist:<20}  {key}", song.title)
        })
        .collect()
}

pub fn format_version_lines(versions: &[SongVersion]) -> Vec<String> {
    versions
        .iter()
        .map(|version| {
            let id = short_id(&version.id.to_string());
            let marker = sync_marker(version.dirty, version.is_local_only());
            let key = version.key.as_deref().unwrap_or("-");
            let capo = version
                .capo
                .map_or_else(|| "-".to_string(), |capo| capo.to_string());
            format!(
                "{id:<13}  {marker}  {:<24}  key {key:<4} capo {capo}",
                version.name
            )
        })
        .collect()
}

pub fn format_note_lines(notes: &[SectionNote]) -> Vec<String> {
    notes
        .iter()
        .map(|note| {
            let id = short_id(&note.id.to_string());
            let marker = sync_marker(note.dirty, note.is_local_only());
            format!("{id:<13}  {marker}  [{}]  {}", note.section, note.body)
        })
        .collect()
}

/// Two-character sync state marker: `*` dirty, `+` never pushed.
pub const fn sync_marker(dirty: bool, local_only: bool) -> &'static str {
    match (dirty, local_only) {
        (true, true) => "*+",
        (true, false) => "* ",
        (false, true) => " +",
        (false, false) => "  ",
    }
}

// Editor capture, for chart bodies

pub fn capture_editor_input_with_initial(initial_content: &str) -> Result<Option<String>, CliError> {
    let editor = preferred_editor();
    let temp_file = create_temp_chart_file_path();
    std::fs::write(&temp_file, initial_content)?;

    let launch_result = launch_editor(&editor, &temp_file);
    let body = std::fs::read_to_string(&temp_file)?;
    let _ = std::fs::remove_file(&temp_file);

    launch_result?;
    Ok(normalize_text(&body))
}

fn launch_editor(editor: &str, file_path: &Path) -> Result<(), CliError> {
    match Command::new(editor).arg(file_path).status() {
        Ok(status) => {
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            // Fallback for editor commands with args, e.g. "code --wait"
            let mut parts = editor.split_whitespace();
            let Some(program) = parts.next() else {
                return Err(CliError::EditorFailed("empty EDITOR command".into()));
            };

            let mut command = Command::new(program);
            command.args(parts).arg(file_path);

            let status = command.status()?;
            if status.success() {
                Ok(())
            } else {
                Err(CliError::EditorFailed(format!(
                    "`{editor}` exited with status {status}"
                )))
            }
        }
        Err(err) => Err(CliError::Io(err)),
    }
}

fn preferred_editor() -> String {
    env::var("VISUAL")
        .or_else(|_| env::var("EDITOR"))
        .unwrap_or_else(|_| default_editor().to_string())
}

const fn default_editor() -> &'static str {
    if cfg!(windows) {
        "notepad"
    } else {
        "vi"
    }
}

fn create_temp_chart_file_path() -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    env::temp_dir().join(format!("chartbook-chart-{}-{now}.txt", std::process::id()))
}
