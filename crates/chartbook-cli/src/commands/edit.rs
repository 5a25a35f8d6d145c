use std::path::Path;

use super::common;
use crate::error::CliError;

pub async fn run_edit(
    db_path: &Path,
    id: &str,
    title: Option<String>,
    artist: Option<String>,
    key: Option<String>,
    tempo: Option<u32>,
) -> Result<(), CliError> {
    if title.is_none() && artist.is_none() && key.is_none() && tempo.is_none() {
        return Err(CliError::NothingToEdit);
    }

    let service = common::open_service(db_path).await?;
    let mut song = common::resolve_song(&service, id).await?;

    if let Some(title) = title {
        let Some(title) = common::normalize_text(&title) else {
            return Err(CliError::EmptyTitle);
        };
        song.title = title;
    }
    if let Some(artist) = artist {
        song.artist = common::normalize_text(&artist);
    }
    if let Some(key) = key {
        song.default_key = common::normalize_text(&key);
    }
    if let Some(tempo) = tempo {
        song.tempo_bpm = Some(tempo);
    }

    let song = service.update_song(song).await?;
    println!(
        "Updated \"{}\" ({})",
        song.title,
        common::short_id(&song.id.to_string())
    );
    Ok(())
}
