use std::path::Path;

use chartbook_core::models::Song;

use super::common;
use crate::error::CliError;

pub async fn run_add(
    db_path: &Path,
    title: Vec<String>,
    artist: Option<String>,
    key: Option<String>,
    tempo: Option<u32>,
) -> Result<(), CliError> {
    let title = title.join(" ");
    let title = title.trim();
    if title.is_empty() {
        return Err(CliError::EmptyTitle);
    }

    let service = common::open_service(db_path).await?;

    let mut song = Song::new(title);
    song.artist = artist.as_deref().and_then(common::normalize_text);
    song.default_key = key.as_deref().and_then(common::normalize_text);
    song.tempo_bpm = tempo;

    let song = service.create_song(song).await?;

    println!(
        "Added \"{}\" ({})",
        song.title,
        common::short_id(&song.id.to_string())
    );
    Ok(())
}
