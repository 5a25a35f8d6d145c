use std::path::Path;

use super::common;
use crate::error::CliError;

pub async fn run_show(db_path: &Path, id: &str) -> Result<(), CliError> {
    let service = common::open_service(db_path).await?;
    let song = common::resolve_song(&service, id).await?;

    println!("{}", song.title);
    println!("  id:      {}", song.id);
    if let Some(artist) = &song.artist {
        println!("  artist:  {artist}");
    }
    if let Some(key) = &song.default_key {
        println!("  key:     {key}");
    }
    if let Some(tempo) = song.tempo_bpm {
        println!("  tempo:   {tempo} bpm");
    }
    println!(
        "  sync:    {}",
        sync_summary(song.dirty, song.is_local_only())
    );
    println!("  updated: {}", song.updated_at.format("%Y-%m-%d %H:%M UTC"));

    let versions = service.list_versions(&song.id).await?;
    if versions.is_empty() {
        println!("\nNo chart versions. Add one with `chartbook version add {id} <name>`.");
        return Ok(());
    }

    println!("\nVersions:");
    for line in common::format_version_lines(&versions) {
        println!("  {line}");
    }
    Ok(())
}

const fn sync_summary(dirty: bool, local_only: bool) -> &'static str {
    match (dirty, local_only) {
        (true, true) => "local only, not yet pushed",
        (true, false) => "local changes pending",
        (false, true) => "local only",
        (false, false) => "in sync",
    }
}
