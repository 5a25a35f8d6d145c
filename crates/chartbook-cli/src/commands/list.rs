use std::path::Path;

use super::common;
use crate::error::CliError;

pub async fn run_list(db_path: &Path, limit: usize, json: bool) -> Result<(), CliError> {
    let service = common::open_service(db_path).await?;
    let songs = service.list_songs(limit, 0).await?;

    if json {
        let items: Vec<_> = songs.iter().map(common::song_to_list_item).collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if songs.is_empty() {
        println!("No songs yet. Add one with `chartbook add <title>`.");
        return Ok(());
    }

    for line in common::format_song_lines(&songs) {
        println!("{line}");
    }
    Ok(())
}
