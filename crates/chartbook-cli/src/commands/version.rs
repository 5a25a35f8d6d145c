use std::path::Path;

use chartbook_core::models::SongVersion;
use serde::Serialize;

use super::common;
use crate::cli::VersionCommands;
use crate::error::CliError;

const CHART_TEMPLATE: &str = "\
# Chart body. Lines starting with # are kept as-is.
# Example: [G]Amazing [C]grace, how [G]sweet the sound
";

pub async fn run(db_path: &Path, command: VersionCommands) -> Result<(), CliError> {
    match command {
        VersionCommands::Add {
            song,
            name,
            key,
            capo,
            body,
        } => run_add(db_path, &song, &name, key, capo, body).await,
        VersionCommands::List { song, json } => run_list(db_path, &song, json).await,
    }
}

async fn run_add(
    db_path: &Path,
    song: &str,
    name: &str,
    key: Option<String>,
    capo: Option<u8>,
    body: Option<String>,
) -> Result<(), CliError> {
    let service = common::open_service(db_path).await?;
    let song = common::resolve_song(&service, song).await?;

    let body = match body {
        Some(body) => common::normalize_text(&body).ok_or(CliError::EmptyBody)?,
        None => common::capture_editor_input_with_initial(CHART_TEMPLATE)?
            .ok_or(CliError::EmptyBody)?,
    };

    let mut version = SongVersion::new(song.id, name, body);
    version.key = key.as_deref().and_then(common::normalize_text);
    version.capo = capo;

    let version = service.create_version(version).await?;
    println!(
        "Added version \"{}\" to \"{}\" ({})",
        version.name,
        song.title,
        common::short_id(&version.id.to_string())
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct VersionListItem {
    id: String,
    name: String,
    key: Option<String>,
    capo: Option<u8>,
    dirty: bool,
    synced: bool,
}

async fn run_list(db_path: &Path, song: &str, json: bool) -> Result<(), CliError> {
    let service = common::open_service(db_path).await?;
    let song = common::resolve_song(&service, song).await?;
    let versions = service.list_versions(&song.id).await?;

    if json {
        let items: Vec<_> = versions
            .iter()
            .map(|version| VersionListItem {
                id: version.id.to_string(),
                name: version.name.clone(),
                key: version.key.clone(),
                capo: version.capo,
                dirty: version.dirty,
                synced: !version.is_local_only(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if versions.is_empty() {
        println!("No versions for \"{}\".", song.title);
        return Ok(());
    }

    println!("Versions of \"{}\":", song.title);
    for line in common::format_version_lines(&versions) {
        println!("  {line}");
    }
    Ok(())
}
