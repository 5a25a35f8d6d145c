use std::path::Path;

use chartbook_core::models::SectionNote;
use serde::Serialize;

use super::common;
use crate::cli::NoteCommands;
use crate::error::CliError;

pub async fn run(db_path: &Path, command: NoteCommands) -> Result<(), CliError> {
    match command {
        NoteCommands::Add {
            version,
            section,
            body,
        } => run_add(db_path, &version, &section, body).await,
        NoteCommands::List { version, json } => run_list(db_path, &version, json).await,
    }
}

async fn run_add(
    db_path: &Path,
    version: &str,
    section: &str,
    body: Vec<String>,
) -> Result<(), CliError> {
    let body = body.join(" ");
    let Some(body) = common::normalize_text(&body) else {
        return Err(CliError::EmptyNoteBody);
    };
    let Some(section) = common::normalize_text(section) else {
        return Err(CliError::EmptyNoteBody);
    };

    let service = common::open_service(db_path).await?;
    let version = common::resolve_version(&service, version).await?;

    let note = service
        .create_note(SectionNote::new(version.id, section, body))
        .await?;

    println!(
        "Noted [{}] on \"{}\" ({})",
        note.section,
        version.name,
        common::short_id(&note.id.to_string())
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct NoteListItem {
    id: String,
    section: String,
    body: String,
    dirty: bool,
}

async fn run_list(db_path: &Path, version: &str, json: bool) -> Result<(), CliError> {
    let service = common::open_service(db_path).await?;
    let version = common::resolve_version(&service, version).await?;
    let notes = service.list_notes(&version.id).await?;

    if json {
        let items: Vec<_> = notes
            .iter()
            .map(|note| NoteListItem {
                id: note.id.to_string(),
                section: note.section.clone(),
                body: note.body.clone(),
                dirty: note.dirty,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if notes.is_empty() {
        println!("No notes on \"{}\".", version.name);
        return Ok(());
    }

    println!("Notes on \"{}\":", version.name);
    for line in common::format_note_lines(&notes) {
        println!("  {line}");
    }
    Ok(())
}
