use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] chartbook_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No song title provided")]
    EmptyTitle,
    #[error("ID cannot be empty")]
    EmptyId,
    #[error("Chart body cannot be empty")]
    EmptyBody,
    #[error("No note text provided")]
    EmptyNoteBody,
    #[error("Nothing to change; pass at least one field flag")]
    NothingToEdit,
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Pass exactly one of --keep-local or --accept-remote")]
    NoResolutionChosen,
    #[error("Sync failed: {0}")]
    SyncFailed(String),
    #[error(
        "Sync is not configured. Run `chartbook config init --server-url <URL> --token <TOKEN>`, or set CHARTBOOK_SERVER_URL and CHARTBOOK_TOKEN."
    )]
    SyncNotConfigured,
}
