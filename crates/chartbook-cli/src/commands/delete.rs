use std::path::Path;

use super::common;
use crate::error::CliError;

pub async fn run_delete(db_path: &Path, id: &str) -> Result<(), CliError> {
    let service = common::open_service(db_path).await?;
    let song = common::resolve_song(&service, id).await?;

    service.delete_song(&song.id).await?;

    if song.is_local_only() {
        println!("Deleted \"{}\"", song.title);
    } else {
        println!(
            "Deleted \"{}\" (deletion will sync to the server)",
            song.title
        );
    }
    Ok(())
}
