use crate::cli::ConfigCommands;
use crate::cli_config::{default_db_path, CliConfig};
use crate::error::CliError;

pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            server_url,
            token,
            device_id,
        } => run_init(server_url, token, device_id),
        ConfigCommands::Show => run_show(),
    }
}

fn run_init(
    server_url: Option<String>,
    token: Option<String>,
    device_id: Option<String>,
) -> Result<(), CliError> {
    let mut config = CliConfig::load()?;

    if let Some(server_url) = server_url {
        config.server_url = Some(server_url.trim().trim_end_matches('/').to_string());
    }
    if let Some(token) = token {
        config.token = Some(token.trim().to_string());
    }
    if let Some(device_id) = device_id {
        config.device_id = Some(device_id.trim().to_string());
    }
    // Ensure a device id exists even on a bare `config init`
    config.resolved_device_id()?;

    let path = config.save()?;
    println!("Configuration written to {}", path.display());
    Ok(())
}

fn run_show() -> Result<(), CliError> {
    let mut config = CliConfig::load()?;
    let device_id = config.resolved_device_id()?;

    println!(
        "server_url: {}",
        config
            .resolved_server_url()
            .as_deref()
            .unwrap_or("(not set)")
    );
    println!(
        "token:      {}",
        if config.resolved_token().is_some() {
            "<redacted>"
        } else {
            "(not set)"
        }
    );
    println!("device_id:  {device_id}");
    println!("db_path:    {}", default_db_path().display());
    Ok(())
}
