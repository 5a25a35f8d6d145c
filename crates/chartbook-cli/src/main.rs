mod cli;
mod cli_config;
mod commands;
mod error;

use clap::Parser;

use cli::{Cli, Commands};
use error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chartbook=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = cli_config::resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Add {
            title,
            artist,
            key,
            tempo,
        } => commands::add::run_add(&db_path, title, artist, key, tempo).await,
        Commands::List { limit, json } => commands::list::run_list(&db_path, limit, json).await,
        Commands::Show { id } => commands::show::run_show(&db_path, &id).await,
        Commands::Edit {
            id,
            title,
            artist,
            key,
            tempo,
        } => commands::edit::run_edit(&db_path, &id, title, artist, key, tempo).await,
        Commands::Delete { id } => commands::delete::run_delete(&db_path, &id).await,
        Commands::Version { command } => commands::version::run(&db_path, command).await,
        Commands::Note { command } => commands::note::run(&db_path, command).await,
        Commands::Sync { command, trace } => commands::sync::run(&db_path, command, trace).await,
        Commands::Config { command } => commands::config::run(command),
        Commands::Completions { shell, output } => {
            commands::completions::run_completions(shell, output)
        }
    }
}
