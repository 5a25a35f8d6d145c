use std::fs::File;
use std::io;
use std::path::PathBuf;

use clap::CommandFactory;
use clap_complete::{generate, Shell};

use crate::cli::{Cli, CompletionShell};
use crate::error::CliError;

pub fn run_completions(shell: CompletionShell, output: Option<PathBuf>) -> Result<(), CliError> {
    let shell = match shell {
        CompletionShell::Bash => Shell::Bash,
        CompletionShell::Zsh => Shell::Zsh,
        CompletionShell::Fish => Shell::Fish,
    };

    let mut command = Cli::command();
    match output {
        Some(path) => {
            let mut file = File::create(&path)?;
            generate(shell, &mut command, "chartbook", &mut file);
            println!("Completions written to {}", path.display());
        }
        None => {
            generate(shell, &mut command, "chartbook", &mut io::stdout());
        }
    }
    Ok(())
}
