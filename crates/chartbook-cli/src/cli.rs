use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "chartbook")]
#[command(about = "Offline-first song and chord-chart catalog")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Add a song to the catalog
    #[command(alias = "new")]
    Add {
        /// Song title
        title: Vec<String>,
        /// Performing or original artist
        #[arg(long)]
        artist: Option<String>,
        /// Default musical key, e.g. G or Bm
        #[arg(long)]
        key: Option<String>,
        /// Tempo in beats per minute
        #[arg(long)]
        tempo: Option<u32>,
    },
    /// List songs
    List {
        /// Number of songs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a song with its chart versions
    Show {
        /// Song ID or unique ID prefix
        id: String,
    },
    /// Edit song fields
    Edit {
        /// Song ID or unique ID prefix
        id: String,
        /// New title
        #[arg(long)]
        title: Option<String>,
        /// New artist
        #[arg(long)]
        artist: Option<String>,
        /// New default key
        #[arg(long)]
        key: Option<String>,
        /// New tempo in beats per minute
        #[arg(long)]
        tempo: Option<u32>,
    },
    /// Delete a song
    Delete {
        /// Song ID or unique ID prefix
        id: String,
    },
    /// Manage chart versions of a song
    Version {
        #[command(subcommand)]
        command: VersionCommands,
    },
    /// Manage section notes of a chart version
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },
    /// Run a sync cycle, or inspect and repair sync state
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
        /// Print the diagnostic trace after the cycle
        #[arg(long)]
        trace: bool,
    },
    /// Manage CLI configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum VersionCommands {
    /// Add a chart version to a song
    Add {
        /// Song ID or unique ID prefix
        song: String,
        /// Version name, e.g. "Acoustic in G"
        name: String,
        /// Musical key of this version
        #[arg(long)]
        key: Option<String>,
        /// Capo position
        #[arg(long)]
        capo: Option<u8>,
        /// Chart body; opens $EDITOR when omitted
        #[arg(long)]
        body: Option<String>,
    },
    /// List chart versions of a song
    List {
        /// Song ID or unique ID prefix
        song: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum NoteCommands {
    /// Attach a note to a section of a chart version
    Add {
        /// Version ID or unique ID prefix
        version: String,
        /// Section label, e.g. "chorus" or "bridge"
        section: String,
        /// Note text
        body: Vec<String>,
    },
    /// List section notes of a chart version
    List {
        /// Version ID or unique ID prefix
        version: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show sync state and outbox counts
    Status,
    /// List unresolved conflicts
    Conflicts {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a conflict
    Resolve {
        /// Conflict ID
        id: String,
        /// Keep the local copy and re-push it
        #[arg(long, conflicts_with = "accept_remote")]
        keep_local: bool,
        /// Take the remote copy and drop local edits
        #[arg(long)]
        accept_remote: bool,
    },
    /// Requeue stuck SENT outbox items back to PENDING
    Repair {
        /// Only requeue items sent at least this many minutes ago
        #[arg(long, default_value = "10", value_name = "MINUTES")]
        older_than: i64,
    },
    /// Reset the pull cursor for a full resync
    Reset {
        /// Also purge clean synced rows (dirty rows and the outbox survive)
        #[arg(long)]
        hard: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update the configuration file
    Init {
        /// Sync server base URL
        #[arg(long, value_name = "URL")]
        server_url: Option<String>,
        /// Bearer token for the sync server
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,
        /// Stable device identifier (generated when omitted)
        #[arg(long, value_name = "ID")]
        device_id: Option<String>,
    },
    /// Print the current configuration (token redacted)
    Show,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn add_collects_multi_word_titles() {
        let cli = Cli::try_parse_from(["chartbook", "add", "Be", "Thou", "My", "Vision"]).unwrap();
        match cli.command {
            Commands::Add { title, .. } => {
                assert_eq!(title.join(" "), "Be Thou My Vision");
            }
            _ => panic!("expected add command"),
        }
    }

    #[test]
    fn resolve_flags_are_mutually_exclusive() {
        let result = Cli::try_parse_from([
            "chartbook",
            "sync",
            "resolve",
            "abc",
            "--keep-local",
            "--accept-remote",
        ]);
        assert!(result.is_err());
    }
}
