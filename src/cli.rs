use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "scribe")]
#[command(about = "Index a document corpus and answer questions from it", long_about = None)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file (default: $SCRIBE_CONFIG or config/default.toml)")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Bring the index up to date with the corpus")]
    Index {
        #[arg(long, help = "Reindex files even if their checksum is unchanged")]
        force: bool,

        #[arg(long, help = "Index a single file instead of the whole corpus")]
        file: Option<PathBuf>,
    },

    #[command(about = "Ask a question answered from the indexed documents")]
    Ask {
        #[arg(help = "The question")]
        question: String,

        #[arg(short, long, help = "Continue an existing conversation")]
        conversation: Option<i64>,

        #[arg(long, help = "Maximum number of context chunks (default: retrieval.top_k)")]
        max_sources: Option<usize>,
    },

    #[command(about = "Index once, then reindex files as they change until Ctrl-C")]
    Watch,

    #[command(about = "List indexed files")]
    Status,

    #[command(about = "Delete a conversation and its turns")]
    Forget {
        #[arg(help = "Conversation id")]
        id: i64,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_ask_with_options() {
        let cli = Cli::try_parse_from([
            "scribe",
            "--config",
            "kb.toml",
            "ask",
            "what is alpha?",
            "-c",
            "3",
            "--max-sources",
            "2",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("kb.toml")));
        let Commands::Ask {
            question,
            conversation,
            max_sources,
        } = cli.command
        else {
            panic!("expected ask");
        };
        assert_eq!(question, "what is alpha?");
        assert_eq!(conversation, Some(3));
        assert_eq!(max_sources, Some(2));
    }

    #[test]
    fn parses_index_flags() {
        let cli = Cli::try_parse_from(["scribe", "index", "--force", "--file", "a.md"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Index { force: true, file: Some(_) }
        ));
    }
}
