mod cli;

use anyhow::{Context, bail};
use clap::Parser;
use scribe_core::bootstrap::{Engine, build_engine, load_config};
use scribe_index::{IndexReport, IndexWatcher};
use scribe_llm::any::AnyProvider;
use scribe_memory::ConversationId;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let engine = build_engine(&config).await?;

    match cli.command {
        Commands::Index { force, file } => {
            let report = match file {
                Some(path) => engine.indexer.index_file(&path, force).await?,
                None => engine.indexer.index_all(force).await?,
            };
            print_report(&report);
            if !report.errors.is_empty() {
                bail!("{} file(s) failed to index", report.errors.len());
            }
        }
        Commands::Ask {
            question,
            conversation,
            max_sources,
        } => {
            let max_sources = max_sources.unwrap_or(config.retrieval.top_k);
            let answer = engine
                .query
                .ask(&question, conversation.map(ConversationId), max_sources)
                .await?;
            println!("{}\n", answer.answer.trim());
            if answer.sources.is_empty() {
                println!("sources: none");
            } else {
                println!("sources:");
                for source in &answer.sources {
                    println!("  {source}");
                }
            }
            println!("confidence: {:.2}", answer.confidence);
            println!("conversation: {}", answer.conversation_id);
        }
        Commands::Watch => watch(&engine).await?,
        Commands::Status => {
            let states = engine.indexer.checksums().list().await?;
            if states.is_empty() {
                println!("no files indexed");
            }
            for state in &states {
                println!(
                    "{}  chunks={}  indexed_at={}  checksum={}",
                    state.file_path,
                    state.chunk_count,
                    state.indexed_at,
                    state.checksum.get(..12).unwrap_or(&state.checksum)
                );
            }
            let entries = engine.indexer.store().count(None).await?;
            println!("{} file(s), {entries} index entries", states.len());
        }
        Commands::Forget { id } => {
            let id = ConversationId(id);
            if engine.sqlite.delete_conversation(id).await? {
                println!("deleted conversation {id}");
            } else {
                bail!("conversation {id} not found");
            }
        }
    }

    Ok(())
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_report(report: &IndexReport) {
    println!(
        "scanned {}, updated {}, skipped {}, removed {}, chunks written {} ({} ms)",
        report.files_scanned,
        report.files_updated,
        report.files_skipped,
        report.files_removed,
        report.chunks_written,
        report.duration_ms
    );
    for err in &report.errors {
        println!("  failed: {} [{}] {}", err.file_path, err.stage, err.message);
    }
}

async fn watch(engine: &Engine<AnyProvider>) -> anyhow::Result<()> {
    let report = engine.indexer.index_all(false).await?;
    print_report(&report);

    let root = engine.indexer.corpus().root().to_path_buf();
    let _watcher = IndexWatcher::start(&root, std::sync::Arc::clone(&engine.indexer))
        .with_context(|| format!("failed to watch {}", root.display()))?;
    println!("watching {} (Ctrl-C to stop)", root.display());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!("shutting down");
    Ok(())
}
