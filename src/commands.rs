use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::corpus::{self, CorpusKind};
use crate::database::{CollectionHandle, LanceVectorStore, VectorStore};
use crate::embeddings::{EmbeddingService, OllamaClient};
use crate::generation::{GenerationService, OllamaGenerator};
use crate::indexer::{IndexBuilder, IndexReport};
use crate::query::{AnswerPipeline, ContextFormatter, Retriever};

const PREVIEW_CHARS: usize = 120;
const INDEX_INTERRUPTED: &str = "📴 Received interrupt signal, discarding the unflushed batch...";

/// Load a corpus CSV and index it into its collection
#[inline]
pub async fn index_corpus(
    config: &Config,
    kind: CorpusKind,
    csv: Option<&Path>,
    collection: Option<&str>,
) -> Result<IndexReport> {
    let path = config.require_corpus_file(kind, csv)?;
    let collection_name = collection.unwrap_or_else(|| config.collection_name(kind));

    println!(
        "📖 Loading {} from {}",
        kind.unit_name(),
        style(path.display()).cyan()
    );
    let loaded = corpus::load_csv(kind, &path)
        .with_context(|| format!("Failed to load corpus file {}", path.display()))?;

    if !loaded.rejected.is_empty() {
        println!(
            "   {} {} malformed rows skipped",
            style("⚠").yellow(),
            loaded.rejected.len()
        );
        for rejection in &loaded.rejected {
            warn!("Line {}: {}", rejection.line, rejection.reason);
        }
    }

    let embedder: Arc<dyn EmbeddingService> = Arc::new(
        OllamaClient::new(&config.ollama).context("Failed to initialize Ollama client")?,
    );
    let store: Arc<dyn VectorStore> = Arc::new(
        LanceVectorStore::new(config)
            .await
            .context("Failed to initialize LanceDB vector store")?,
    );

    let total = loaded.records.len();
    let bar = progress_bar(total);
    let progress_bar = bar.clone();

    let indexer = IndexBuilder::open(embedder, Arc::clone(&store), collection_name, config)
        .await
        .with_context(|| format!("Failed to open collection '{}'", collection_name))?
        .with_progress(Arc::new(move |processed| {
            progress_bar.set_position(processed as u64);
        }));

    let cancel = cancel_on_ctrl_c();
    info!(
        "Indexing {} {} into '{}'",
        total,
        kind.unit_name(),
        collection_name
    );

    let result = indexer.ingest(loaded.records, &cancel).await;
    bar.finish_and_clear();
    let report = result.with_context(|| format!("Indexing into '{}' failed", collection_name))?;

    if let Err(e) = store.optimize(indexer.collection()).await {
        warn!("Optimization after indexing failed: {}", e);
    }

    let stored = store.count(indexer.collection()).await?;

    println!(
        "{} Indexed {} {} into '{}'",
        style("✓").green(),
        report.indexed,
        kind.unit_name(),
        style(collection_name).cyan()
    );
    println!("   Skipped (empty text): {}", report.skipped);
    println!("   Failed to embed: {}", report.failed);
    println!("   Batches written: {}", report.batches);
    println!("   Collection size: {}", stored);

    Ok(report)
}

/// Interactive question loop over one collection
#[inline]
pub async fn ask(config: &Config, kind: CorpusKind, collection: Option<&str>) -> Result<()> {
    let collection_name = collection.unwrap_or_else(|| config.collection_name(kind));
    let embedder: Arc<dyn EmbeddingService> = Arc::new(
        OllamaClient::new(&config.ollama).context("Failed to initialize Ollama client")?,
    );
    let generator: Arc<dyn GenerationService> =
        Arc::new(OllamaGenerator::new(config).context("Failed to initialize Ollama generator")?);
    let store = LanceVectorStore::new(config)
        .await
        .context("Failed to initialize LanceDB vector store")?;

    let handle = open_existing_collection(&store, collection_name, kind, config).await?;
    let store: Arc<dyn VectorStore> = Arc::new(store);
    let retriever = Retriever::new(embedder, store, handle, config);
    let pipeline = AnswerPipeline::new(kind, retriever, generator, config);

    println!(
        "{}",
        style(format!(
            "{} tutor ready. Type a question, or 'quit' to exit.",
            match kind {
                CorpusKind::Bible => "Bible",
                CorpusKind::Catechism => "Catechism",
            }
        ))
        .bold()
        .cyan()
    );

    let mut interrupts = forward_ctrl_c();
    let answered = question_loop(&pipeline, tokio::io::stdin(), &mut interrupts).await?;
    info!("Session ended after {} questions", answered);

    Ok(())
}

/// Read questions until `quit`, `exit`, end of input or an interrupt at the prompt.
///
/// An interrupt while a question is being answered cancels only that question.
/// Returns the number of questions answered.
async fn question_loop<R>(
    pipeline: &AnswerPipeline,
    input: R,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    let mut stdout = tokio::io::stdout();
    let mut answered = 0;

    loop {
        stdout.write_all(b"\nQ: ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            Some(()) = interrupts.recv() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question.to_lowercase().as_str(), "quit" | "exit") {
            break;
        }

        let cancel = CancellationToken::new();
        tokio::select! {
            result = pipeline.ask(question, &cancel) => match result {
                Ok(response) => {
                    answered += 1;
                    println!();
                    println!("{}", response.answer.text);
                    if !response.answer.citations.is_empty() {
                        println!();
                        println!("{}", style("Citations:").bold());
                        for citation in &response.answer.citations {
                            println!("- {}", citation);
                        }
                    }
                }
                Err(e) => {
                    println!("{} {}", style("✗").red(), e);
                }
            },
            Some(()) = interrupts.recv() => {
                cancel.cancel();
                println!("\n{}", style("Question cancelled").yellow());
            }
        }
    }

    Ok(answered)
}

/// Count, sample and optionally search a collection
#[inline]
pub async fn inspect(
    config: &Config,
    kind: CorpusKind,
    collection: Option<&str>,
    limit: usize,
    query: Option<&str>,
) -> Result<()> {
    let collection_name = collection.unwrap_or_else(|| config.collection_name(kind));
    let store = LanceVectorStore::new(config)
        .await
        .context("Failed to initialize LanceDB vector store")?;
    let handle = open_existing_collection(&store, collection_name, kind, config).await?;
    let formatter = ContextFormatter::new(kind);

    let count = store.count(&handle).await?;
    println!(
        "{} '{}': {} entries, {} dimensions",
        style("🔍").cyan(),
        style(handle.name()).cyan(),
        count,
        handle.dimension()
    );
    println!();

    println!("{}", style("Sample entries:").bold().yellow());
    for entry in store.peek(&handle, limit).await? {
        let citation = kind
            .citation(&entry.metadata)
            .unwrap_or_else(|| entry.id.clone());
        println!("  {} [{}]", style(citation).cyan(), entry.id);
        println!("     {}", preview(&entry.document));
    }

    if let Some(question) = query {
        let embedder: Arc<dyn EmbeddingService> = Arc::new(
            OllamaClient::new(&config.ollama).context("Failed to initialize Ollama client")?,
        );
        let retriever = Retriever::new(embedder, Arc::new(store), handle, config);

        println!();
        println!(
            "{} {}",
            style("Nearest passages for:").bold().yellow(),
            question
        );

        let hits = retriever
            .retrieve(question, limit, &CancellationToken::new())
            .await
            .context("Search failed")?;
        if hits.is_empty() {
            println!("  No passages within the relevance threshold.");
        }
        for hit in &hits {
            println!(
                "  {:.4}  {}  {}",
                hit.distance,
                style(formatter.citation(hit)).cyan(),
                preview(&hit.document)
            );
        }
    }

    Ok(())
}

/// Check the Ollama server, both models and the vector database
#[inline]
pub async fn health(config: &Config) -> Result<()> {
    println!("📊 Scripture RAG Health");
    println!("{}", "=".repeat(50));
    println!();

    println!("🤖 Ollama Status:");
    let client = OllamaClient::new(&config.ollama).context("Failed to initialize Ollama client")?;
    let models = [
        config.ollama.embedding_model.as_str(),
        config.ollama.generation_model.as_str(),
    ];
    let ollama_ok = match client.health_check(&models).await {
        Ok(()) => {
            println!(
                "   ✅ Ollama: Connected ({}:{})",
                config.ollama.host, config.ollama.port
            );
            println!("   📋 Embedding model: {}", config.ollama.embedding_model);
            println!("   💬 Generation model: {}", config.ollama.generation_model);
            true
        }
        Err(e) => {
            println!("   ❌ Ollama: {}", e);
            false
        }
    };

    println!("🔍 Vector Database Status:");
    let store_ok = match LanceVectorStore::new(config).await {
        Ok(store) => {
            println!("   ✅ LanceDB: {}", store.path().display());
            for kind in [CorpusKind::Bible, CorpusKind::Catechism] {
                let name = config.collection_name(kind);
                if store.collection_names().await?.iter().any(|n| n == name) {
                    let handle = open_existing_collection(&store, name, kind, config).await?;
                    println!(
                        "   📚 {}: {} entries",
                        name,
                        store.count(&handle).await?
                    );
                } else {
                    println!("   💤 {}: not indexed", name);
                }
            }
            true
        }
        Err(e) => {
            println!("   ❌ LanceDB: {}", e);
            false
        }
    };

    if ollama_ok && store_ok {
        Ok(())
    } else {
        bail!("Health check failed")
    }
}

/// Open a collection that must already have been indexed
async fn open_existing_collection(
    store: &LanceVectorStore,
    name: &str,
    kind: CorpusKind,
    config: &Config,
) -> Result<CollectionHandle> {
    if !store.collection_names().await?.iter().any(|n| n == name) {
        bail!(
            "Collection '{}' does not exist. Run `scripture-rag index --corpus {}` first.",
            name,
            kind
        );
    }

    let dimension = usize::try_from(config.ollama.embedding_dimension)
        .context("Embedding dimension does not fit in memory")?;
    store
        .get_or_create_collection(name, dimension)
        .await
        .with_context(|| format!("Failed to open collection '{}'", name))
}

fn progress_bar(total: usize) -> ProgressBar {
    if console::user_attended_stderr() {
        let style = ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} records ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        ProgressBar::new(total as u64).with_style(style)
    } else {
        ProgressBar::hidden()
    }
}

/// A token that trips on the first Ctrl+C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n{}", INDEX_INTERRUPTED);
            trigger.cancel();
        }
    });
    cancel
}

/// Every Ctrl+C for the rest of the process, as a message
fn forward_ctrl_c() -> mpsc::UnboundedReceiver<()> {
    let (sender, receiver) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if sender.send(()).is_err() {
                break;
            }
        }
    });
    receiver
}

/// A document on one line, shortened for terminal output
fn preview(document: &str) -> String {
    let flat = document.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > PREVIEW_CHARS {
        let short: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{}…", short)
    } else {
        flat
    }
}
