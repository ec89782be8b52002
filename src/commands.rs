//! CLI command implementations.
//!
//! Each `run_*` function builds what it needs from the config, performs one
//! operation and prints a short summary to stdout.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use tenant_rag_core::models::Exchange;

use crate::config::Config;
use crate::conversation::ConversationPipeline;
use crate::intake::Intake;
use crate::registry::TenantRegistry;
use crate::tenant::IngestReport;

fn registry(config: &Config) -> Result<Arc<TenantRegistry>> {
    Ok(Arc::new(TenantRegistry::new(config)?))
}

fn print_report(title: &str, tenant: &str, report: &IngestReport) {
    println!("{} ({})", title, tenant);
    println!("  files scanned: {}", report.files);
    println!("  ingested: {}", report.ingested);
    println!("  unchanged: {}", report.unchanged);
    if report.empty > 0 {
        println!("  empty: {}", report.empty);
    }
    if report.failed > 0 {
        println!("  failed: {}", report.failed);
    }
    println!("  chunks: {}", report.chunks);
    println!(
        "  labels: {} labeled, {} unlabeled",
        report.labels.labeled, report.labels.unlabeled
    );
    println!("  embedded: {}", report.embedded);
}

pub async fn run_ingest(config: &Config, tenant: &str, dir: Option<&Path>) -> Result<()> {
    let registry = registry(config)?;
    let report = match dir {
        Some(dir) => registry.update_dataset(tenant, dir).await?,
        None => registry.get_or_create(tenant)?.load_documents().await?,
    };
    print_report("ingest", tenant, &report);
    Ok(())
}

pub async fn run_search(config: &Config, tenant: &str, query: &str) -> Result<()> {
    let registry = registry(config)?;
    let retriever = registry.get_or_create(tenant)?.retriever().await?;
    let results = retriever.search_scored(query).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, result) in results.iter().enumerate() {
        let chunk = &result.chunk;
        println!(
            "{}. [{:.2}] {} #{}",
            i + 1,
            result.score,
            chunk.source,
            chunk.chunk_index
        );
        if let Some(label) = &chunk.label {
            println!("    label: {}", label);
        }
        let excerpt: String = chunk.text.chars().take(160).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!();
    }
    Ok(())
}

pub async fn run_ask(config: &Config, tenant: &str, query: &str) -> Result<()> {
    let pipeline = ConversationPipeline::new(registry(config)?, config.conversation.max_history);
    let answer = pipeline.answer(tenant, query, &[]).await?;
    println!("{}", answer.trim());
    Ok(())
}

/// Interactive loop on stdin. An empty line, `exit` or `quit` ends it.
pub async fn run_chat(config: &Config, tenant: &str) -> Result<()> {
    let max_history = config.conversation.max_history;
    let pipeline = ConversationPipeline::new(registry(config)?, max_history);
    let mut history: Vec<Exchange> = Vec::new();
    let stdin = std::io::stdin();
    let mut line = String::new();

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let query = line.trim();
        if query.is_empty() || query == "exit" || query == "quit" {
            break;
        }
        let answer = pipeline.answer(tenant, query, &history).await?;
        println!("{}\n", answer.trim());

        history.push(Exchange::new(query, answer));
        if history.len() > max_history {
            history.remove(0);
        }
    }
    Ok(())
}

pub async fn run_faq(config: &Config, tenant: &str, question: &str, answer: &str) -> Result<()> {
    let intake = Intake::new(registry(config)?);
    let report = intake.add_faq(tenant, question, answer).await?;
    print_report("faq", tenant, &report);
    Ok(())
}

pub async fn run_manual(
    config: &Config,
    tenant: &str,
    text: Option<&str>,
    file: Option<&Path>,
) -> Result<()> {
    let text = match (text, file) {
        (Some(text), None) => text.to_string(),
        (None, Some(file)) => std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?,
        _ => bail!("Provide either TEXT or --file"),
    };
    if text.trim().is_empty() {
        bail!("Manual text is empty");
    }
    let intake = Intake::new(registry(config)?);
    let report = intake.add_manual_text(tenant, &text).await?;
    print_report("manual", tenant, &report);
    Ok(())
}

pub async fn run_import_crawl(config: &Config, tenant: &str, file: &Path) -> Result<()> {
    let intake = Intake::new(registry(config)?);
    let report = intake.import_crawl(tenant, file).await?;
    print_report("import-crawl", tenant, &report);
    Ok(())
}

pub fn run_upload(config: &Config, tenant: &str, file: &Path) -> Result<()> {
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("Not a file: {}", file.display()))?;
    let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let intake = Intake::new(registry(config)?);
    let staged = intake.stage_upload(tenant, &name, &bytes)?;
    println!("Staged {} ({} bytes)", staged.display(), bytes.len());
    Ok(())
}

pub async fn run_finalize(config: &Config, tenant: &str) -> Result<()> {
    let intake = Intake::new(registry(config)?);
    let finalized = intake.finalize_uploads(tenant).await?;
    for name in &finalized.files {
        println!("moved {}", name);
    }
    print_report("finalize", tenant, &finalized.report);
    Ok(())
}

pub async fn run_relabel(config: &Config, tenant: &str, limit: usize) -> Result<()> {
    let registry = registry(config)?;
    let report = registry.get_or_create(tenant)?.relabel_unlabeled(limit).await?;
    println!("relabel ({})", tenant);
    println!("  labeled: {}", report.labeled);
    println!("  still unlabeled: {}", report.unlabeled);
    Ok(())
}

pub async fn run_embed(config: &Config, tenant: &str, limit: usize) -> Result<()> {
    let registry = registry(config)?;
    let embedded = registry.get_or_create(tenant)?.embed_pending(limit).await?;
    println!("embed pending ({})", tenant);
    println!("  embedded: {}", embedded);
    Ok(())
}

pub async fn run_stats(config: &Config, tenant: &str, json: bool) -> Result<()> {
    let registry = registry(config)?;
    let index = registry.get_or_create(tenant)?;
    let stats = index.stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }
    println!("Tenant {}", tenant);
    println!("================================");
    println!("  Dataset:     {}", index.dataset_dir().display());
    println!("  Documents:   {}", stats.documents);
    println!("  Chunks:      {}", stats.chunks);
    println!("  Labeled:     {}", stats.labeled);
    println!("  Unlabeled:   {}", stats.unlabeled);
    println!("  Embedded:    {} / {}", stats.embedded, stats.chunks);
    Ok(())
}
