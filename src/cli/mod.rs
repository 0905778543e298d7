use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::gateway::GatewayState;
use crate::knowledge::{AccessScope, Confidentiality, DocumentType, IngestDocument, SearchQuery};

#[derive(Parser)]
#[command(name = "kbgate", version, about = "Knowledge retrieval and dual-mode routing gateway")]
pub struct Cli {
    /// Config file (json, json5, yaml or toml).
    #[arg(short, long, global = true, env = "KBGATE_CONFIG")]
    pub config: Option<String>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP gateway.
    Serve(ServeOpts),
    /// Ingest files into the knowledge index.
    Ingest(IngestOpts),
    /// Search the knowledge index.
    Search(SearchOpts),
    Config(ConfigOpts),
    Version,
}

#[derive(clap::Args)]
pub struct ServeOpts {
    #[arg(short, long)]
    pub port: Option<u16>,
    /// loopback, lan or custom.
    #[arg(short, long)]
    pub bind: Option<String>,
}

#[derive(clap::Args)]
pub struct IngestOpts {
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
    /// Domain tag applied to every file. Repeatable.
    #[arg(short, long = "domain", required = true)]
    pub domains: Vec<String>,
    #[arg(short = 't', long, default_value = "other")]
    pub doc_type: DocumentType,
    #[arg(long, default_value = "internal")]
    pub confidentiality: Confidentiality,
    /// Free-form tag. Repeatable.
    #[arg(long = "tag")]
    pub tags: Vec<String>,
}

#[derive(clap::Args)]
pub struct SearchOpts {
    pub query: String,
    #[arg(short, long = "domain")]
    pub domains: Vec<String>,
    #[arg(short = 'k', long)]
    pub top_k: Option<i64>,
    /// Include internal documents.
    #[arg(long)]
    pub internal: bool,
    #[arg(long)]
    pub keyword_only: bool,
}

#[derive(clap::Args)]
pub struct ConfigOpts {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    Show,
    Validate,
    Init,
}

/// Read `opts.files` into ingest documents, one per file.
pub fn read_documents(opts: &IngestOpts) -> Result<Vec<IngestDocument>> {
    opts.files
        .iter()
        .map(|path| {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read '{}'", path.display()))?;
            Ok(IngestDocument {
                content,
                source: path.display().to_string(),
                domain_tags: opts.domains.clone(),
                document_type: opts.doc_type,
                confidentiality: opts.confidentiality,
                title: path.file_stem().map(|s| s.to_string_lossy().into_owned()),
                tags: opts.tags.clone(),
                priority: None,
            })
        })
        .collect()
}

pub async fn run_ingest(state: &GatewayState, opts: &IngestOpts) -> Result<()> {
    let docs = read_documents(opts)?;
    let cancel = CancellationToken::new();
    let report = state.pipeline.ingest(docs, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.documents_processed == 0 && !report.errors.is_empty() {
        anyhow::bail!("no documents were ingested");
    }
    Ok(())
}

pub async fn run_search(state: &GatewayState, opts: &SearchOpts) -> Result<()> {
    let mut query = SearchQuery::new(opts.query.clone()).with_domains(opts.domains.clone());
    query.top_k = opts.top_k;
    query.use_semantic_ranking = !opts.keyword_only;
    let scope = if opts.internal {
        AccessScope::IncludeInternal
    } else {
        AccessScope::PublicOnly
    };

    let outcome = state
        .engine
        .search(&query, scope, &CancellationToken::new())
        .await?;

    if outcome.degraded {
        println!("(degraded: keyword ranking only)");
    }
    for (i, result) in outcome.results.iter().enumerate() {
        let doc = &result.document;
        println!(
            "{:>2}. [{:.3}] {} ({}, {})",
            i + 1,
            result.score,
            doc.title,
            doc.source_document,
            doc.confidentiality.as_str()
        );
        for h in &result.highlights {
            println!("      {h}");
        }
    }
    println!("{} result(s) in {} ms", outcome.total_count, outcome.execution_time_ms);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ingest_flags() {
        let cli = Cli::parse_from([
            "kbgate", "ingest", "a.md", "b.md", "-d", "billing", "--domain", "Sales",
            "--doc-type", "sales-script", "--confidentiality", "public",
        ]);
        let Commands::Ingest(opts) = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(opts.files.len(), 2);
        assert_eq!(opts.domains, vec!["billing", "Sales"]);
        assert_eq!(opts.doc_type, DocumentType::SalesScript);
        assert_eq!(opts.confidentiality, Confidentiality::Public);
    }

    #[test]
    fn ingest_defaults_to_internal() {
        let cli = Cli::parse_from(["kbgate", "ingest", "a.md", "-d", "ops"]);
        let Commands::Ingest(opts) = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(opts.confidentiality, Confidentiality::Internal);
        assert_eq!(opts.doc_type, DocumentType::Other);
    }

    #[test]
    fn reads_files_into_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refund-policy.md");
        std::fs::write(&path, "Refunds take five days.").unwrap();
        let opts = IngestOpts {
            files: vec![path.clone()],
            domains: vec!["billing".into()],
            doc_type: DocumentType::Policy,
            confidentiality: Confidentiality::Public,
            tags: vec![],
        };
        let docs = read_documents(&opts).unwrap();
        assert_eq!(docs[0].title.as_deref(), Some("refund-policy"));
        assert_eq!(docs[0].source, path.display().to_string());

        let missing = IngestOpts {
            files: vec![dir.path().join("nope.md")],
            ..opts
        };
        assert!(read_documents(&missing).is_err());
    }
}
