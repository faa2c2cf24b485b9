mod config;
mod error;
mod layers;
mod pipeline;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;

use crate::config::{Catalog, Settings};
use crate::error::ClientResult;
use crate::layers::citations::{CitationEnricher, SemanticScholarClient};
use crate::layers::discovery::ArxivClient;
use crate::layers::ledger::Ledger;
use crate::layers::newsletter::NewsletterClient;
use crate::layers::relevance::RelevanceScorer;
use crate::layers::site::{PublishedSite, SiteWriter};
use crate::pipeline::{DigestPipeline, FetchOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    // 0. Load Configuration
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("paper_digest=info,warn")),
        )
        .init();

    let settings = Settings::parse();
    let catalog = Catalog::load(settings.catalog.as_deref()).await?;
    let now = Utc::now();

    // 1. Prior history
    let ledger = Ledger::new(&settings.ledger);
    let mut seen = ledger.load().await;

    // 2. Fetch, dedup, enrich, rank
    let source = ArxivClient::new(&settings.arxiv_url)?;
    let citations = SemanticScholarClient::new(
        &settings.semantic_scholar_url,
        settings.semantic_scholar_key(),
    )?;
    tracing::debug!("Citation source: {:?}", citations);
    let pipeline = DigestPipeline::new(
        source,
        CitationEnricher::new(citations).with_batch_size(settings.citation_batch_size),
        RelevanceScorer::new(&catalog.relevance),
        settings.pipeline_config(&catalog),
    );

    let run = pipeline.run(&seen, now).await;
    tracing::info!(
        "Total new papers: {} across {} topics ({} topics failed to fetch)",
        run.total(),
        run.buckets.len(),
        run.failed_topics()
    );
    for report in &run.reports {
        match &report.fetch {
            FetchOutcome::Fetched { count } => tracing::debug!(
                "{}: fetched {}, admitted {}, enriched {}/{}",
                report.topic,
                count,
                report.admitted,
                report.enrichment.enriched(),
                report.enrichment.eligible
            ),
            FetchOutcome::Failed { reason } => {
                tracing::debug!("{}: fetch failed ({})", report.topic, reason)
            }
        }
    }
    for paper in run.top_cited(5).into_iter().filter(|p| p.citation_count > 0) {
        tracing::info!("  [{} citations] {}", paper.citation_count, paper.title);
    }

    // 3. Remember what was emitted
    seen.extend(run.admitted.iter().cloned());
    if let Err(e) = ledger.save(&seen).await {
        tracing::error!("Could not save ledger {:?}: {}", ledger.path(), e);
    }

    // 4. Publish
    let site = SiteWriter::new(&settings.output_dir, settings.site_info());
    let published = match site.publish(&run.buckets, now).await {
        Ok(published) => {
            tracing::info!("Published {} files to {:?}", published.files.len(), settings.output_dir);
            Some(published)
        }
        Err(e) => {
            tracing::error!("Could not write site to {:?}: {}", settings.output_dir, e);
            None
        }
    };

    // 5. Optional newsletter draft
    match (settings.buttondown_key(), published) {
        (Some(key), Some(published)) if published.total > 0 => {
            match send_newsletter(&settings.buttondown_url, key, &site, &published).await {
                Ok(id) => tracing::info!("Newsletter draft created: {}", id),
                Err(e) => tracing::warn!("Newsletter draft failed: {}", e),
            }
        }
        (None, _) => tracing::info!("No newsletter key configured, skipping newsletter"),
        _ => tracing::info!("Nothing to send, skipping newsletter"),
    }

    Ok(())
}

async fn send_newsletter(
    api_url: &str,
    api_key: String,
    site: &SiteWriter,
    published: &PublishedSite,
) -> ClientResult<String> {
    let client = NewsletterClient::new(api_url, api_key)?;
    client.send_draft(site.site(), published).await
}
