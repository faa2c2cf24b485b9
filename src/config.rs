//! Run configuration: CLI/environment settings plus the topic catalog.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::layers::relevance::WeightedPhrase;
use crate::layers::site::SiteInfo;

/// External endpoints and politeness constants.
pub mod api {
    use std::time::Duration;

    pub const USER_AGENT: &str = concat!("paper-digest/", env!("CARGO_PKG_VERSION"));

    pub const ARXIV_QUERY_URL: &str = "http://export.arxiv.org/api/query";
    pub const SEMANTIC_SCHOLAR_API: &str = "https://api.semanticscholar.org/graph/v1";
    pub const BUTTONDOWN_API: &str = "https://api.buttondown.com";

    pub const SOURCE_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CITATION_BATCH_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CITATION_SINGLE_TIMEOUT: Duration = Duration::from_secs(15);
    pub const NEWSLETTER_TIMEOUT: Duration = Duration::from_secs(30);

    /// Identifiers per bulk citation request.
    pub const CITATION_BATCH_SIZE: usize = 100;
    /// Pause between bulk citation requests.
    pub const CITATION_BATCH_PAUSE: Duration = Duration::from_secs(1);
    /// Pause between single lookups after a bulk request failed.
    pub const CITATION_FALLBACK_PAUSE: Duration = Duration::from_millis(700);

    pub const CITATION_FIELDS: &str = "citationCount,influentialCitationCount,url";
}

const DEFAULT_SITE_TITLE: &str = "AI Security Research Digest";
const DEFAULT_SITE_URL: &str = "https://ek0212.github.io/arxiv-ai-security-digest";
const DEFAULT_SITE_DESCRIPTION: &str = "Daily digest of ArXiv papers on AI security, red/blue teaming, \
prompt injection, jailbreaking, model poisoning, AI ethics, LLM efficiency, sector-specific risks, \
network security, and OS security. Sorted by relevance and citation count.";

/// Daily arXiv digest: fetch, dedup, score, enrich, publish.
#[derive(Debug, Clone, Parser)]
#[command(name = "paper-digest", version)]
pub struct Settings {
    /// Only papers published or updated within this many days are new.
    #[arg(
        long,
        env = "LOOKBACK_DAYS",
        default_value_t = 7,
        value_parser = clap::value_parser!(u32).range(1..=36500)
    )]
    pub lookback_days: u32,

    /// Result cap for each topic query.
    #[arg(long, env = "MAX_RESULTS", default_value_t = 50)]
    pub max_results: usize,

    /// Seen-papers ledger (JSON array of fingerprints).
    #[arg(long, env = "SEEN_PAPERS_FILE", default_value = "seen_papers.json")]
    pub ledger: PathBuf,

    /// Identifiers per bulk citation request.
    #[arg(long, env = "CITATION_BATCH_SIZE", default_value_t = api::CITATION_BATCH_SIZE)]
    pub citation_batch_size: usize,

    #[arg(long, env = "OUTPUT_DIR", default_value = "public")]
    pub output_dir: PathBuf,

    /// JSON catalog overriding categories, topics and relevance weights.
    #[arg(long, env = "DIGEST_CATALOG")]
    pub catalog: Option<PathBuf>,

    #[arg(long, env = "SITE_TITLE", default_value = DEFAULT_SITE_TITLE)]
    pub site_title: String,

    #[arg(long, env = "SITE_URL", default_value = DEFAULT_SITE_URL, value_parser = parse_url)]
    pub site_url: String,

    #[arg(long, env = "SITE_DESCRIPTION", default_value = DEFAULT_SITE_DESCRIPTION)]
    pub site_description: String,

    #[arg(long, env = "SEMANTIC_SCHOLAR_API_KEY", hide_env_values = true)]
    pub semantic_scholar_api_key: Option<String>,

    /// Enables the newsletter draft when set.
    #[arg(long, env = "BUTTONDOWN_API_KEY", hide_env_values = true)]
    pub buttondown_api_key: Option<String>,

    #[arg(long, env = "ARXIV_API_URL", default_value = api::ARXIV_QUERY_URL, value_parser = parse_url)]
    pub arxiv_url: String,

    #[arg(long, env = "SEMANTIC_SCHOLAR_API_URL", default_value = api::SEMANTIC_SCHOLAR_API, value_parser = parse_url)]
    pub semantic_scholar_url: String,

    #[arg(long, env = "BUTTONDOWN_API_URL", default_value = api::BUTTONDOWN_API, value_parser = parse_url)]
    pub buttondown_url: String,
}

fn parse_url(raw: &str) -> Result<String, String> {
    url::Url::parse(raw)
        .map(|_| raw.trim_end_matches('/').to_string())
        .map_err(|e| format!("invalid URL '{raw}': {e}"))
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

impl Settings {
    pub fn semantic_scholar_key(&self) -> Option<String> {
        non_empty(&self.semantic_scholar_api_key)
    }

    pub fn buttondown_key(&self) -> Option<String> {
        non_empty(&self.buttondown_api_key)
    }

    pub fn pipeline_config(&self, catalog: &Catalog) -> PipelineConfig {
        PipelineConfig {
            lookback_days: self.lookback_days,
            max_results: self.max_results,
            categories: catalog.categories.clone(),
            topics: catalog.topics.clone(),
        }
    }

    pub fn site_info(&self) -> SiteInfo {
        SiteInfo {
            title: self.site_title.clone(),
            url: self.site_url.clone(),
            description: self.site_description.clone(),
        }
    }
}

/// What the core pipeline consumes.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub lookback_days: u32,
    pub max_results: usize,
    pub categories: Vec<String>,
    pub topics: Vec<Topic>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topic {
    pub name: String,
    pub keywords: Vec<String>,
}

impl Topic {
    pub fn new(name: &str, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Categories, topics and relevance weights. Omitted sections keep the
/// built-in tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub categories: Vec<String>,
    pub topics: Vec<Topic>,
    pub relevance: Vec<WeightedPhrase>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            topics: default_topics(),
            relevance: default_relevance(),
        }
    }
}

impl Catalog {
    /// Every query needs at least one category and one keyword.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.categories.is_empty(), "no categories configured");
        anyhow::ensure!(!self.topics.is_empty(), "no topics configured");
        for topic in &self.topics {
            anyhow::ensure!(
                topic.keywords.iter().any(|k| !k.trim().is_empty()),
                "topic '{}' has no keywords",
                topic.name
            );
        }
        Ok(())
    }

    pub async fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading catalog {}", path.display()))?;
        let catalog: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing catalog {}", path.display()))?;
        catalog
            .validate()
            .with_context(|| format!("invalid catalog {}", path.display()))?;
        tracing::info!(
            "Loaded catalog {:?}: {} categories, {} topics, {} weighted phrases",
            path,
            catalog.categories.len(),
            catalog.topics.len(),
            catalog.relevance.len()
        );
        Ok(catalog)
    }
}

pub fn default_categories() -> Vec<String> {
    ["cs.CR", "cs.AI", "cs.LG", "cs.CL", "cs.SE", "cs.MA", "cs.NI", "cs.OS"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

pub fn default_topics() -> Vec<Topic> {
    vec![
        Topic::new(
            "AI Red Teaming & Blue Teaming",
            &[
                "red teaming",
                "blue teaming",
                "red team",
                "blue team",
                "adversarial testing",
                "AI safety evaluation",
                "PyRIT",
                "automated red teaming",
            ],
        ),
        Topic::new(
            "Prompt Injection & Jailbreaking",
            &[
                "prompt injection",
                "jailbreak",
                "jailbreaking",
                "guardrail bypass",
                "safety alignment bypass",
                "indirect prompt injection",
                "XPIA",
            ],
        ),
        Topic::new(
            "LLM Security & Vulnerabilities",
            &[
                "LLM security",
                "large language model security",
                "LLM vulnerability",
                "LLM attack",
                "adversarial prompt",
                "AI vulnerability",
                "data leakage LLM",
                "generative AI security",
            ],
        ),
        Topic::new(
            "Model Poisoning & Backdoors",
            &[
                "model poisoning",
                "backdoor attack",
                "sleeper agent",
                "trojan model",
                "data poisoning",
                "training data attack",
            ],
        ),
        Topic::new(
            "Agentic AI Security",
            &[
                "agentic AI security",
                "AI agent security",
                "multi-agent security",
                "tool-use vulnerability",
                "agent hijacking",
                "autonomous agent risk",
            ],
        ),
        Topic::new(
            "AI Safety & Robustness",
            &[
                "AI safety",
                "model robustness",
                "adversarial robustness",
                "safety guardrail",
                "content filter bypass",
                "AI alignment",
                "responsible AI",
                "technical guardrail",
            ],
        ),
        Topic::new(
            "AI Ethics & Governance",
            &[
                "AI ethics",
                "AI governance",
                "responsible AI",
                "AI accountability",
                "algorithmic fairness",
                "AI regulation",
                "AI oversight",
                "ethical AI",
                "AI transparency",
                "AI audit",
            ],
        ),
        Topic::new(
            "Sector-Specific AI Risks",
            &[
                "financial AI risk",
                "AI financial services",
                "LLM finance",
                "AI manipulation",
                "manipulative AI",
                "AI advisory risk",
                "healthcare AI security",
                "AI fraud detection",
                "deepfake finance",
                "AI compliance",
            ],
        ),
        Topic::new(
            "LLM Efficiency & Optimization",
            &[
                "LLM inference optimization",
                "KV cache",
                "LLM caching",
                "model compression",
                "speculative decoding",
                "LLM efficiency",
                "token pruning",
                "model distillation",
                "quantization LLM",
                "attention optimization",
                "GenCache",
                "structural pattern matching LLM",
            ],
        ),
        Topic::new(
            "Benchmarking & Evaluation",
            &[
                "LLM benchmark security",
                "safety benchmark",
                "red teaming benchmark",
                "vulnerability scanner AI",
                "AI risk assessment",
            ],
        ),
        Topic::new(
            "Network Security",
            &[
                "network intrusion detection",
                "network anomaly detection",
                "DDoS detection",
                "network traffic analysis",
                "firewall evasion",
                "network forensics",
                "zero trust network",
                "software defined networking security",
                "DNS security",
                "BGP security",
                "network threat detection",
                "deep packet inspection",
                "encrypted traffic analysis",
                "lateral movement detection",
                "network segmentation",
            ],
        ),
        Topic::new(
            "Operating System Security",
            &[
                "operating system security",
                "kernel security",
                "kernel exploit",
                "privilege escalation",
                "container security",
                "sandbox escape",
                "memory safety",
                "buffer overflow",
                "return oriented programming",
                "OS hardening",
                "access control",
                "malware detection",
                "rootkit detection",
                "supply chain attack",
                "firmware security",
                "trusted execution environment",
            ],
        ),
    ]
}

pub fn default_relevance() -> Vec<WeightedPhrase> {
    const TABLE: &[(&str, u32)] = &[
        // red teaming & automated security testing
        ("red teaming", 10),
        ("red team", 10),
        ("blue teaming", 10),
        ("blue team", 10),
        ("PyRIT", 10),
        ("automated red team", 10),
        ("adversarial testing", 8),
        // jailbreaking & prompt injection
        ("jailbreak", 10),
        ("prompt injection", 10),
        ("guardrail bypass", 10),
        ("indirect prompt injection", 10),
        ("XPIA", 10),
        ("safety bypass", 9),
        // generative AI security
        ("generative AI security", 9),
        ("LLM security", 9),
        ("LLM attack", 9),
        ("LLM vulnerability", 9),
        ("large language model security", 9),
        ("adversarial prompt", 8),
        ("data leakage", 8),
        // poisoning & backdoors
        ("model poisoning", 8),
        ("backdoor attack", 8),
        ("sleeper agent", 8),
        ("trojan model", 8),
        ("data poisoning", 8),
        ("training data attack", 8),
        // agentic AI
        ("agentic AI", 9),
        ("AI agent security", 9),
        ("agent hijacking", 9),
        ("multi-agent security", 8),
        ("tool-use vulnerability", 8),
        // safety & guardrails
        ("AI safety", 8),
        ("safety guardrail", 8),
        ("content filter", 7),
        ("AI alignment", 7),
        ("robustness", 6),
        ("responsible AI", 7),
        // ethics & governance
        ("AI ethics", 7),
        ("AI governance", 7),
        ("AI accountability", 7),
        ("algorithmic fairness", 6),
        ("AI regulation", 7),
        ("AI oversight", 7),
        ("AI audit", 7),
        ("AI transparency", 6),
        // sector risks
        ("financial AI", 8),
        ("AI financial services", 8),
        ("manipulative", 7),
        ("AI advisory", 7),
        ("AI fraud", 7),
        ("deepfake", 7),
        ("AI compliance", 7),
        // efficiency
        ("KV cache", 7),
        ("LLM caching", 7),
        ("inference optimization", 7),
        ("model compression", 6),
        ("speculative decoding", 7),
        ("GenCache", 8),
        ("token pruning", 6),
        ("model distillation", 6),
        ("quantization", 5),
        ("attention optimization", 6),
        // network & OS security
        ("intrusion detection", 5),
        ("DDoS", 5),
        ("zero trust", 5),
        ("kernel security", 5),
        ("privilege escalation", 5),
        ("container security", 5),
        ("supply chain attack", 6),
        ("malware detection", 5),
    ];
    TABLE.iter().map(|&(phrase, weight)| WeightedPhrase::new(phrase, weight)).collect()
}
