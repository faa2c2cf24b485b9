use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use quick_xml::escape::escape;
use tokio::fs;

use crate::error::RenderError;
use crate::layers::feed;
use crate::layers::{PaperRecord, TopicBucket};

/// Dated archive pages linked from the archive index.
pub const ARCHIVE_INDEX_LIMIT: usize = 90;

const CARD_AUTHORS: usize = 5;
const CARD_CATEGORIES: usize = 5;
const CARD_ABSTRACT_CHARS: usize = 500;

pub(crate) const STYLE: &str = r#"
:root { --bg: #f8f9fa; --surface: #fff; --text: #1a1a1a; --muted: #666;
        --accent: #0f3460; --accent-light: #e8edf3; --border: #e0e0e0; }
* { box-sizing: border-box; margin: 0; padding: 0; }
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
       max-width: 760px; margin: 0 auto; padding: 20px; color: var(--text);
       background: var(--bg); line-height: 1.6; }
a { color: var(--accent); text-decoration: none; }
a:hover { text-decoration: underline; }
.header { background: linear-gradient(135deg, #1a1a2e 0%, #0f3460 100%); color: white;
          padding: 30px; border-radius: 12px; margin-bottom: 24px; }
.header h1 { font-size: 24px; margin-bottom: 8px; }
.header a { color: white; }
.nav { display: flex; gap: 16px; margin-bottom: 20px; font-size: 14px; }
.sort-note { font-size: 12px; color: var(--muted); margin-bottom: 20px; padding: 8px 12px;
             background: var(--surface); border-left: 3px solid var(--accent); }
.topic { margin-bottom: 28px; }
.topic-header { font-size: 16px; font-weight: 700; color: var(--accent);
                border-bottom: 2px solid var(--accent); padding-bottom: 6px; margin-bottom: 14px; }
.paper { background: var(--surface); border: 1px solid var(--border); border-radius: 8px;
         padding: 16px; margin-bottom: 12px; }
.paper-title { font-size: 15px; font-weight: 600; margin-bottom: 6px; }
.paper-meta { font-size: 12px; color: var(--muted); margin-bottom: 4px; }
.paper-citations { margin-bottom: 8px; }
.badge { padding: 2px 8px; border-radius: 4px; font-size: 11px; font-weight: 600;
         display: inline-block; margin-right: 4px; }
.badge-new, .badge-relevance-none { background: #f0f0f0; color: #999; }
.badge-low { background: #f0f0f0; color: #666; }
.badge-med { background: #f5f5dc; color: #5a5a00; }
.badge-high { background: #e6f4e6; color: #2d6a2d; }
.badge-influential { background: #fff3e0; color: #e65100; }
.badge-relevance-high { background: #e3f2fd; color: #0d47a1; }
.badge-relevance-med { background: #e8eaf6; color: #283593; }
.badge-relevance-low { background: #f3e5f5; color: #6a1b9a; }
.paper-abstract { font-size: 13px; color: #333; }
.paper-cats { font-size: 11px; color: #888; margin-top: 8px; }
.paper-cats span { background: var(--accent-light); padding: 2px 8px; border-radius: 4px;
                   margin-right: 4px; display: inline-block; }
.paper-links { font-size: 12px; margin-top: 8px; }
.paper-links a { margin-right: 12px; }
.footer { text-align: center; font-size: 12px; color: #999; margin-top: 30px;
          padding-top: 16px; border-top: 1px solid var(--border); }
.no-papers { color: var(--muted); font-style: italic; padding: 12px; }
.archive-list { list-style: none; }
.archive-list li { padding: 8px 0; border-bottom: 1px solid var(--border); }
"#;

#[derive(Debug, Clone)]
pub struct SiteInfo {
    pub title: String,
    /// Base URL without trailing slash.
    pub url: String,
    pub description: String,
}

/// Output of a publish, reused by the newsletter.
#[derive(Debug, Clone)]
pub struct PublishedSite {
    pub papers_html: String,
    pub date_label: String,
    pub total: usize,
    pub files: Vec<PathBuf>,
}

pub struct SiteWriter {
    output_dir: PathBuf,
    site: SiteInfo,
}

impl SiteWriter {
    pub fn new(output_dir: impl Into<PathBuf>, site: SiteInfo) -> Self {
        Self { output_dir: output_dir.into(), site }
    }

    pub fn site(&self) -> &SiteInfo {
        &self.site
    }

    /// Writes the latest page, today's archive page, the archive index and the feed.
    pub async fn publish(
        &self,
        buckets: &[TopicBucket],
        now: DateTime<Utc>,
    ) -> Result<PublishedSite, RenderError> {
        let archive_dir = self.output_dir.join("archive");
        fs::create_dir_all(&archive_dir).await?;

        let date_label = now.format("%B %d, %Y").to_string();
        let iso_date = now.format("%Y-%m-%d").to_string();
        let total: usize = buckets.iter().map(|b| b.papers.len()).sum();
        let papers_html = render_papers(buckets);

        let mut files = Vec::new();

        let index = self.output_dir.join("index.html");
        fs::write(&index, self.latest_page(&papers_html, &date_label, total)).await?;
        tracing::info!("Generated {:?}", index);
        files.push(index);

        let dated = archive_dir.join(format!("{iso_date}.html"));
        fs::write(&dated, self.archive_page(&papers_html, &date_label, total)).await?;
        tracing::info!("Generated {:?}", dated);
        files.push(dated);

        let archive_index = archive_dir.join("index.html");
        let dates = list_archive_dates(&archive_dir).await?;
        fs::write(&archive_index, self.archive_index_page(&dates)).await?;
        tracing::info!("Generated {:?} ({} dated pages)", archive_index, dates.len());
        files.push(archive_index);

        let feed_path = self.output_dir.join("feed.xml");
        fs::write(&feed_path, feed::render_feed(&self.site, buckets, now)?).await?;
        tracing::info!("Generated {:?}", feed_path);
        files.push(feed_path);

        Ok(PublishedSite { papers_html, date_label, total, files })
    }

    fn head(&self, title: &str, with_feed: bool) -> String {
        let mut head = String::new();
        let _ = write!(
            head,
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n\
             <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
             <title>{}</title>\n",
            escape(title)
        );
        if with_feed {
            let _ = write!(
                head,
                "<meta name=\"description\" content=\"{}\">\n\
                 <link rel=\"alternate\" type=\"application/rss+xml\" title=\"{}\" href=\"{}/feed.xml\">\n",
                escape(&self.site.description),
                escape(&self.site.title),
                self.site.url
            );
        }
        let _ = write!(head, "<style>{STYLE}</style>\n</head>\n<body>\n");
        head
    }

    fn latest_page(&self, papers_html: &str, date_label: &str, total: usize) -> String {
        let url = &self.site.url;
        format!(
            "{head}<div class=\"header\">\n  <h1>{title}</h1>\n  <p>{date_label} &middot; {total} new paper{plural}</p>\n  \
             <p><a href=\"{url}/feed.xml\">RSS Feed</a></p>\n</div>\n\
             <nav class=\"nav\">\n  <a href=\"{url}/\">Today</a>\n  <a href=\"{url}/archive/\">Archive</a>\n</nav>\n\
             <div class=\"sort-note\">Sorted by relevance score (keyword match to priority topics), \
             then by citation count via Semantic Scholar.</div>\n\
             {papers_html}\
             <div class=\"footer\">Papers from <a href=\"https://arxiv.org\">arxiv.org</a> &middot; \
             Citations from <a href=\"https://www.semanticscholar.org\">Semantic Scholar</a><br>\
             Subscribe via <a href=\"{url}/feed.xml\">RSS</a></div>\n</body>\n</html>\n",
            head = self.head(&self.site.title, true),
            title = escape(&self.site.title),
            plural = if total == 1 { "" } else { "s" },
        )
    }

    fn archive_page(&self, papers_html: &str, date_label: &str, total: usize) -> String {
        let url = &self.site.url;
        format!(
            "{head}<div class=\"header\">\n  <h1>{title}</h1>\n  <p>{date_label} &middot; {total} papers</p>\n</div>\n\
             <nav class=\"nav\">\n  <a href=\"{url}/\">&larr; Latest</a>\n  <a href=\"{url}/archive/\">Archive</a>\n</nav>\n\
             {papers_html}\
             <div class=\"footer\"><a href=\"{url}/\">Back to latest</a></div>\n</body>\n</html>\n",
            head = self.head(&format!("{} - {}", self.site.title, date_label), false),
            title = escape(&self.site.title),
        )
    }

    fn archive_index_page(&self, dates: &[String]) -> String {
        let url = &self.site.url;
        let mut links = String::new();
        for stem in dates.iter().take(ARCHIVE_INDEX_LIMIT) {
            let label = NaiveDate::parse_from_str(stem, "%Y-%m-%d")
                .map(|d| d.format("%B %d, %Y").to_string())
                .unwrap_or_else(|_| stem.clone());
            let _ = writeln!(
                links,
                "<li><a href=\"{url}/archive/{stem}.html\">{}</a></li>",
                escape(&label)
            );
        }
        format!(
            "{head}<div class=\"header\">\n  <h1>{title}</h1>\n  <p>Archive</p>\n</div>\n\
             <nav class=\"nav\">\n  <a href=\"{url}/\">&larr; Latest</a>\n</nav>\n\
             <ul class=\"archive-list\">\n{links}</ul>\n\
             <div class=\"footer\"><a href=\"{url}/\">Back to latest</a></div>\n</body>\n</html>\n",
            head = self.head(&format!("{} - Archive", self.site.title), false),
            title = escape(&self.site.title),
        )
    }
}

/// Stems of dated archive pages, newest first.
async fn list_archive_dates(archive_dir: &std::path::Path) -> Result<Vec<String>, RenderError> {
    let mut dates = Vec::new();
    let mut entries = fs::read_dir(archive_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("html") {
            continue;
        }
        match path.file_stem().and_then(|s| s.to_str()) {
            Some("index") | None => {}
            Some(stem) => dates.push(stem.to_string()),
        }
    }
    dates.sort_unstable_by(|a, b| b.cmp(a));
    Ok(dates)
}

/// The topic sections shared by the latest page, the archive page and the newsletter.
pub fn render_papers(buckets: &[TopicBucket]) -> String {
    let mut html = String::new();
    for bucket in buckets.iter().filter(|b| !b.papers.is_empty()) {
        let _ = writeln!(
            html,
            "<div class=\"topic\"><div class=\"topic-header\">{} ({})</div>",
            escape(&bucket.topic),
            bucket.papers.len()
        );
        for paper in &bucket.papers {
            html.push_str(&render_card(paper));
        }
        html.push_str("</div>\n");
    }
    if html.is_empty() {
        html.push_str("<p class=\"no-papers\">No new papers found today. Check back tomorrow.</p>\n");
    }
    html
}

fn render_card(paper: &PaperRecord) -> String {
    let mut authors = paper
        .authors
        .iter()
        .take(CARD_AUTHORS)
        .map(|a| escape(a).into_owned())
        .collect::<Vec<_>>()
        .join(", ");
    if paper.authors.len() > CARD_AUTHORS {
        let _ = write!(authors, " + {} more", paper.authors.len() - CARD_AUTHORS);
    }

    let categories: String = paper
        .categories
        .iter()
        .take(CARD_CATEGORIES)
        .map(|c| format!("<span>{}</span>", escape(c)))
        .collect();

    let abs_url = escape(&paper.abs_url);
    let mut links = format!("<a href=\"{abs_url}\">ArXiv</a>");
    if let Some(pdf) = &paper.pdf_url {
        let _ = write!(links, " <a href=\"{}\">PDF</a>", escape(pdf));
    }
    if let Some(s2) = paper.citation_url.as_deref().filter(|u| !u.is_empty()) {
        let _ = write!(links, " <a href=\"{}\">Semantic Scholar</a>", escape(s2));
    }

    let published: String = paper.published.chars().take(10).collect();

    format!(
        "<div class=\"paper\">\n  <div class=\"paper-title\"><a href=\"{abs_url}\">{title}</a></div>\n  \
         <div class=\"paper-meta\">{authors} &middot; {published}</div>\n  \
         <div class=\"paper-citations\">{badges}</div>\n  \
         <div class=\"paper-abstract\">{abstract_text}</div>\n  \
         <div class=\"paper-cats\">{categories}</div>\n  \
         <div class=\"paper-links\">{links}</div>\n</div>\n",
        title = escape(&paper.title),
        published = escape(&published),
        badges = metrics_badges(paper),
        abstract_text = escape(&truncate_chars(&paper.abstract_text, CARD_ABSTRACT_CHARS)),
    )
}

/// Relevance badge followed by citation badges.
pub fn metrics_badges(paper: &PaperRecord) -> String {
    let score = paper.relevance_score;
    let relevance_class = match score {
        s if s >= 50 => "badge-relevance-high",
        s if s >= 25 => "badge-relevance-med",
        s if s > 0 => "badge-relevance-low",
        _ => "badge-relevance-none",
    };
    let mut parts = vec![format!(
        "<span class=\"badge {relevance_class}\">Relevance: {score}/100</span>"
    )];

    let cited = paper.citation_count;
    let influential = paper.influential_citation_count;
    if cited == 0 && influential == 0 {
        parts.push("<span class=\"badge badge-new\">Citations: 0 (new)</span>".to_string());
    } else {
        if cited > 0 {
            let class = match cited {
                c if c >= 10 => "badge-high",
                c if c >= 3 => "badge-med",
                _ => "badge-low",
            };
            parts.push(format!("<span class=\"badge {class}\">Citations: {cited}</span>"));
        }
        if influential > 0 {
            parts.push(format!(
                "<span class=\"badge badge-influential\">{influential} influential</span>"
            ));
        }
    }
    parts.join(" ")
}

/// First `max` characters, with `...` appended when something was cut.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    let mut out: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        out.push_str("...");
    }
    out
}
