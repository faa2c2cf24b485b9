use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{direct::NotKeyed, InMemoryState};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use regex::Regex;
use reqwest::Client;

use crate::config::api;
use crate::error::{ClientError, ClientResult};
use crate::layers::PaperRecord;

static ARXIV_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4}\.\d{4,5})(v\d+)?").expect("valid arXiv id pattern"));

/// Where candidate papers come from.
#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Newest-first results matching any keyword within any category.
    async fn search(
        &self,
        keywords: &[String],
        categories: &[String],
        limit: usize,
    ) -> ClientResult<Vec<PaperRecord>>;
}

pub struct ArxivClient {
    client: Client,
    query_url: String,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl ArxivClient {
    pub fn new(query_url: impl Into<String>) -> ClientResult<Self> {
        let client = Client::builder()
            .user_agent(api::USER_AGENT)
            .timeout(api::SOURCE_TIMEOUT)
            .build()?;

        // arXiv asks for no more than one request every three seconds.
        let quota = Quota::per_minute(nonzero!(20u32)).allow_burst(nonzero!(1u32));

        Ok(Self {
            client,
            query_url: query_url.into(),
            limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    pub fn with_quota(mut self, quota: Quota) -> Self {
        self.limiter = Arc::new(RateLimiter::direct(quota));
        self
    }

    fn request_url(&self, query: &str, limit: usize) -> String {
        format!(
            "{}?search_query={}&start=0&max_results={}&sortBy=submittedDate&sortOrder=descending",
            self.query_url,
            urlencoding::encode(query),
            limit
        )
    }
}

#[async_trait]
impl PaperSource for ArxivClient {
    async fn search(
        &self,
        keywords: &[String],
        categories: &[String],
        limit: usize,
    ) -> ClientResult<Vec<PaperRecord>> {
        self.limiter.until_ready().await;

        let url = self.request_url(&build_query(keywords, categories), limit);
        tracing::debug!("Querying arXiv: {}", url);

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::status(status.as_u16(), body));
        }
        let text = resp.text().await?;
        parse_feed(&text)
    }
}

/// `(all:"multi word" OR all:word) AND (cat:a OR cat:b)`.
pub fn build_query(keywords: &[String], categories: &[String]) -> String {
    let keyword_part = keywords
        .iter()
        .map(|kw| {
            if kw.contains(' ') {
                format!("all:\"{kw}\"")
            } else {
                format!("all:{kw}")
            }
        })
        .collect::<Vec<_>>()
        .join(" OR ");
    let category_part = categories
        .iter()
        .map(|c| format!("cat:{c}"))
        .collect::<Vec<_>>()
        .join(" OR ");
    format!("({keyword_part}) AND ({category_part})")
}

/// Pulls the new-style identifier (`2401.01234`) out of an entry id,
/// dropping any version suffix.
pub fn extract_arxiv_id(raw: &str) -> Option<String> {
    ARXIV_ID
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(PartialEq, Clone, Copy)]
enum TagState {
    None,
    Id,
    Title,
    Summary,
    Published,
    Updated,
    AuthorName,
}

#[derive(Default)]
struct EntryBuilder {
    id: String,
    title: String,
    summary: String,
    published: String,
    updated: String,
    authors: Vec<String>,
    abs_url: String,
    pdf_url: Option<String>,
    categories: Vec<String>,
}

impl EntryBuilder {
    fn link(&mut self, e: &BytesStart<'_>) {
        let href = attribute(e, b"href").unwrap_or_default();
        if attribute(e, b"title").as_deref() == Some("pdf") {
            self.pdf_url = Some(href);
        } else if href.contains("abs") {
            self.abs_url = href;
        }
    }

    fn category(&mut self, e: &BytesStart<'_>) {
        if let Some(term) = attribute(e, b"term").filter(|t| !t.is_empty()) {
            self.categories.push(term);
        }
    }

    fn finish(self) -> PaperRecord {
        let title = flatten(&self.title);
        PaperRecord {
            title: if title.is_empty() { "No title".to_string() } else { title },
            abstract_text: flatten(&self.summary),
            authors: self.authors,
            published: self.published.trim().to_string(),
            updated: self.updated.trim().to_string(),
            arxiv_id: extract_arxiv_id(&self.id),
            abs_url: self.abs_url,
            pdf_url: self.pdf_url.filter(|u| !u.is_empty()),
            categories: self.categories,
            ..Default::default()
        }
    }
}

fn tag_state(name: &[u8]) -> TagState {
    match name {
        b"id" => TagState::Id,
        b"title" => TagState::Title,
        b"summary" => TagState::Summary,
        b"published" => TagState::Published,
        b"updated" => TagState::Updated,
        b"name" => TagState::AuthorName,
        _ => TagState::None,
    }
}

fn flatten(text: &str) -> String {
    text.trim().replace('\n', " ")
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .map(|attr| {
            let raw = String::from_utf8_lossy(&attr.value).into_owned();
            let unescaped = unescape(&raw).map(|v| v.into_owned()).ok();
            unescaped.unwrap_or(raw)
        })
}

/// Parses an arXiv Atom feed into records, in feed order.
pub fn parse_feed(xml: &str) -> ClientResult<Vec<PaperRecord>> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut papers = Vec::new();
    let mut entry: Option<EntryBuilder> = None;
    let mut state = TagState::None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = e.name();
                match name.as_ref() {
                    b"entry" => {
                        entry = Some(EntryBuilder::default());
                        state = TagState::None;
                    }
                    b"link" => {
                        if let Some(current) = entry.as_mut() {
                            current.link(&e);
                        }
                    }
                    b"category" => {
                        if let Some(current) = entry.as_mut() {
                            current.category(&e);
                        }
                    }
                    other if entry.is_some() => {
                        state = tag_state(other);
                        text.clear();
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if let Some(current) = entry.as_mut() {
                    match e.name().as_ref() {
                        b"link" => current.link(&e),
                        b"category" => current.category(&e),
                        _ => {}
                    }
                }
            }
            Event::Text(e) if state != TagState::None => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Event::CData(e) if state != TagState::None => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Event::GeneralRef(e) if state != TagState::None => {
                let reference = format!("&{};", String::from_utf8_lossy(&e));
                let resolved = unescape(&reference).map(|v| v.into_owned()).ok();
                text.push_str(&resolved.unwrap_or(reference));
            }
            Event::End(e) => {
                if e.name().as_ref() == b"entry" {
                    if let Some(done) = entry.take() {
                        if done.id.contains("/api/errors") {
                            tracing::warn!("arXiv rejected the query: {}", flatten(&done.summary));
                        } else {
                            let paper = done.finish();
                            tracing::debug!(
                                "Parsed arXiv entry: title='{}', id={:?}",
                                paper.title,
                                paper.arxiv_id
                            );
                            papers.push(paper);
                        }
                    }
                } else if let Some(current) = entry.as_mut() {
                    let value = std::mem::take(&mut text);
                    match state {
                        TagState::Id => current.id = value,
                        TagState::Title => current.title = value,
                        TagState::Summary => current.summary = value,
                        TagState::Published => current.published = value,
                        TagState::Updated => current.updated = value,
                        TagState::AuthorName => {
                            let name = value.trim();
                            if !name.is_empty() {
                                current.authors.push(name.to_string());
                            }
                        }
                        TagState::None => {}
                    }
                }
                state = TagState::None;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(papers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query: search_query=all:jailbreak</title>
  <id>http://arxiv.org/api/abc</id>
  <updated>2024-06-15T00:00:00-04:00</updated>
  <entry>
    <id>http://arxiv.org/abs/2406.01234v2</id>
    <updated>2024-06-14T17:59:59Z</updated>
    <published>2024-06-10T10:00:00Z</published>
    <title>Jailbreaking Chat Models
  via Role Play &amp; Persuasion</title>
    <summary>  We study jailbreak attacks.
We find &lt;many&gt; issues.
</summary>
    <author>
      <name>Ada Lovelace</name>
    </author>
    <author>
      <name>Alan Turing</name>
      <arxiv:affiliation>Bletchley</arxiv:affiliation>
    </author>
    <arxiv:comment>12 pages</arxiv:comment>
    <link href="http://arxiv.org/abs/2406.01234v2" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2406.01234v2" rel="related" type="application/pdf"/>
    <arxiv:primary_category term="cs.CR" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.CR" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/cs/0112017v1</id>
    <updated>2024-06-13T00:00:00Z</updated>
    <published>2024-06-13T00:00:00Z</published>
    <title>Old Style Identifier</title>
    <summary>Legacy.</summary>
    <link href="http://arxiv.org/abs/cs/0112017v1" rel="alternate" type="text/html"/>
    <category term="cs.AI" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
</feed>"#;

    fn unthrottled() -> Quota {
        Quota::per_second(nonzero!(1000u32))
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_query_quotes_phrases_only() {
        let query = build_query(
            &strings(&["red teaming", "PyRIT", "jailbreak"]),
            &strings(&["cs.CR", "cs.AI"]),
        );
        assert_eq!(
            query,
            r#"(all:"red teaming" OR all:PyRIT OR all:jailbreak) AND (cat:cs.CR OR cat:cs.AI)"#
        );
    }

    #[test]
    fn test_extract_arxiv_id_drops_version() {
        assert_eq!(
            extract_arxiv_id("http://arxiv.org/abs/2406.01234v2").as_deref(),
            Some("2406.01234")
        );
        assert_eq!(extract_arxiv_id("http://arxiv.org/abs/2312.9999").as_deref(), Some("2312.9999"));
        assert_eq!(extract_arxiv_id("http://arxiv.org/abs/cs/0112017v1"), None);
    }

    #[test]
    fn test_parse_feed_extracts_entry_fields() {
        let papers = parse_feed(FEED).unwrap();
        assert_eq!(papers.len(), 2);

        let first = &papers[0];
        assert_eq!(first.title, "Jailbreaking Chat Models   via Role Play & Persuasion");
        assert_eq!(first.abstract_text, "We study jailbreak attacks. We find <many> issues.");
        assert_eq!(first.authors, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(first.published, "2024-06-10T10:00:00Z");
        assert_eq!(first.updated, "2024-06-14T17:59:59Z");
        assert_eq!(first.arxiv_id.as_deref(), Some("2406.01234"));
        assert_eq!(first.abs_url, "http://arxiv.org/abs/2406.01234v2");
        assert_eq!(first.pdf_url.as_deref(), Some("http://arxiv.org/pdf/2406.01234v2"));
        assert_eq!(first.categories, vec!["cs.CR", "cs.CL"]);
        assert_eq!(first.citation_count, 0);
        assert_eq!(first.relevance_score, 0);
    }

    #[test]
    fn test_parse_feed_keeps_records_without_identifier() {
        let papers = parse_feed(FEED).unwrap();
        let legacy = &papers[1];
        assert_eq!(legacy.title, "Old Style Identifier");
        assert!(legacy.arxiv_id.is_none());
        assert!(legacy.pdf_url.is_none());
    }

    #[test]
    fn test_parse_feed_skips_error_entries() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <id>http://arxiv.org/api/errors#incorrect_id_format</id>
    <title>Error</title>
    <summary>incorrect id format</summary>
  </entry>
</feed>"#;
        assert!(parse_feed(xml).unwrap().is_empty());
    }

    #[test]
    fn test_parse_feed_defaults_missing_title() {
        let xml = r#"<feed><entry><id>http://arxiv.org/abs/2401.00001v1</id></entry></feed>"#;
        let papers = parse_feed(xml).unwrap();
        assert_eq!(papers[0].title, "No title");
        assert_eq!(papers[0].abstract_text, "");
    }

    #[test]
    fn test_parse_feed_rejects_malformed_xml() {
        assert!(parse_feed("<feed><entry><title>x</summary></entry></feed>").is_err());
    }

    #[tokio::test]
    async fn test_search_sends_sorted_capped_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .and(query_param("max_results", "25"))
            .and(query_param("sortBy", "submittedDate"))
            .and(query_param("sortOrder", "descending"))
            .and(query_param("search_query", "(all:jailbreak) AND (cat:cs.CR)"))
            .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
            .expect(1)
            .mount(&server)
            .await;

        let client = ArxivClient::new(format!("{}/api/query", server.uri()))
            .unwrap()
            .with_quota(unthrottled());
        let papers = client
            .search(&strings(&["jailbreak"]), &strings(&["cs.CR"]), 25)
            .await
            .unwrap();
        assert_eq!(papers.len(), 2);
    }

    #[tokio::test]
    async fn test_search_reports_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/query"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let client = ArxivClient::new(format!("{}/api/query", server.uri()))
            .unwrap()
            .with_quota(unthrottled());
        let err = client
            .search(&strings(&["jailbreak"]), &strings(&["cs.CR"]), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 503, .. }));
    }
}
