//! Optional newsletter draft via the Buttondown email API.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::api;
use crate::error::{ClientError, ClientResult};
use crate::layers::site::{PublishedSite, SiteInfo, STYLE};

#[derive(Serialize)]
struct DraftEmail<'a> {
    subject: String,
    body: String,
    status: &'a str,
}

#[derive(Deserialize)]
struct CreatedEmail {
    id: Option<String>,
}

pub struct NewsletterClient {
    client: Client,
    api_url: String,
    api_key: String,
}

impl NewsletterClient {
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> ClientResult<Self> {
        let client = Client::builder()
            .user_agent(api::USER_AGENT)
            .timeout(api::NEWSLETTER_TIMEOUT)
            .build()?;
        Ok(Self { client, api_url: api_url.into(), api_key: api_key.into() })
    }

    /// Creates a draft email; returns the provider's id for it.
    pub async fn send_draft(&self, site: &SiteInfo, published: &PublishedSite) -> ClientResult<String> {
        let draft = DraftEmail {
            subject: format!(
                "{}: {} new papers ({})",
                site.title, published.total, published.date_label
            ),
            body: email_body(site, published),
            status: "draft",
        };

        let resp = self
            .client
            .post(format!("{}/v1/emails", self.api_url))
            .header("Authorization", format!("Token {}", self.api_key))
            .json(&draft)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::status(status.as_u16(), body));
        }
        let text = resp.text().await?;
        let created: CreatedEmail = serde_json::from_str(&text)?;
        Ok(created.id.unwrap_or_else(|| "unknown".to_string()))
    }
}

fn email_body(site: &SiteInfo, published: &PublishedSite) -> String {
    let title = quick_xml::escape::escape(&site.title);
    let url = &site.url;
    format!(
        "<style>{STYLE}</style>\n\
         <div style=\"max-width:700px;margin:0 auto;\">\n\
         <h1 style=\"color:#0f3460;\">{title}</h1>\n\
         <p style=\"color:#666;\">{date} &middot; {total} new papers</p>\n\
         <hr style=\"border:1px solid #e0e0e0;margin:16px 0;\">\n\
         {papers}\
         <hr style=\"border:1px solid #e0e0e0;margin:16px 0;\">\n\
         <p style=\"font-size:12px;color:#999;text-align:center;\">\
         <a href=\"{url}\">View on web</a> &middot; <a href=\"{url}/feed.xml\">RSS feed</a></p>\n\
         </div>",
        date = published.date_label,
        total = published.total,
        papers = published.papers_html,
    )
}
