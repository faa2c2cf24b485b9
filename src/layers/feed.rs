use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::RenderError;
use crate::layers::site::{truncate_chars, SiteInfo};
use crate::layers::{PaperRecord, TopicBucket};

const ITEM_DESCRIPTION_CHARS: usize = 300;

/// RSS 2.0 feed with one item per paper across all topics.
pub fn render_feed(
    site: &SiteInfo,
    buckets: &[TopicBucket],
    now: DateTime<Utc>,
) -> Result<String, RenderError> {
    let build_date = now.to_rfc2822();
    let self_url = format!("{}/feed.xml", site.url);

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    writer.write_event(Event::Start(BytesStart::new("rss").with_attributes([
        ("version", "2.0"),
        ("xmlns:atom", "http://www.w3.org/2005/Atom"),
    ])))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;

    text_element(&mut writer, "title", &site.title)?;
    text_element(&mut writer, "link", &site.url)?;
    text_element(&mut writer, "description", &site.description)?;
    text_element(&mut writer, "language", "en-us")?;
    text_element(&mut writer, "lastBuildDate", &build_date)?;
    writer.write_event(Event::Empty(BytesStart::new("atom:link").with_attributes([
        ("href", self_url.as_str()),
        ("rel", "self"),
        ("type", "application/rss+xml"),
    ])))?;

    for bucket in buckets {
        for paper in &bucket.papers {
            write_item(&mut writer, &bucket.topic, paper, &build_date)?;
        }
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;

    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

fn write_item(
    writer: &mut Writer<Vec<u8>>,
    topic: &str,
    paper: &PaperRecord,
    pub_date: &str,
) -> Result<(), RenderError> {
    let cite_note = if paper.citation_count > 0 {
        format!(" [{} citations]", paper.citation_count)
    } else {
        String::new()
    };
    let title = format!("[{topic}]{cite_note} [rel:{}] {}", paper.relevance_score, paper.title);

    writer.write_event(Event::Start(BytesStart::new("item")))?;
    text_element(writer, "title", &title)?;
    text_element(writer, "link", &paper.abs_url)?;
    writer.write_event(Event::Start(
        BytesStart::new("guid").with_attributes([("isPermaLink", "true")]),
    ))?;
    writer.write_event(Event::Text(BytesText::new(&paper.abs_url)))?;
    writer.write_event(Event::End(BytesEnd::new("guid")))?;
    text_element(
        writer,
        "description",
        &truncate_chars(&paper.abstract_text, ITEM_DESCRIPTION_CHARS),
    )?;
    text_element(writer, "pubDate", pub_date)?;
    text_element(writer, "category", topic)?;
    writer.write_event(Event::End(BytesEnd::new("item")))?;
    Ok(())
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<(), RenderError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn site() -> SiteInfo {
        SiteInfo {
            title: "Security & Safety Digest".to_string(),
            url: "https://example.org/digest".to_string(),
            description: "Daily papers".to_string(),
        }
    }

    fn paper(title: &str, citations: u64, relevance: u32) -> PaperRecord {
        PaperRecord {
            title: title.to_string(),
            abstract_text: "b".repeat(350),
            abs_url: format!("http://arxiv.org/abs/{}", title.len()),
            citation_count: citations,
            relevance_score: relevance,
            ..Default::default()
        }
    }

    fn render(buckets: &[TopicBucket]) -> String {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 8, 0, 0).unwrap();
        render_feed(&site(), buckets, now).unwrap()
    }

    #[test]
    fn test_channel_metadata() {
        let xml = render(&[]);
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains("<title>Security &amp; Safety Digest</title>"));
        assert!(xml.contains("<lastBuildDate>Sat, 15 Jun 2024 08:00:00 +0000</lastBuildDate>"));
        assert!(xml.contains("href=\"https://example.org/digest/feed.xml\""));
        assert!(!xml.contains("<item>"));
    }

    #[test]
    fn test_items_follow_topic_and_rank_order() {
        let buckets = vec![
            TopicBucket {
                topic: "Jailbreaking".to_string(),
                papers: vec![paper("First", 4, 40), paper("Second", 0, 10)],
            },
            TopicBucket { topic: "Backdoors".to_string(), papers: vec![paper("Third", 0, 0)] },
        ];
        let xml = render(&buckets);

        assert_eq!(xml.matches("<item>").count(), 3);
        assert!(xml.contains("<title>[Jailbreaking] [4 citations] [rel:40] First</title>"));
        assert!(xml.contains("<title>[Jailbreaking] [rel:10] Second</title>"));
        assert!(xml.contains("<category>Backdoors</category>"));
        assert!(xml.contains(&format!("<description>{}...</description>", "b".repeat(300))));
        assert!(xml.find("First").unwrap() < xml.find("Second").unwrap());
        assert!(xml.find("Second").unwrap() < xml.find("Third").unwrap());
    }
}
