//! Minimal RSS 2.0 / Atom reader.

use crate::utils::error::Result;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub published: Option<String>,
    pub author: Option<String>,
    pub categories: Vec<String>,
}

impl FeedEntry {
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published.as_deref().and_then(parse_feed_date)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

/// RFC 2822 (`pubDate`) first, then RFC 3339 (`published`/`updated`).
pub fn parse_feed_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn append(field: &mut Option<String>, text: &str) {
    if text.is_empty() {
        return;
    }
    match field {
        Some(existing) => existing.push_str(text),
        None => *field = Some(text.to_string()),
    }
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name)
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).to_ascii_lowercase()
}

/// Atom links: keep `rel="alternate"` (or unspecified) over others.
fn apply_link_attributes(entry: &mut FeedEntry, element: &BytesStart<'_>) {
    if let Some(href) = attribute(element, b"href") {
        let rel = attribute(element, b"rel").unwrap_or_else(|| "alternate".to_string());
        if entry.link.is_none() || rel == "alternate" {
            entry.link = Some(href);
        }
    }
}

fn is_item(name: Option<&str>) -> bool {
    matches!(name, Some("item") | Some("entry"))
}

/// Applies the full text of a closed element whose parent is `parent`.
fn apply_text(entry: &mut FeedEntry, tag: &str, parent: Option<&str>, text: String) {
    if text.is_empty() {
        return;
    }
    match tag {
        "name" if parent == Some("author") => append(&mut entry.author, &text),
        "category" if is_item(parent) => entry.categories.push(text),
        _ if !is_item(parent) => {}
        "title" => append(&mut entry.title, &text),
        "link" => append(&mut entry.link, &text),
        "description" | "summary" => append(&mut entry.summary, &text),
        "encoded" | "content" => append(&mut entry.content, &text),
        // publication date wins over dc:date and updated
        "pubdate" | "published" => entry.published = Some(text),
        "date" | "updated" => {
            if entry.published.is_none() {
                entry.published = Some(text);
            }
        }
        "creator" | "author" => append(&mut entry.author, &text),
        _ => {}
    }
}

pub fn parse_feed(xml: &str) -> Result<ParsedFeed> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = ParsedFeed::default();
    // open elements with the text collected so far
    let mut stack: Vec<(String, String)> = Vec::new();
    let mut current: Option<FeedEntry> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = local_name(&e);
                if name == "item" || name == "entry" {
                    current = Some(FeedEntry::default());
                } else if let Some(entry) = current.as_mut() {
                    let parent = stack.last().map(|(n, _)| n.as_str());
                    if name == "link" && is_item(parent) {
                        apply_link_attributes(entry, &e);
                    }
                }
                stack.push((name, String::new()));
            }
            Event::Empty(e) => {
                let name = local_name(&e);
                let parent = stack.last().map(|(n, _)| n.as_str());
                if let (Some(entry), true) = (current.as_mut(), is_item(parent)) {
                    match name.as_str() {
                        "link" => apply_link_attributes(entry, &e),
                        "category" => {
                            if let Some(term) = attribute(&e, b"term") {
                                entry.categories.push(term);
                            }
                        }
                        _ => {}
                    }
                }
            }
            Event::End(_) => {
                let Some((name, text)) = stack.pop() else {
                    continue;
                };
                let parent = stack.last().map(|(n, _)| n.as_str());
                if name == "item" || name == "entry" {
                    if let Some(entry) = current.take() {
                        feed.entries.push(entry);
                    }
                } else if let Some(entry) = current.as_mut() {
                    apply_text(entry, &name, parent, text);
                } else if name == "title" && matches!(parent, Some("channel") | Some("feed")) {
                    append(&mut feed.title, &text);
                }
            }
            Event::Text(t) => {
                if let Some((_, buf)) = stack.last_mut() {
                    match t.unescape() {
                        Ok(c) => buf.push_str(&c),
                        Err(_) => buf.push_str(&String::from_utf8_lossy(&t)),
                    }
                }
            }
            Event::CData(c) => {
                if let Some((_, buf)) = stack.last_mut() {
                    buf.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(feed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Markets Daily</title>
    <image><title>Logo</title></image>
    <item>
      <title>Apple earnings beat &amp; shares rise</title>
      <link>https://news.example.com/apple</link>
      <description><![CDATA[<p>Apple reported strong iPhone sales.</p>]]></description>
      <pubDate>Tue, 10 Sep 2024 14:30:00 GMT</pubDate>
      <dc:creator>Jane Doe</dc:creator>
      <category>Technology</category>
    </item>
    <item>
      <title>Oil prices slip</title>
      <link>https://news.example.com/oil</link>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Tech Wire</title>
  <entry>
    <title>Microsoft expands Azure</title>
    <link rel="self" href="https://wire.example.com/self"/>
    <link rel="alternate" href="https://wire.example.com/azure"/>
    <updated>2024-09-10T12:00:00Z</updated>
    <author><name>John Roe</name></author>
    <summary>Cloud growth continues.</summary>
    <category term="Cloud"/>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss() {
        let feed = parse_feed(RSS).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Markets Daily"));
        assert_eq!(feed.entries.len(), 2);

        let first = &feed.entries[0];
        assert_eq!(first.title.as_deref(), Some("Apple earnings beat & shares rise"));
        assert_eq!(first.link.as_deref(), Some("https://news.example.com/apple"));
        assert_eq!(first.summary.as_deref(), Some("<p>Apple reported strong iPhone sales.</p>"));
        assert_eq!(first.author.as_deref(), Some("Jane Doe"));
        assert_eq!(first.categories, vec!["Technology"]);
        assert_eq!(
            first.published_at().unwrap().to_rfc3339(),
            "2024-09-10T14:30:00+00:00"
        );

        assert!(feed.entries[1].published_at().is_none());
    }

    #[test]
    fn test_parse_atom() {
        let feed = parse_feed(ATOM).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Tech Wire"));
        let entry = &feed.entries[0];
        assert_eq!(entry.link.as_deref(), Some("https://wire.example.com/azure"));
        assert_eq!(entry.author.as_deref(), Some("John Roe"));
        assert_eq!(entry.categories, vec!["Cloud"]);
        assert!(entry.published_at().is_some());
    }

    #[test]
    fn test_published_wins_over_earlier_updated() {
        let atom = r#"<feed xmlns="http://www.w3.org/2005/Atom"><entry>
            <title>Apple services</title>
            <updated>2024-09-11T08:00:00Z</updated>
            <published>2024-09-10T12:00:00Z</published>
        </entry></feed>"#;
        let entry = &parse_feed(atom).unwrap().entries[0];
        assert_eq!(entry.published.as_deref(), Some("2024-09-10T12:00:00Z"));
        assert_eq!(
            entry.published_at().unwrap().to_rfc3339(),
            "2024-09-10T12:00:00+00:00"
        );

        let rss = r#"<rss xmlns:dc="http://purl.org/dc/elements/1.1/"><channel><item>
            <dc:date>2024-09-12T09:00:00Z</dc:date>
            <pubDate>Tue, 10 Sep 2024 14:30:00 GMT</pubDate>
        </item></channel></rss>"#;
        let entry = &parse_feed(rss).unwrap().entries[0];
        assert_eq!(
            entry.published_at().unwrap().to_rfc3339(),
            "2024-09-10T14:30:00+00:00"
        );
    }

    #[test]
    fn test_nested_media_elements_ignored() {
        let rss = r#"<rss xmlns:media="http://search.yahoo.com/mrss/"><channel><item>
            <title>Apple beats</title>
            <link>https://news.example.com/beat</link>
            <media:content url="https://img.example.com/a.jpg">
                <media:title>Photo credit</media:title>
                <media:description>Tim Cook on stage</media:description>
            </media:content>
            <description>Quarterly results topped estimates.</description>
        </item></channel></rss>"#;
        let entry = &parse_feed(rss).unwrap().entries[0];
        assert_eq!(entry.title.as_deref(), Some("Apple beats"));
        assert_eq!(entry.link.as_deref(), Some("https://news.example.com/beat"));
        assert_eq!(entry.summary.as_deref(), Some("Quarterly results topped estimates."));
    }

    #[test]
    fn test_malformed_feed_is_error() {
        assert!(parse_feed("<rss><channel><item></channel></rss>").is_err());
    }

    #[test]
    fn test_parse_feed_date_formats() {
        assert!(parse_feed_date("Mon, 09 Sep 2024 08:00:00 +0000").is_some());
        assert!(parse_feed_date("2024-09-09T08:00:00-04:00").is_some());
        assert!(parse_feed_date("yesterday").is_none());
    }
}
