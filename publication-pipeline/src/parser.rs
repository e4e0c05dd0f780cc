use crate::rss_utils::feed::extract_text_from_html;
use crate::types::{Material, ParsedEntry, ParsedFeed, PipelineError, Result};
use feed_rs::parser;
use std::collections::HashSet;
use tracing::{debug, info};

/// RSS/Atom parser that remembers which entries were already handled, so a
/// feed polled again only yields entries still outstanding.
#[derive(Default)]
pub struct FeedParser {
    seen_guids: HashSet<String>,
    seen_urls: HashSet<String>,
}

impl FeedParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `content` and keep the entries not yet marked as seen. Parsing
    /// alone marks nothing; call [`FeedParser::mark_seen`] once an entry is
    /// handled.
    pub fn parse_feed(&self, content: &str) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| PipelineError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed.title.map(|t| t.content);
        let description = feed.description.map(|d| d.content);

        let total = feed.entries.len();
        let mut guids_in_document = HashSet::new();
        let mut urls_in_document = HashSet::new();
        let entries: Vec<ParsedEntry> = feed
            .entries
            .into_iter()
            .filter_map(Self::parse_entry)
            .filter(|entry| !self.is_seen(entry))
            .filter(|entry| {
                // Duplicates within one document
                let fresh_guid = match &entry.guid {
                    Some(guid) => guids_in_document.insert(guid.clone()),
                    None => true,
                };
                fresh_guid && urls_in_document.insert(entry.url.clone())
            })
            .collect();

        info!("Parsed feed with {} entries ({} new)", total, entries.len());
        Ok(ParsedFeed { title, description, entries })
    }

    fn parse_entry(entry: feed_rs::model::Entry) -> Option<ParsedEntry> {
        let title = entry.title.map(|t| t.content).unwrap_or_default();
        let url = entry.links.first()?.href.clone();

        let guid = if !entry.id.is_empty() { Some(entry.id.clone()) } else { None };

        let description = entry.summary.map(|s| s.content);
        // Prefer full content over summary
        let content = entry.content.and_then(|c| c.body).or_else(|| description.clone());

        Some(ParsedEntry { guid, url, title, description, content })
    }

    /// Duplicates by GUID or URL
    pub fn is_seen(&self, entry: &ParsedEntry) -> bool {
        if let Some(guid) = &entry.guid {
            if self.seen_guids.contains(guid) {
                debug!("Skipping duplicate entry with GUID: {}", guid);
                return true;
            }
        }
        if self.seen_urls.contains(&entry.url) {
            debug!("Skipping duplicate entry with URL: {}", entry.url);
            return true;
        }
        false
    }

    pub fn mark_seen(&mut self, entry: &ParsedEntry) {
        if let Some(guid) = &entry.guid {
            self.seen_guids.insert(guid.clone());
        }
        self.seen_urls.insert(entry.url.clone());
    }

    /// Turn a parsed entry into a material attributed to `source`.
    pub fn to_material(entry: &ParsedEntry, source: &str) -> Material {
        let content = entry.content.as_deref().map(extract_text_from_html).unwrap_or_default();
        let mut material = Material::new(source, entry.title.trim(), content).with_link(entry.url.clone());
        if let Some(description) = entry.description.as_deref().map(extract_text_from_html) {
            if !description.is_empty() {
                material = material.with_summary(description);
            }
        }
        material
    }

    /// Cheap sniff for RSS/Atom before handing a body to the parser.
    pub fn is_valid_feed_content(content: &str) -> bool {
        let content_lower = content.to_lowercase();

        let has_rss_indicators = content_lower.contains("<rss")
            || content_lower.contains("<feed")
            || content_lower.contains("xmlns=\"http://www.w3.org/2005/atom\"")
            || content_lower.contains("<channel");

        let has_xml_declaration = content.trim_start().starts_with("<?xml");

        has_rss_indicators && (has_xml_declaration || content_lower.contains('<'))
    }

    pub fn clear_deduplication_cache(&mut self) {
        self.seen_guids.clear();
        self.seen_urls.clear();
        debug!("Cleared deduplication cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example News</title>
    <link>https://news.example.com</link>
    <description>Example</description>
    <item>
      <title>First story</title>
      <link>https://news.example.com/first</link>
      <guid>first</guid>
      <description>&lt;p&gt;The first story body.&lt;/p&gt;</description>
    </item>
    <item>
      <title>Second story</title>
      <link>https://news.example.com/second</link>
      <guid>second</guid>
      <description>Second body</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_and_deduplicate_across_polls() {
        let mut parser = FeedParser::new();
        assert!(FeedParser::is_valid_feed_content(FEED));

        let parsed = parser.parse_feed(FEED).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Example News"));
        assert_eq!(parsed.entries.len(), 2);

        let material = FeedParser::to_material(&parsed.entries[0], "example");
        assert_eq!(material.title, "First story");
        assert_eq!(material.content, "The first story body.");
        assert_eq!(material.link.as_deref(), Some("https://news.example.com/first"));
        assert_eq!(material.information_source, "example");

        // Nothing is remembered until it is marked.
        assert_eq!(parser.parse_feed(FEED).unwrap().entries.len(), 2);

        parser.mark_seen(&parsed.entries[0]);
        let again = parser.parse_feed(FEED).unwrap();
        assert_eq!(again.entries.len(), 1);
        assert_eq!(again.entries[0].title, "Second story");

        parser.mark_seen(&again.entries[0]);
        assert!(parser.parse_feed(FEED).unwrap().entries.is_empty());

        parser.clear_deduplication_cache();
        assert_eq!(parser.parse_feed(FEED).unwrap().entries.len(), 2);
    }

    #[test]
    fn test_duplicate_entries_within_one_document() {
        let doubled = FEED.replace("<guid>second</guid>", "<guid>first</guid>");
        let parsed = FeedParser::new().parse_feed(&doubled).unwrap();
        assert_eq!(parsed.entries.len(), 1);
    }

    #[test]
    fn test_rejects_non_feed() {
        assert!(!FeedParser::is_valid_feed_content("just some text"));
        assert!(FeedParser::new().parse_feed("not xml at all").is_err());
    }
}
