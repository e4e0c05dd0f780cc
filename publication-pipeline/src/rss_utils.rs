/// Text and URL helpers shared by the sources

/// URL utilities
pub mod url {
    use url::Url;

    /// Only http(s) URLs are fetched
    pub fn is_valid_http_url(url_str: &str) -> bool {
        if let Ok(url) = Url::parse(url_str) {
            url.scheme() == "http" || url.scheme() == "https"
        } else {
            false
        }
    }
}

/// Page and feed text extraction
pub mod feed {
    /// Extract clean text content from HTML. Script and style bodies are
    /// dropped, tags are removed and whitespace is collapsed.
    pub fn extract_text_from_html(html: &str) -> String {
        let visible = strip_blocks(&strip_blocks(html, "script"), "style");
        let text = visible
            .chars()
            .fold((String::new(), false), |(mut text, in_tag), c| match c {
                '<' => (text, true),
                '>' => {
                    // Keep words on either side of a tag apart.
                    text.push(' ');
                    (text, false)
                }
                _ if !in_tag => {
                    text.push(c);
                    (text, in_tag)
                }
                _ => (text, in_tag),
            })
            .0;
        decode_entities(&text)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn strip_blocks(html: &str, tag: &str) -> String {
        let lower = html.to_ascii_lowercase();
        let open = format!("<{}", tag);
        let close = format!("</{}>", tag);
        let mut out = String::with_capacity(html.len());
        let mut cursor = 0;
        while let Some(start) = lower[cursor..].find(&open).map(|i| i + cursor) {
            out.push_str(&html[cursor..start]);
            match lower[start..].find(&close) {
                Some(end) => cursor = start + end + close.len(),
                None => return out,
            }
        }
        out.push_str(&html[cursor..]);
        out
    }

    fn decode_entities(text: &str) -> String {
        text.replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&apos;", "'")
            .replace("&amp;", "&")
    }

    /// First non-empty line of a text document, without markdown heading marks.
    pub fn first_line_title(text: &str) -> Option<String> {
        text.lines()
            .map(|line| line.trim().trim_start_matches('#').trim())
            .find(|line| !line.is_empty())
            .map(|line| line.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_from_html() {
        let html = "<html><head><style>p { color: red; }</style><script>var x = 1;</script></head>\
                    <body><h1>Title</h1><p>Fish &amp; chips</p></body></html>";
        assert_eq!(feed::extract_text_from_html(html), "Title Fish & chips");
    }

    #[test]
    fn test_first_line_title() {
        assert_eq!(feed::first_line_title("\n\n# Weekly notes\nbody"), Some("Weekly notes".to_string()));
        assert_eq!(feed::first_line_title("   \n"), None);
    }

    #[test]
    fn test_url_helpers() {
        assert!(url::is_valid_http_url("https://example.com/feed.xml"));
        assert!(!url::is_valid_http_url("ftp://example.com/feed.xml"));
    }
}
