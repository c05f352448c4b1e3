//! Content rendering and sanitization
//!
//! Two stages guard every piece of HTML that reaches a reader:
//! 1. an allow-list filter (`ammonia`) that drops unknown elements,
//!    attributes and URL schemes;
//! 2. a link hardening pass that forces `rel="nofollow noopener"` and
//!    `target="_blank"` on every external anchor.
//!
//! Author-written markup is rendered with `pulldown-cmark` first and then
//! goes through the same two stages. Plain text never touches the markup
//! renderer; it is escaped with [`escape_html`].

use std::collections::{HashMap, HashSet};

use ammonia::UrlRelative;
use lazy_static::lazy_static;
use pulldown_cmark::{CowStr, Event, LinkType, Options, Parser, Tag, TagEnd, TextMergeStream};

use crate::data::MediaType;

const ALLOWED_TAGS: &[&str] = &[
    "p",
    "br",
    "em",
    "strong",
    "i",
    "b",
    "a",
    "code",
    "pre",
    "ul",
    "ol",
    "li",
    "blockquote",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "hr",
];

/// Elements removed together with everything inside them
const STRIPPED_WITH_CONTENT: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "noscript", "template",
];

const ALLOWED_URL_SCHEMES: &[&str] = &["http", "https", "mailto"];

const EXTERNAL_LINK_REL: &str = "nofollow noopener";
const EXTERNAL_LINK_TARGET: &str = "_blank";

lazy_static! {
    static ref SANITIZER: ammonia::Builder<'static> = {
        let mut builder = ammonia::Builder::empty();
        builder
            .tags(ALLOWED_TAGS.iter().copied().collect())
            .clean_content_tags(STRIPPED_WITH_CONTENT.iter().copied().collect())
            .tag_attributes(HashMap::from([(
                "a",
                HashSet::from(["href", "rel", "target"]),
            )]))
            .url_schemes(ALLOWED_URL_SCHEMES.iter().copied().collect())
            .url_relative(UrlRelative::Deny)
            .link_rel(None)
            .strip_comments(true);
        builder
    };
}

/// Render lightweight markup to sanitized HTML.
///
/// Newlines inside a paragraph become `<br>`, bare `http(s)://` URLs become
/// links, and raw HTML in the source is shown as text.
pub fn render(markup: &str) -> String {
    if markup.trim().is_empty() {
        return String::new();
    }

    let parser = TextMergeStream::new(Parser::new_ext(markup, Options::empty()));
    let mut events = Vec::new();
    let mut link_depth = 0usize;
    let mut in_code_block = false;

    for event in parser {
        match event {
            Event::Start(Tag::Link { .. }) => {
                link_depth += 1;
                events.push(event);
            }
            Event::End(TagEnd::Link) => {
                link_depth = link_depth.saturating_sub(1);
                events.push(event);
            }
            Event::Start(Tag::CodeBlock(_)) => {
                in_code_block = true;
                events.push(event);
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                events.push(event);
            }
            Event::SoftBreak => events.push(Event::HardBreak),
            Event::Html(raw) | Event::InlineHtml(raw) => events.push(Event::Text(raw)),
            Event::Text(text) if link_depth == 0 && !in_code_block => {
                push_autolinked(&mut events, text);
            }
            other => events.push(other),
        }
    }

    let mut html = String::with_capacity(markup.len() * 3 / 2);
    pulldown_cmark::html::push_html(&mut html, events.into_iter());
    sanitize(html.trim_end())
}

/// Sanitize untrusted HTML.
///
/// Never fails: disallowed content is stripped, not rejected.
pub fn sanitize(html: &str) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let cleaned = SANITIZER.clean(html).to_string();
    harden_links(&cleaned)
}

/// Escape text for verbatim display; newlines become `<br>`.
pub fn escape_html(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    html_escape::encode_quoted_attribute(&normalized).replace('\n', "<br>")
}

/// Produce the stored HTML for a note or bio according to its media type
pub fn render_source(source: &str, media_type: MediaType) -> String {
    match media_type {
        MediaType::Markdown => render(source),
        MediaType::PlainText if source.trim().is_empty() => String::new(),
        MediaType::PlainText => format!("<p>{}</p>", escape_html(source)),
        MediaType::Html => sanitize(source),
    }
}

fn push_autolinked<'a>(events: &mut Vec<Event<'a>>, text: CowStr<'a>) {
    let segments = split_bare_urls(&text);
    if segments.len() == 1 && !segments[0].is_url {
        events.push(Event::Text(text));
        return;
    }

    for segment in segments {
        if segment.is_url {
            let url = CowStr::from(segment.text.to_string());
            events.push(Event::Start(Tag::Link {
                link_type: LinkType::Autolink,
                dest_url: url.clone(),
                title: CowStr::from(""),
                id: CowStr::from(""),
            }));
            events.push(Event::Text(url));
            events.push(Event::End(TagEnd::Link));
        } else {
            events.push(Event::Text(CowStr::from(segment.text.to_string())));
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Segment<'a> {
    text: &'a str,
    is_url: bool,
}

/// Split text into plain runs and bare `http(s)://` URLs.
fn split_bare_urls(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = text;

    while let Some(start) = find_url_start(rest) {
        let candidate = &rest[start..];
        let raw_end = candidate
            .find(|c: char| c.is_whitespace() || matches!(c, '<' | '>' | '"'))
            .unwrap_or(candidate.len());
        let url = candidate[..raw_end].trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '\'']);

        let scheme_len = if url.starts_with("https://") { 8 } else { 7 };
        if url.len() <= scheme_len {
            let skip = start + scheme_len;
            segments.push(Segment {
                text: &rest[..skip],
                is_url: false,
            });
            rest = &rest[skip..];
            continue;
        }

        if start > 0 {
            segments.push(Segment {
                text: &rest[..start],
                is_url: false,
            });
        }
        segments.push(Segment {
            text: url,
            is_url: true,
        });
        rest = &rest[start + url.len()..];
    }

    if !rest.is_empty() || segments.is_empty() {
        segments.push(Segment {
            text: rest,
            is_url: false,
        });
    }

    segments
}

fn find_url_start(text: &str) -> Option<usize> {
    let http = text.find("http://");
    let https = text.find("https://");
    match (http, https) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// Force `rel`/`target` on external anchors of already-sanitized HTML.
///
/// Input is serializer output, so every attribute value is double-quoted
/// and contains no raw `"`.
fn harden_links(html: &str) -> String {
    let mut output = String::with_capacity(html.len() + 64);
    let mut rest = html;

    while let Some(pos) = find_anchor_open(rest) {
        output.push_str(&rest[..pos]);
        let tag_body = &rest[pos + 2..];
        let Some(close) = find_tag_close(tag_body) else {
            output.push_str(&rest[pos..]);
            return output;
        };

        let attributes = parse_attributes(&tag_body[..close]);
        output.push_str(&render_anchor(attributes));
        rest = &tag_body[close + 1..];
    }

    output.push_str(rest);
    output
}

fn find_anchor_open(html: &str) -> Option<usize> {
    let mut offset = 0;
    while let Some(found) = html[offset..].find("<a") {
        let pos = offset + found;
        match html[pos + 2..].chars().next() {
            Some(c) if c == '>' || c.is_whitespace() => return Some(pos),
            _ => offset = pos + 2,
        }
    }
    None
}

fn find_tag_close(tag_body: &str) -> Option<usize> {
    let mut quoted = false;
    for (index, c) in tag_body.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '>' if !quoted => return Some(index),
            _ => {}
        }
    }
    None
}

fn parse_attributes(raw: &str) -> Vec<(String, String)> {
    let mut attributes = Vec::new();
    let mut rest = raw.trim();

    while !rest.is_empty() {
        let name_end = rest
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(rest.len());
        let name = rest[..name_end].to_ascii_lowercase();
        rest = rest[name_end..].trim_start();

        let mut value = String::new();
        if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            if let Some(quoted) = after_eq.strip_prefix('"') {
                let end = quoted.find('"').unwrap_or(quoted.len());
                value = quoted[..end].to_string();
                rest = quoted.get(end + 1..).unwrap_or("").trim_start();
            } else {
                let end = after_eq.find(char::is_whitespace).unwrap_or(after_eq.len());
                value = after_eq[..end].to_string();
                rest = after_eq[end..].trim_start();
            }
        }

        if !name.is_empty() {
            attributes.push((name, value));
        }
    }

    attributes
}

fn render_anchor(mut attributes: Vec<(String, String)>) -> String {
    let is_external = attributes.iter().any(|(name, value)| {
        name == "href" && {
            let lower = value.trim_start().to_ascii_lowercase();
            lower.starts_with("http:") || lower.starts_with("https:")
        }
    });

    if is_external {
        attributes.retain(|(name, _)| name != "rel" && name != "target");
        attributes.push(("rel".to_string(), EXTERNAL_LINK_REL.to_string()));
        attributes.push(("target".to_string(), EXTERNAL_LINK_TARGET.to_string()));
    }

    let mut tag = String::from("<a");
    for (name, value) in attributes {
        tag.push(' ');
        tag.push_str(&name);
        tag.push_str("=\"");
        tag.push_str(&value);
        tag.push('"');
    }
    tag.push('>');
    tag
}
