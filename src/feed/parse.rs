// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Link};
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::FeedError;

/// A fetched, structurally parsed feed.
///
/// Every field a feed may omit is an explicit Option; downstream code never
/// guesses at absent data.
#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub published: Option<DateTime<Utc>>,
    /// Set when the document only parsed after cleanup; carries the original
    /// parser complaint. Logged by the reconciler, never fatal.
    pub malformed: Option<String>,
    pub entries: Vec<FeedEntry>,
}

/// One entry of a fetched feed
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub guid: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub published: Option<DateTime<Utc>>,
    /// Raw `<itunes:duration>` value as it appeared in the document
    pub itunes_duration: Option<String>,
    pub enclosures: Vec<FeedEnclosure>,
}

/// A feed entry's attached media reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEnclosure {
    pub href: Option<String>,
    /// Declared byte size; absent or unparseable declarations are None
    pub length: Option<u64>,
    pub mimetype: Option<String>,
}

impl FeedEntry {
    /// Derive the stable episode identity for this entry.
    ///
    /// First non-empty of guid, link, title, description. The guid is the
    /// most stable identifier by syndication convention; the others are
    /// practical fallbacks. None only when all four are absent.
    pub fn uid(&self) -> Option<&str> {
        [
            self.guid.as_deref(),
            self.link.as_deref(),
            self.title.as_deref(),
            self.description.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
    }
}

/// Parse feed XML bytes into a `FetchedFeed`.
///
/// A document that only parses after stripping leading garbage is accepted
/// with its `malformed` indicator set. A feed carrying neither a description
/// nor any entries is rejected as unusable.
pub fn parse_feed(data: &[u8], url: &str) -> Result<FetchedFeed, FeedError> {
    let (parsed, mut malformed) = match feed_rs::parser::parse(data) {
        Ok(feed) => (feed, None),
        Err(first_err) => {
            let cleaned = strip_leading_garbage(data);
            match cleaned.and_then(|d| feed_rs::parser::parse(d).ok()) {
                Some(feed) => (feed, Some(first_err.to_string())),
                None => return Err(FeedError::ParseFailed(first_err)),
            }
        }
    };

    // The underlying parser tolerates junk before the document, so a clean
    // first parse still has to flag it
    if malformed.is_none() && has_leading_garbage(data) {
        malformed = Some("content before the document start".to_string());
    }

    let sidecar = scan_item_extensions(data);

    let title = parsed.title.as_ref().and_then(|t| clean_text(&t.content));
    let description = parsed
        .description
        .as_ref()
        .map(|d| d.content.clone())
        .filter(|s| !s.trim().is_empty());
    let published = parsed.published.or(parsed.updated);

    let entries: Vec<FeedEntry> = parsed
        .entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            let extra = sidecar.get(idx);
            map_entry(entry, extra)
        })
        .collect();

    if description.is_none() && entries.is_empty() {
        return Err(FeedError::Empty {
            url: url.to_string(),
        });
    }

    Ok(FetchedFeed {
        title,
        description,
        published,
        malformed,
        entries,
    })
}

fn map_entry(entry: &Entry, extra: Option<&ItemSidecar>) -> FeedEntry {
    // feed-rs synthesizes entry.id when the document carries no identifier,
    // so the real guid comes from the sidecar scan.
    let guid = extra
        .and_then(|e| e.guid.clone())
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty());

    FeedEntry {
        guid,
        link: extract_entry_link(entry),
        title: entry.title.as_ref().and_then(|t| clean_text(&t.content)),
        description: entry
            .summary
            .as_ref()
            .map(|s| s.content.clone())
            .filter(|s| !s.trim().is_empty()),
        published: entry.published.or(entry.updated),
        itunes_duration: extra.and_then(|e| e.duration.clone()),
        enclosures: extract_enclosures(entry),
    }
}

/// Extract the entry's page link: rel="alternate" first, then the first
/// non-enclosure link.
fn extract_entry_link(entry: &Entry) -> Option<String> {
    entry
        .links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .or_else(|| entry.links.iter().find(|l| !is_enclosure_link(l)))
        .map(|l| l.href.clone())
}

fn is_enclosure_link(link: &Link) -> bool {
    link.rel.as_deref() == Some("enclosure")
}

/// Collect every enclosure the entry carries.
///
/// RSS `<enclosure>` repetition and media content both surface here, so an
/// entry with more than one attachment is visible to the reconciler instead
/// of being collapsed to a single arbitrary pick. Identical url/mime pairs
/// are deduplicated, keeping the first.
fn extract_enclosures(entry: &Entry) -> Vec<FeedEnclosure> {
    let mut enclosures = Vec::new();
    let mut seen: HashSet<(String, Option<String>)> = HashSet::new();

    for link in &entry.links {
        if is_enclosure_link(link) {
            let mimetype = link.media_type.clone();
            let key = (link.href.clone(), mimetype.clone());
            if seen.insert(key) {
                enclosures.push(FeedEnclosure {
                    href: Some(link.href.clone()),
                    length: link.length,
                    mimetype,
                });
            }
        }
    }

    for media in &entry.media {
        for content in &media.content {
            if let Some(ref url) = content.url {
                let mimetype = content.content_type.as_ref().map(|m| m.to_string());
                let key = (url.to_string(), mimetype.clone());
                if seen.insert(key) {
                    enclosures.push(FeedEnclosure {
                        href: Some(url.to_string()),
                        length: content.size,
                        mimetype,
                    });
                }
            }
        }
    }

    enclosures
}

/// Decode HTML entities and trim; empty results become None
fn clean_text(s: &str) -> Option<String> {
    let decoded = html_escape::decode_html_entities(s);
    let trimmed = decoded.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Drop anything before the first `<`, where BOMs and stray bytes from
/// misconfigured servers tend to live
fn strip_leading_garbage(data: &[u8]) -> Option<&[u8]> {
    let start = data.iter().position(|&b| b == b'<')?;
    if start == 0 {
        return None;
    }
    Some(&data[start..])
}

/// True when anything besides a BOM or whitespace precedes the first `<`
fn has_leading_garbage(data: &[u8]) -> bool {
    let body = data.strip_prefix(b"\xef\xbb\xbf").unwrap_or(data);
    match body.iter().position(|&b| b == b'<') {
        Some(start) => body[..start].iter().any(|b| !b.is_ascii_whitespace()),
        None => false,
    }
}

/// Per-item fields feed-rs does not expose faithfully, recovered with a
/// lightweight scan over the raw XML: the literal guid (feed-rs replaces a
/// missing one with a synthesized id) and the raw itunes:duration string.
#[derive(Debug, Default, Clone)]
struct ItemSidecar {
    guid: Option<String>,
    duration: Option<String>,
}

#[derive(Clone, Copy)]
enum Capture {
    Guid,
    Duration,
}

fn scan_item_extensions(data: &[u8]) -> Vec<ItemSidecar> {
    let mut reader = Reader::from_reader(data);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut items = Vec::new();
    let mut in_item = false;
    let mut current = ItemSidecar::default();
    let mut capture: Option<Capture> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let local = name.rsplit(':').next().unwrap_or(&name);

                match local {
                    "item" | "entry" => {
                        in_item = true;
                        current = ItemSidecar::default();
                    }
                    "guid" | "id" if in_item => capture = Some(Capture::Guid),
                    "duration" if in_item && name.starts_with("itunes:") => {
                        capture = Some(Capture::Duration);
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) => {
                if in_item
                    && let Some(what) = capture
                {
                    let text = e.decode().map(|s| s.into_owned()).unwrap_or_default();
                    if !text.is_empty() {
                        match what {
                            Capture::Guid => current.guid = Some(text),
                            Capture::Duration => current.duration = Some(text),
                        }
                    }
                }
            }
            Ok(Event::End(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let local = name.rsplit(':').next().unwrap_or(&name);

                if matches!(local, "item" | "entry") {
                    items.push(std::mem::take(&mut current));
                    in_item = false;
                }
                capture = None;
            }
            Ok(Event::Eof) => break,
            // The sidecar is best-effort; a scan error just ends it
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    items
}
