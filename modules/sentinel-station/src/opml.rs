//! OPML 2.0 import/export, restricted to RSS sources.
//!
//! Folders map to the source `category`; a feed outside any folder imports
//! with no category. Export groups feeds back into one folder per category,
//! so `parse(export(S))` preserves every `(name, url, category)` triple.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::{debug, info, warn};

use sentinel_common::{SentinelError, Source, SourceType};
use sentinel_store::Store;

/// One feed outline from an OPML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpmlFeed {
    pub name: String,
    pub xml_url: String,
    pub html_url: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Default)]
pub struct ImportStats {
    pub total: usize,
    pub imported: usize,
    pub skipped: usize,
}

/// Parse an OPML document into its flattened feed list.
pub fn parse_opml(content: &str) -> Result<Vec<OpmlFeed>, SentinelError> {
    let mut reader = Reader::from_str(content);
    reader.trim_text(true);

    let mut feeds = Vec::new();
    // Stack of open outline elements: folder name, or None for feed outlines
    let mut outline_stack: Vec<Option<String>> = Vec::new();
    let mut saw_opml_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"opml" => saw_opml_root = true,
                b"outline" => {
                    let attrs = attributes(&e);
                    match feed_from_attrs(&attrs, &outline_stack) {
                        Some(feed) => {
                            feeds.push(feed);
                            outline_stack.push(None);
                        }
                        None => {
                            let folder = attrs
                                .get("text")
                                .or_else(|| attrs.get("title"))
                                .cloned();
                            outline_stack.push(folder);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"outline" {
                    let attrs = attributes(&e);
                    if let Some(feed) = feed_from_attrs(&attrs, &outline_stack) {
                        feeds.push(feed);
                    }
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"outline" {
                    outline_stack.pop();
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(SentinelError::Parse(format!("invalid XML: {e}"))),
        }
    }

    if !saw_opml_root && feeds.is_empty() {
        return Err(SentinelError::Parse("not an OPML document".to_string()));
    }
    Ok(feeds)
}

fn attributes(element: &BytesStart<'_>) -> BTreeMap<String, String> {
    element
        .attributes()
        .flatten()
        .filter_map(|attr| {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            attr.unescape_value()
                .ok()
                .map(|value| (key, value.into_owned()))
        })
        .collect()
}

fn feed_from_attrs(
    attrs: &BTreeMap<String, String>,
    outline_stack: &[Option<String>],
) -> Option<OpmlFeed> {
    let xml_url = attrs.get("xmlUrl").filter(|u| !u.is_empty())?;
    let name = attrs
        .get("title")
        .or_else(|| attrs.get("text"))
        .cloned()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| xml_url.clone());
    // Explicit category attribute wins over the enclosing folder
    let category = attrs
        .get("category")
        .cloned()
        .or_else(|| {
            outline_stack
                .iter()
                .rev()
                .find_map(|folder| folder.clone())
        });
    Some(OpmlFeed {
        name,
        xml_url: xml_url.clone(),
        html_url: attrs.get("htmlUrl").cloned(),
        description: attrs.get("description").cloned(),
        category,
    })
}

/// Render the RSS subset of `sources` as an OPML 2.0 document, one folder
/// per category.
pub fn export_opml(sources: &[Source], title: &str) -> Result<String, SentinelError> {
    let rss: Vec<&Source> = sources
        .iter()
        .filter(|s| s.source_type == SourceType::Rss)
        .collect();

    let mut categorized: BTreeMap<&str, Vec<&Source>> = BTreeMap::new();
    let mut uncategorized: Vec<&Source> = Vec::new();
    for source in rss {
        match source.category.as_deref() {
            Some(category) => categorized.entry(category).or_default().push(source),
            None => uncategorized.push(source),
        }
    }

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    let write = |w: &mut Writer<Vec<u8>>, event: Event| {
        w.write_event(event)
            .map_err(|e| SentinelError::Parse(format!("OPML write: {e}")))
    };

    write(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
    )?;
    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    write(&mut writer, Event::Start(opml))?;

    write(&mut writer, Event::Start(BytesStart::new("head")))?;
    write(&mut writer, Event::Start(BytesStart::new("title")))?;
    write(&mut writer, Event::Text(BytesText::new(title)))?;
    write(&mut writer, Event::End(BytesEnd::new("title")))?;
    write(&mut writer, Event::Start(BytesStart::new("dateCreated")))?;
    let created = Utc::now().to_rfc2822();
    write(&mut writer, Event::Text(BytesText::new(&created)))?;
    write(&mut writer, Event::End(BytesEnd::new("dateCreated")))?;
    write(&mut writer, Event::Start(BytesStart::new("docs")))?;
    write(
        &mut writer,
        Event::Text(BytesText::new("http://opml.org/spec2.opml")),
    )?;
    write(&mut writer, Event::End(BytesEnd::new("docs")))?;
    write(&mut writer, Event::End(BytesEnd::new("head")))?;

    write(&mut writer, Event::Start(BytesStart::new("body")))?;
    for (category, sources) in &categorized {
        let mut folder = BytesStart::new("outline");
        folder.push_attribute(("text", *category));
        folder.push_attribute(("title", *category));
        write(&mut writer, Event::Start(folder))?;
        for source in sources {
            write(&mut writer, Event::Empty(feed_outline(source)))?;
        }
        write(&mut writer, Event::End(BytesEnd::new("outline")))?;
    }
    for source in &uncategorized {
        write(&mut writer, Event::Empty(feed_outline(source)))?;
    }
    write(&mut writer, Event::End(BytesEnd::new("body")))?;
    write(&mut writer, Event::End(BytesEnd::new("opml")))?;

    String::from_utf8(writer.into_inner())
        .map_err(|e| SentinelError::Parse(format!("OPML encoding: {e}")))
}

fn feed_outline(source: &Source) -> BytesStart<'static> {
    let mut outline = BytesStart::new("outline");
    outline.push_attribute(("text", source.name.as_str()));
    outline.push_attribute(("title", source.name.as_str()));
    outline.push_attribute(("type", "rss"));
    outline.push_attribute(("xmlUrl", source.url.as_str()));
    if let Some(html_url) = source.config_str("html_url") {
        outline.push_attribute(("htmlUrl", html_url));
    }
    if let Some(description) = source.config_str("description") {
        outline.push_attribute(("description", description));
    }
    if let Some(category) = source.category.as_deref() {
        outline.push_attribute(("category", category));
    }
    outline.into_owned()
}

/// Import an OPML file into the store. Source ids are deterministic in
/// `(name, url)` and URLs already present are skipped, so re-imports are
/// no-ops.
pub async fn import_opml_file(store: &Store, path: &Path) -> Result<ImportStats> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let feeds = parse_opml(&content)?;

    let mut existing_urls: std::collections::HashSet<String> = store
        .load_sources()
        .await?
        .into_iter()
        .map(|s| s.url)
        .collect();

    let mut stats = ImportStats {
        total: feeds.len(),
        ..Default::default()
    };
    for feed in feeds {
        if existing_urls.contains(&feed.xml_url) {
            debug!(feed = %feed.name, "Skipping duplicate URL");
            stats.skipped += 1;
            continue;
        }
        let mut source = Source::new(&feed.name, SourceType::Rss, &feed.xml_url);
        source.category = feed.category.clone();
        let mut config = serde_json::Map::new();
        if let Some(html_url) = &feed.html_url {
            config.insert("html_url".to_string(), serde_json::json!(html_url));
        }
        if let Some(description) = &feed.description {
            config.insert("description".to_string(), serde_json::json!(description));
        }
        source.config = serde_json::Value::Object(config);

        match store.upsert_source(&source).await {
            Ok(()) => {
                existing_urls.insert(feed.xml_url);
                stats.imported += 1;
            }
            Err(e) => {
                warn!(feed = %feed.name, error = %e, "Failed to import feed");
                stats.skipped += 1;
            }
        }
    }

    info!(
        imported = stats.imported,
        skipped = stats.skipped,
        total = stats.total,
        "OPML import complete"
    );
    Ok(stats)
}

/// Export the store's RSS sources to an OPML file. Returns how many were
/// written.
pub async fn export_opml_file(store: &Store, path: &Path) -> Result<usize> {
    let sources = store.load_sources().await?;
    let rss_count = sources
        .iter()
        .filter(|s| s.source_type == SourceType::Rss)
        .count();
    let document = export_opml(&sources, "SentinelPi RSS Feeds")?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, document).with_context(|| format!("writing {}", path.display()))?;
    info!(count = rss_count, path = %path.display(), "OPML export complete");
    Ok(rss_count)
}
