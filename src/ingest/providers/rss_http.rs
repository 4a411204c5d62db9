// src/ingest/providers/rss_http.rs
//! HTTP feed fetcher: reqwest for transport, quick-xml serde for RSS 2.0,
//! RSS 1.0 (RDF) and Atom documents.

use async_trait::async_trait;
use metrics::{counter, histogram};
use once_cell::sync::OnceCell;
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;

use crate::ingest::types::{FeedFetcher, FetchError, RawFeedItem};

/// Element text, tolerant of attributes (`<guid isPermaLink="false">`) and CDATA.
#[derive(Debug, Default, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UrlAttr {
    #[serde(rename = "@url")]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MediaContent {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@medium")]
    medium: Option<String>,
    #[serde(rename = "@type")]
    mime: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MediaGroup {
    #[serde(rename = "media:thumbnail", default)]
    thumbnails: Vec<UrlAttr>,
    #[serde(rename = "media:content", default)]
    contents: Vec<MediaContent>,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@type")]
    mime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

/// RSS 1.0: items are siblings of `<channel>` under `<rdf:RDF>`.
#[derive(Debug, Deserialize)]
struct Rdf {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Default, Deserialize)]
struct RssItem {
    title: Option<Text>,
    link: Option<Text>,
    guid: Option<Text>,
    description: Option<Text>,
    #[serde(rename = "content:encoded")]
    content_encoded: Option<Text>,
    #[serde(rename = "dc:creator", default)]
    dc_creator: Vec<Text>,
    #[serde(default)]
    author: Vec<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<Text>,
    #[serde(rename = "dc:date")]
    dc_date: Option<Text>,
    #[serde(rename = "media:thumbnail", default)]
    media_thumbnail: Vec<UrlAttr>,
    #[serde(rename = "media:content", default)]
    media_content: Vec<MediaContent>,
    #[serde(rename = "media:group")]
    media_group: Option<MediaGroup>,
    #[serde(default)]
    enclosure: Vec<Enclosure>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
    #[serde(rename = "@type")]
    mime: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: Option<Text>,
}

#[derive(Debug, Default, Deserialize)]
struct AtomEntry {
    title: Option<Text>,
    id: Option<Text>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    summary: Option<Text>,
    content: Option<Text>,
    published: Option<Text>,
    updated: Option<Text>,
    #[serde(default)]
    author: Vec<AtomAuthor>,
    #[serde(rename = "media:thumbnail", default)]
    media_thumbnail: Vec<UrlAttr>,
    #[serde(rename = "media:group")]
    media_group: Option<MediaGroup>,
}

fn text(t: Option<Text>) -> Option<String> {
    t.and_then(|t| t.value)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn texts(ts: Vec<Text>) -> Vec<String> {
    ts.into_iter().filter_map(|t| text(Some(t))).collect()
}

fn is_image_mime(m: Option<&str>) -> bool {
    m.is_some_and(|m| m.to_ascii_lowercase().starts_with("image/"))
}

fn first_img_src(html: &str) -> Option<String> {
    static RE_IMG: OnceCell<Regex> = OnceCell::new();
    let re = RE_IMG.get_or_init(|| {
        Regex::new(r#"(?is)<img[^>]+src\s*=\s*["']([^"']+)["']"#).expect("img regex")
    });
    re.captures(html).map(|c| c[1].to_string())
}

/// `jane@example.com (Jane Doe)` -> `Jane Doe`
fn clean_author(raw: String) -> String {
    static RE_MAIL_NAME: OnceCell<Regex> = OnceCell::new();
    let re = RE_MAIL_NAME
        .get_or_init(|| Regex::new(r"^\S+@\S+\s*\((.+)\)$").expect("author regex"));
    match re.captures(raw.trim()) {
        Some(c) => c[1].trim().to_string(),
        None => raw,
    }
}

fn media_thumbnails(
    thumbs: Vec<UrlAttr>,
    contents: Vec<MediaContent>,
    group: Option<MediaGroup>,
) -> Vec<String> {
    let group = group.unwrap_or_default();
    let mut out: Vec<String> = thumbs
        .into_iter()
        .chain(group.thumbnails)
        .filter_map(|t| t.url)
        .collect();
    for mc in contents.into_iter().chain(group.contents) {
        let image = mc.medium.as_deref() == Some("image")
            || is_image_mime(mc.mime.as_deref())
            || (mc.medium.is_none() && mc.mime.is_none());
        if image {
            if let Some(u) = mc.url {
                out.push(u);
            }
        }
    }
    out
}

impl RssItem {
    fn into_raw(self, source: &str) -> RawFeedItem {
        let description = text(self.description);
        let content = text(self.content_encoded);

        let mut thumbnails =
            media_thumbnails(self.media_thumbnail, self.media_content, self.media_group);
        thumbnails.extend(
            self.enclosure
                .into_iter()
                .filter(|e| is_image_mime(e.mime.as_deref()))
                .filter_map(|e| e.url),
        );
        if let Some(src) = [&description, &content]
            .into_iter()
            .flatten()
            .find_map(|h| first_img_src(h))
        {
            thumbnails.push(src);
        }

        let mut creators = texts(self.dc_creator);
        creators.extend(texts(self.author).into_iter().map(clean_author));

        RawFeedItem {
            title: text(self.title),
            link: text(self.link),
            guid: text(self.guid),
            description,
            content,
            creators,
            thumbnails,
            date_candidates: [text(self.pub_date), text(self.dc_date)]
                .into_iter()
                .flatten()
                .collect(),
            source: source.to_string(),
        }
    }
}

impl AtomEntry {
    fn into_raw(self, source: &str) -> RawFeedItem {
        // rel="alternate" (or no rel) is the article; enclosures may be images
        let link = self
            .links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| self.links.first())
            .and_then(|l| l.href.clone());
        let enclosure_imgs = self
            .links
            .iter()
            .filter(|l| l.rel.as_deref() == Some("enclosure") && is_image_mime(l.mime.as_deref()))
            .filter_map(|l| l.href.clone())
            .collect::<Vec<_>>();

        let description = text(self.summary);
        let content = text(self.content);

        let mut thumbnails = media_thumbnails(self.media_thumbnail, Vec::new(), self.media_group);
        thumbnails.extend(enclosure_imgs);
        if let Some(src) = [&description, &content]
            .into_iter()
            .flatten()
            .find_map(|h| first_img_src(h))
        {
            thumbnails.push(src);
        }

        RawFeedItem {
            title: text(self.title),
            link,
            guid: text(self.id),
            description,
            content,
            creators: self
                .author
                .into_iter()
                .filter_map(|a| text(a.name))
                .collect(),
            thumbnails,
            date_candidates: [text(self.published), text(self.updated)]
                .into_iter()
                .flatten()
                .collect(),
            source: source.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Rss,
    Rdf,
    Atom,
}

/// Detect the document type from its root element.
pub fn sniff_format(xml: &str) -> Option<FeedFormat> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let local = e.local_name();
                let name = String::from_utf8_lossy(local.as_ref()).to_ascii_lowercase();
                return match name.as_str() {
                    "rss" => Some(FeedFormat::Rss),
                    "rdf" => Some(FeedFormat::Rdf),
                    "feed" => Some(FeedFormat::Atom),
                    _ => None,
                };
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// HTML entities that are not defined in XML and break the parser.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", "&#160;")
        .replace("&ndash;", "&#8211;")
        .replace("&mdash;", "&#8212;")
        .replace("&ldquo;", "&#8220;")
        .replace("&rdquo;", "&#8221;")
        .replace("&lsquo;", "&#8216;")
        .replace("&rsquo;", "&#8217;")
        .replace("&hellip;", "&#8230;")
}

/// Parse a feed document into raw items tagged with `source`.
pub fn parse_feed(body: &str, source: &str) -> Result<Vec<RawFeedItem>, FetchError> {
    let t0 = std::time::Instant::now();
    let trimmed = body.trim_start_matches('\u{feff}').trim();
    let xml = scrub_html_entities_for_xml(trimmed);

    let items = match sniff_format(&xml) {
        Some(FeedFormat::Rss) => from_str::<Rss>(&xml)
            .map_err(|e| FetchError::Parse(format!("rss: {e}")))?
            .channel
            .items
            .into_iter()
            .map(|it| it.into_raw(source))
            .collect::<Vec<_>>(),
        Some(FeedFormat::Rdf) => from_str::<Rdf>(&xml)
            .map_err(|e| FetchError::Parse(format!("rdf: {e}")))?
            .items
            .into_iter()
            .map(|it| it.into_raw(source))
            .collect(),
        Some(FeedFormat::Atom) => from_str::<AtomFeed>(&xml)
            .map_err(|e| FetchError::Parse(format!("atom: {e}")))?
            .entries
            .into_iter()
            .map(|e| e.into_raw(source))
            .collect(),
        None => return Err(FetchError::Parse("not an RSS or Atom document".into())),
    };

    histogram!("feed_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    counter!("feed_raw_items_total").increment(items.len() as u64);
    Ok(items)
}

/// Fetches feeds over HTTP(S).
pub struct HttpFeedFetcher {
    client: reqwest::Client,
}

impl HttpFeedFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(4).min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, locator: &str) -> Result<Vec<RawFeedItem>, FetchError> {
        let resp = self
            .client
            .get(locator)
            .header(
                reqwest::header::ACCEPT,
                "application/rss+xml, application/atom+xml, application/xml;q=0.9, */*;q=0.8",
            )
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        parse_feed(&body, locator)
    }
}
