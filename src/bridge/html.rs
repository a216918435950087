//! Host bridge over saved YouTube results-page HTML

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use tokio::fs;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    dedup_by_video_id, ContentRequest, ContentResponse, HostBridge, VideoRecord, MISSING_FIELD,
};
use crate::engine::TargetHandle;
use crate::error::{PipelineError, Result};

const YOUTUBE_ORIGIN: &str = "https://www.youtube.com";

/// One "tab": page snapshots taken after successive scrolls
struct PageTab {
    snapshots: Vec<String>,
    revealed: usize,
}

/// Offline host. Each tab starts with its first snapshot visible; every scroll
/// reveals the next one, the way infinite scroll appends cards to the page.
#[derive(Default)]
pub struct HtmlPageHost {
    tabs: RwLock<HashMap<TargetHandle, PageTab>>,
}

impl HtmlPageHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a tab with its snapshots in scroll order.
    pub fn add_tab(&self, target: TargetHandle, snapshots: Vec<String>) {
        let revealed = usize::from(!snapshots.is_empty());
        self.tabs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target, PageTab { snapshots, revealed });
    }

    /// Build a host with a single tab loaded from HTML files.
    pub async fn from_files<P: AsRef<Path>>(target: TargetHandle, paths: &[P]) -> Result<Self> {
        let mut snapshots = Vec::with_capacity(paths.len());
        for path in paths {
            let html = fs::read_to_string(path.as_ref()).await?;
            debug!("Loaded page snapshot {} ({} bytes)", path.as_ref().display(), html.len());
            snapshots.push(html);
        }

        info!("📄 Loaded {} page snapshot(s) for tab {}", snapshots.len(), target);
        let host = Self::new();
        host.add_tab(target, snapshots);
        Ok(host)
    }

    fn handle(&self, target: &TargetHandle, request: ContentRequest) -> Result<ContentResponse> {
        let mut tabs = self.tabs.write().unwrap_or_else(PoisonError::into_inner);
        let tab = tabs.get_mut(target).ok_or_else(|| {
            PipelineError::HostUnavailable(format!("No page open for target {}", target))
        })?;

        match request {
            ContentRequest::PerformSingleScroll { step } => {
                if tab.revealed < tab.snapshots.len() {
                    tab.revealed += 1;
                }
                debug!("Scrolled {} by {} px ({} snapshot(s) visible)", target, step, tab.revealed);
                Ok(ContentResponse::success(None))
            }
            ContentRequest::ParseAllVideoCards => {
                let mut records = Vec::new();
                for html in &tab.snapshots[..tab.revealed] {
                    records.extend(parse_video_cards(html));
                }
                let records = dedup_by_video_id(records);
                Ok(ContentResponse::success(Some(serde_json::to_value(records)?)))
            }
        }
    }
}

#[async_trait]
impl HostBridge for HtmlPageHost {
    async fn send_to_content(
        &self,
        target: &TargetHandle,
        request: ContentRequest,
    ) -> Result<ContentResponse> {
        self.handle(target, request)
    }
}

struct CardSelectors {
    card: Selector,
    shorts_link: Selector,
    labelled: Selector,
    watch_link: Selector,
    title: Selector,
    duration: Selector,
    thumbnail: Selector,
    channel: Selector,
    metadata: Selector,
}

const CARD: &str = "ytd-rich-item-renderer, ytd-video-renderer, .yt-lockup-view-model";
const TITLE: &str = "h3 a span, #video-title, .yt-lockup-metadata-view-model__title";
const DURATION: &str =
    ".ytd-thumbnail-overlay-time-status-renderer .style-scope, .yt-badge-shape__text";
const CHANNEL: &str =
    r#"a[href^="/@"], a[href^="/channel/"], a[href^="/c/"], .yt-lockup-byline a"#;
const METADATA: &str = ".yt-content-metadata-view-model__metadata-row, #metadata-line span";

impl CardSelectors {
    fn build() -> Option<Self> {
        Some(Self {
            card: Selector::parse(CARD).ok()?,
            shorts_link: Selector::parse(r#"[href*="/shorts/"]"#).ok()?,
            labelled: Selector::parse("[aria-label]").ok()?,
            watch_link: Selector::parse(r#"a[href*="/watch?v="]"#).ok()?,
            title: Selector::parse(TITLE).ok()?,
            duration: Selector::parse(DURATION).ok()?,
            thumbnail: Selector::parse(r#"img[src*="i.ytimg.com/vi/"]"#).ok()?,
            channel: Selector::parse(CHANNEL).ok()?,
            metadata: Selector::parse(METADATA).ok()?,
        })
    }
}

/// Parse every regular video card in a results page. Shorts, live streams and
/// reels are skipped, as are cards without a watch link.
pub fn parse_video_cards(html: &str) -> Vec<VideoRecord> {
    let Some(selectors) = CardSelectors::build() else {
        warn!("Video card selectors failed to compile");
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut videos = Vec::new();

    for card in document.select(&selectors.card) {
        if is_excluded(&card, &selectors) {
            continue;
        }

        let Some(href) = card
            .select(&selectors.watch_link)
            .next()
            .and_then(|link| link.value().attr("href"))
        else {
            continue;
        };

        let Some(video_id) = video_id_from_href(href) else {
            continue;
        };
        if !seen.insert(video_id.clone()) {
            continue;
        }

        let (channel_name, channel_id) = channel_of(&card, &selectors);
        let (views, published) = views_and_published(&card, &selectors);

        videos.push(VideoRecord {
            video_id,
            title: first_text(&card, &selectors.title),
            duration: first_text(&card, &selectors.duration),
            channel_name,
            channel_id,
            views,
            published,
            thumbnail_url: card
                .select(&selectors.thumbnail)
                .next()
                .and_then(|img| img.value().attr("src"))
                .map(|src| src.split('?').next().unwrap_or(src).to_string())
                .unwrap_or_default(),
        });
    }

    debug!("Parsed {} video cards", videos.len());
    videos
}

fn is_excluded(card: &ElementRef, selectors: &CardSelectors) -> bool {
    if card.select(&selectors.shorts_link).next().is_some() {
        return true;
    }

    let flagged_label = card.select(&selectors.labelled).any(|el| {
        let label = el.value().attr("aria-label").unwrap_or_default().to_lowercase();
        label.contains("shorts") || label.contains("live")
    });
    if flagged_label {
        return true;
    }

    if card.value().classes().any(|class| class == "ytd-reel-item-renderer") {
        return true;
    }

    card.value().attr("is-shorts").is_some()
        || card
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|el| el.value().attr("is-shorts").is_some())
}

/// Extract the `v` query parameter from a (possibly relative) watch URL.
pub(crate) fn video_id_from_href(href: &str) -> Option<String> {
    let base = Url::parse(YOUTUBE_ORIGIN).ok()?;
    let url = base.join(href).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "v")
        .map(|(_, value)| value.into_owned())
        .filter(|id| !id.is_empty())
}

fn text_of(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn first_text(card: &ElementRef, selector: &Selector) -> String {
    card.select(selector)
        .next()
        .map(|el| text_of(&el))
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| MISSING_FIELD.to_string())
}

fn channel_of(card: &ElementRef, selectors: &CardSelectors) -> (String, String) {
    let Some(link) = card.select(&selectors.channel).next() else {
        return (MISSING_FIELD.to_string(), String::new());
    };

    let mut name = text_of(&link);
    if name.is_empty() {
        name = MISSING_FIELD.to_string();
    }

    let href = link.value().attr("href").unwrap_or_default();
    let id = ["/@", "/channel/", "/c/"]
        .iter()
        .find_map(|prefix| href.strip_prefix(prefix))
        .unwrap_or_default()
        .to_string();

    (name, id)
}

/// Metadata rows read like "155K views • 11 months ago", in either order.
fn views_and_published(card: &ElementRef, selectors: &CardSelectors) -> (String, String) {
    let mut views = MISSING_FIELD.to_string();
    let mut published = MISSING_FIELD.to_string();

    let texts: Vec<String> = card
        .select(&selectors.metadata)
        .map(|el| text_of(&el))
        .collect();
    if texts.len() < 2 {
        return (views, published);
    }

    let combined = texts
        .into_iter()
        .filter(|t| !t.is_empty() && t != "•")
        .collect::<Vec<_>>()
        .join(" • ");

    for part in combined.split(" • ").map(str::trim) {
        if part.contains("view") || part.contains("watched") {
            views = part.to_string();
        } else if part.contains("ago") || part.contains("premiered") || part.contains("streamed") {
            published = part.to_string();
        }
    }

    (views, published)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card_html(id: &str) -> String {
        format!(
            r#"<ytd-video-renderer><a href="/watch?v={id}">{id}</a></ytd-video-renderer>"#,
            id = id
        )
    }

    const PAGE: &str = r#"
        <html><body>
        <ytd-video-renderer>
            <a id="thumbnail" href="/watch?v=abc123&t=10s">
                <img src="https://i.ytimg.com/vi/abc123/hqdefault.jpg?sqp=xyz">
            </a>
            <h3><a href="/watch?v=abc123"><span> Tokio in depth </span></a></h3>
            <div class="ytd-thumbnail-overlay-time-status-renderer">
                <span class="style-scope">12:34</span>
            </div>
            <a href="/@RustLang">Rust Lang</a>
            <div id="metadata-line"><span>155K views</span><span>11 months ago</span></div>
        </ytd-video-renderer>
        <ytd-video-renderer>
            <a href="/shorts/zzz">short</a>
            <a href="/watch?v=short1"><span>A short</span></a>
        </ytd-video-renderer>
        <ytd-video-renderer>
            <a href="/watch?v=live1"><span>Streaming now</span></a>
            <div aria-label="LIVE"></div>
        </ytd-video-renderer>
        <div is-shorts>
            <ytd-rich-item-renderer><a href="/watch?v=shelf1">shelf</a></ytd-rich-item-renderer>
        </div>
        <ytd-video-renderer>
            <a href="/watch?v=abc123">duplicate</a>
        </ytd-video-renderer>
        <ytd-video-renderer>
            <a href="/watch?v=bare">no metadata</a>
        </ytd-video-renderer>
        </body></html>
    "#;

    #[test]
    fn test_parse_regular_card() {
        let videos = parse_video_cards(PAGE);
        let first = &videos[0];
        assert_eq!(first.video_id, "abc123");
        assert_eq!(first.title, "Tokio in depth");
        assert_eq!(first.duration, "12:34");
        assert_eq!(first.channel_name, "Rust Lang");
        assert_eq!(first.channel_id, "RustLang");
        assert_eq!(first.views, "155K views");
        assert_eq!(first.published, "11 months ago");
        assert_eq!(first.thumbnail_url, "https://i.ytimg.com/vi/abc123/hqdefault.jpg");
    }

    #[test]
    fn test_excludes_shorts_live_and_duplicates() {
        let ids: Vec<_> = parse_video_cards(PAGE)
            .into_iter()
            .map(|v| v.video_id)
            .collect();
        assert_eq!(ids, vec!["abc123", "bare"]);
    }

    #[test]
    fn test_missing_fields_use_placeholder() {
        let videos = parse_video_cards(PAGE);
        let bare = videos.iter().find(|v| v.video_id == "bare").unwrap();
        assert_eq!(bare.title, MISSING_FIELD);
        assert_eq!(bare.views, MISSING_FIELD);
        assert_eq!(bare.channel_id, "");
    }

    #[test]
    fn test_video_id_from_href() {
        assert_eq!(
            video_id_from_href("/watch?v=dQw4w9WgXcQ&list=x").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(video_id_from_href("https://www.youtube.com/watch?v=a1").as_deref(), Some("a1"));
        assert_eq!(video_id_from_href("/watch?list=x"), None);
    }

    #[tokio::test]
    async fn test_scroll_reveals_next_snapshot() {
        let host = HtmlPageHost::new();
        let tab = TargetHandle::from("tab-1");
        host.add_tab(
            tab.clone(),
            vec![card_html("one"), card_html("two")],
        );

        assert_eq!(host.scrape(&tab).await.unwrap().len(), 1);
        host.scroll(&tab, 1000).await.unwrap();
        host.scroll(&tab, 1000).await.unwrap();
        assert_eq!(host.scrape(&tab).await.unwrap().len(), 2);
    }

    #[test]
    fn test_from_files_loads_snapshots_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("page-1.html");
        let second = dir.path().join("page-2.html");
        std::fs::write(&first, card_html("p1")).unwrap();
        std::fs::write(&second, PAGE).unwrap();

        tokio_test::block_on(async {
            let tab = TargetHandle::from("saved");
            let host = HtmlPageHost::from_files(tab.clone(), &[first, second])
                .await
                .unwrap();

            let ids = |videos: Vec<VideoRecord>| -> Vec<String> {
                videos.into_iter().map(|v| v.video_id).collect()
            };
            assert_eq!(ids(host.scrape(&tab).await.unwrap()), vec!["p1"]);

            host.scroll(&tab, 500).await.unwrap();
            assert_eq!(
                ids(host.scrape(&tab).await.unwrap()),
                vec!["p1", "abc123", "bare"]
            );
        });
    }

    #[tokio::test]
    async fn test_unknown_tab_is_unavailable() {
        let host = HtmlPageHost::new();
        let err = host.scroll(&TargetHandle::from("gone"), 100).await.unwrap_err();
        assert!(matches!(err, PipelineError::HostUnavailable(_)));
    }
}
