// tests/normalize.rs
use retro_feeds::ingest::types::RawFeedItem;
use retro_feeds::ingest::{merge_items, normalize_item, strip_html};

mod common;
use common::{pinned_now, raw_item, test_catalog, SRC_A, SRC_B};

#[test]
fn long_html_description_is_stripped_and_truncated() {
    let words = "lorem ipsum dolor sit amet ".repeat(12); // ~324 chars
    let raw = RawFeedItem {
        title: Some("<b>Big</b> news".into()),
        link: Some("https://news.test/big".into()),
        description: Some(format!("<div><p>{words}</p><script>alert(1)</script></div>")),
        source: SRC_A.into(),
        ..Default::default()
    };
    let item = normalize_item(raw, &test_catalog(), pinned_now(), 200).expect("kept");

    assert_eq!(item.title, "Big news");
    assert!(item.description.ends_with("..."));
    assert!(item.description.chars().count() <= 203);
    assert!(!item.description.contains('<'));
    assert!(!item.description.contains("alert"));
}

#[test]
fn missing_fields_fall_back_to_source_and_now() {
    let raw = RawFeedItem {
        title: Some("Untimed".into()),
        link: Some(" https://news.test/untimed ".into()),
        source: SRC_B.into(),
        ..Default::default()
    };
    let item = normalize_item(raw, &test_catalog(), pinned_now(), 200).unwrap();
    assert_eq!(item.link, "https://news.test/untimed");
    assert_eq!(item.source_name, "b.example.org");
    assert_eq!(item.creator, "b.example.org");
    assert_eq!(item.published_at, pinned_now());
    assert_eq!(item.relative_time, "just now");
    assert_eq!(item.identity_key, "https://news.test/untimed");
    assert_eq!(item.description, "");
    assert_eq!(item.thumbnail_url, None);
}

#[test]
fn items_without_title_or_link_are_dropped() {
    let cat = test_catalog();
    let mut no_title = raw_item(SRC_A, "x", 1);
    no_title.title = Some("<p> </p>".into());
    assert!(normalize_item(no_title, &cat, pinned_now(), 200).is_none());

    let mut no_link = raw_item(SRC_A, "y", 1);
    no_link.link = None;
    assert!(normalize_item(no_link, &cat, pinned_now(), 200).is_none());
}

#[test]
fn relative_time_reflects_age() {
    let cat = test_catalog();
    let it = |mins| normalize_item(raw_item(SRC_A, "r", mins), &cat, pinned_now(), 200).unwrap();
    assert_eq!(it(1).relative_time, "1 minute ago");
    assert_eq!(it(45).relative_time, "45 minutes ago");
    assert_eq!(it(180).relative_time, "3 hours ago");
    assert_eq!(it(60 * 24 * 2).relative_time, "2 days ago");
    assert_eq!(it(60 * 24 * 30).relative_time, "Feb 19, 2024");
}

#[test]
fn merge_orders_newest_first_and_keeps_first_duplicate() {
    let cat = test_catalog();
    let n = |src, id, mins| normalize_item(raw_item(src, id, mins), &cat, pinned_now(), 200).unwrap();
    let items = vec![n(SRC_A, "old", 90), n(SRC_A, "dup", 10), n(SRC_B, "new", 1), n(SRC_B, "dup", 10)];

    let (merged, dedup) = merge_items(items, 20);
    let ids: Vec<_> = merged.iter().map(|i| i.identity_key.as_str()).collect();
    assert_eq!(ids, vec!["new", "dup", "old"]);
    assert_eq!(dedup, 1);
    assert_eq!(merged[1].source_locator, SRC_A);
}

#[test]
fn strip_html_is_idempotent_on_plain_text() {
    let once = strip_html("Fish &amp; chips<br/>  &nbsp;tonight");
    assert_eq!(once, "Fish & chips tonight");
    assert_eq!(strip_html(&once), once);
}
