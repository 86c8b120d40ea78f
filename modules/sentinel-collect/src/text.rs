//! Small HTML/text helpers shared by the collectors.

use scraper::{Html, Selector};

/// Strip markup from an HTML fragment, collapsing whitespace runs.
pub fn strip_html(html: &str) -> String {
    if !html.contains('<') {
        return collapse_whitespace(html);
    }
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    collapse_whitespace(&text)
}

/// First `<img src>` found in an HTML fragment, if any.
pub fn first_img_src(html: &str) -> Option<String> {
    if !html.contains("<img") {
        return None;
    }
    let fragment = Html::parse_fragment(html);
    let selector = Selector::parse("img[src]").ok()?;
    fragment
        .select(&selector)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(|s| s.to_string())
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cap a summary at `max` chars, appending `...` when cut.
pub fn cap_summary(text: &str, max: usize) -> String {
    sentinel_common::truncate_chars(text, max)
}
