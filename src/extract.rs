use crate::model::{MediaItem, PhotoSize, PostKind, RawPost};
use once_cell::sync::Lazy;
use regex::Regex;

static IMG_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<img\b[^>]*>").expect("valid img tag regex"));

static ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)([a-z][a-z0-9_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("valid attribute regex")
});

/// Pull every displayable image out of a post.
///
/// Photo posts yield one item per attachment. Text posts are scanned for
/// `<img>` tags in their HTML body; dimensions come from the tag attributes
/// and are `0` when the markup does not state them. Other post types yield
/// nothing.
pub fn extract_media(post: &RawPost) -> Vec<MediaItem> {
    let images: Vec<(String, u32, u32)> = match post.kind {
        PostKind::Photo => post
            .photos
            .iter()
            .filter_map(|photo| best_size(photo.original_size.as_ref(), &photo.alt_sizes))
            .map(|size| (size.url.clone(), size.width, size.height))
            .collect(),
        PostKind::Text => post.body.as_deref().map(html_images).unwrap_or_default(),
        _ => Vec::new(),
    };

    let caption = post
        .caption
        .as_deref()
        .filter(|c| !c.is_empty())
        .or(post.summary.as_deref())
        .unwrap_or_default();

    images
        .into_iter()
        .enumerate()
        .map(|(index, (url, width, height))| MediaItem {
            id: format!("{}-img-{}", post.post_id(), index),
            url,
            width,
            height,
            source_collection_id: post.blog_name.clone(),
            source_item_id: post.post_id().to_string(),
            timestamp: post.timestamp,
            tags: post.tags.clone(),
            origin_url: post.post_url.clone(),
            caption: caption.to_string(),
            kind: post.kind,
        })
        .collect()
}

fn best_size<'a>(original: Option<&'a PhotoSize>, alt: &'a [PhotoSize]) -> Option<&'a PhotoSize> {
    original
        .filter(|s| !s.url.is_empty())
        .or_else(|| {
            alt.iter()
                .filter(|s| !s.url.is_empty())
                .max_by_key(|s| u64::from(s.width) * u64::from(s.height))
        })
}

/// `(src, width, height)` for each `<img>` tag with an http(s) source.
fn html_images(html: &str) -> Vec<(String, u32, u32)> {
    IMG_TAG
        .find_iter(html)
        .filter_map(|tag| {
            let mut src = None;
            let (mut width, mut height) = (None, None);
            let (mut orig_width, mut orig_height) = (None, None);
            for cap in ATTR.captures_iter(tag.as_str()) {
                let name = cap[1].to_ascii_lowercase();
                let value = cap
                    .get(2)
                    .or_else(|| cap.get(3))
                    .or_else(|| cap.get(4))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                match name.as_str() {
                    "src" => src = Some(value.to_string()),
                    "width" => width = parse_dimension(value),
                    "height" => height = parse_dimension(value),
                    "data-orig-width" => orig_width = parse_dimension(value),
                    "data-orig-height" => orig_height = parse_dimension(value),
                    _ => {}
                }
            }
            let src = src.filter(|s| s.starts_with("http://") || s.starts_with("https://"))?;
            Some((
                decode_entities(&src),
                orig_width.or(width).unwrap_or(0),
                orig_height.or(height).unwrap_or(0),
            ))
        })
        .collect()
}

fn parse_dimension(value: &str) -> Option<u32> {
    value.trim().trim_end_matches("px").parse().ok()
}

fn decode_entities(url: &str) -> String {
    url.replace("&amp;", "&")
}
