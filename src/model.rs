use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    Text,
    Photo,
    Quote,
    Link,
    Chat,
    Audio,
    Video,
    Answer,
    #[default]
    #[serde(other)]
    Other,
}

impl PostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostKind::Text => "text",
            PostKind::Photo => "photo",
            PostKind::Quote => "quote",
            PostKind::Link => "link",
            PostKind::Chat => "chat",
            PostKind::Audio => "audio",
            PostKind::Video => "video",
            PostKind::Answer => "answer",
            PostKind::Other => "other",
        }
    }
}

/// Subset of an upstream post that extraction and pagination read.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RawPost {
    #[serde(default, deserialize_with = "de_post_id")]
    pub id: String,
    #[serde(default)]
    pub id_string: Option<String>,
    #[serde(default)]
    pub blog_name: String,
    #[serde(default)]
    pub post_url: String,
    #[serde(rename = "type", default)]
    pub kind: PostKind,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub liked_timestamp: Option<i64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub photos: Vec<Photo>,
}

impl RawPost {
    pub fn post_id(&self) -> &str {
        match self.id_string.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => &self.id,
        }
    }

    /// Timestamp used as the `before` cursor when this post ends a page.
    /// Likes are ordered by when they were liked, not when they were posted.
    pub fn cursor_timestamp(&self) -> i64 {
        self.liked_timestamp.unwrap_or(self.timestamp)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Photo {
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub original_size: Option<PhotoSize>,
    #[serde(default)]
    pub alt_sizes: Vec<PhotoSize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PhotoSize {
    pub url: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

/// Status block returned with every upstream response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResponseMeta {
    pub status: u16,
    #[serde(rename = "msg", default)]
    pub message: String,
}

/// One page of the upstream listing.
#[derive(Debug, Clone, Default)]
pub struct PostPage {
    pub posts: Vec<RawPost>,
    pub total_count: Option<u64>,
    pub meta: ResponseMeta,
}

/// A displayable image pulled out of a post.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaItem {
    pub id: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub source_collection_id: String,
    pub source_item_id: String,
    pub timestamp: i64,
    pub tags: Vec<String>,
    pub origin_url: String,
    pub caption: String,
    pub kind: PostKind,
}

/// A unit of work for the transfer engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferItem {
    pub source_url: String,
    pub target_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl TransferItem {
    pub fn new(source_url: impl Into<String>, target_name: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            target_name: target_name.into(),
            metadata: None,
        }
    }

    /// Transfer item for an extracted image, carrying the item itself as metadata.
    pub fn for_media(item: &MediaItem) -> Self {
        Self {
            source_url: item.url.clone(),
            target_name: media_file_name(item),
            metadata: serde_json::to_value(item).ok(),
        }
    }
}

/// `{blog}_{media id}.{ext}`, with the extension taken from the URL path.
pub fn media_file_name(item: &MediaItem) -> String {
    let stem = if item.source_collection_id.is_empty() {
        item.id.clone()
    } else {
        format!("{}_{}", item.source_collection_id, item.id)
    };
    format!("{}.{}", sanitize_file_name(&stem), url_extension(&item.url))
}

fn url_extension(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    match last.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            ext.to_ascii_lowercase()
        }
        _ => "jpg".to_string(),
    }
}

/// Replace characters that are not safe in a single path component.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

fn de_post_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    // Post ids arrive as numbers on older endpoints and strings on newer ones.
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "unexpected post id: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_item(url: &str) -> MediaItem {
        MediaItem {
            id: "123-img-0".into(),
            url: url.into(),
            width: 500,
            height: 400,
            source_collection_id: "staff".into(),
            source_item_id: "123".into(),
            timestamp: 1_700_000_000,
            tags: vec!["art".into()],
            origin_url: "https://staff.tumblr.com/post/123".into(),
            caption: String::new(),
            kind: PostKind::Photo,
        }
    }

    #[test]
    fn media_file_name_uses_url_extension() {
        let item = sample_item("https://64.media.tumblr.com/abc/s1280x1920/def.PNG?x=1");
        assert_eq!(media_file_name(&item), "staff_123-img-0.png");
    }

    #[test]
    fn media_file_name_defaults_to_jpg() {
        let item = sample_item("https://64.media.tumblr.com/abc/noext");
        assert_eq!(media_file_name(&item), "staff_123-img-0.jpg");
    }

    #[test]
    fn sanitize_strips_separators() {
        assert_eq!(sanitize_file_name("../a/b:c"), "_a_b_c");
        assert_eq!(sanitize_file_name(".."), "unnamed");
    }

    #[test]
    fn for_media_attaches_metadata() {
        let item = sample_item("https://x/y.gif");
        let transfer = TransferItem::for_media(&item);
        assert_eq!(transfer.source_url, "https://x/y.gif");
        assert_eq!(transfer.target_name, "staff_123-img-0.gif");
        assert_eq!(transfer.metadata.unwrap()["source_item_id"], "123");
    }

    #[test]
    fn raw_post_accepts_numeric_and_string_ids() {
        let post: RawPost = serde_json::from_value(json!({
            "id": 987654321u64,
            "type": "photo",
            "timestamp": 10,
            "liked_timestamp": 20
        }))
        .unwrap();
        assert_eq!(post.post_id(), "987654321");
        assert_eq!(post.kind, PostKind::Photo);
        assert_eq!(post.cursor_timestamp(), 20);

        let post: RawPost = serde_json::from_value(json!({
            "id_string": "42",
            "type": "unknownthing",
            "timestamp": 10
        }))
        .unwrap();
        assert_eq!(post.post_id(), "42");
        assert_eq!(post.kind, PostKind::Other);
        assert_eq!(post.cursor_timestamp(), 10);
    }
}
