//! Pre-fetch content classification.
//!
//! The classifier decides the fetch strategy from the resource
//! reference alone, before any network round-trip: document-like
//! references are fetched as text, known media extensions skip the
//! fetch entirely (the relay URL itself becomes the payload), and
//! everything else is fetched as an opaque binary resource.

/// Fetch strategy chosen ahead of the network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Fetch as text and treat the response as markup.
    Text,
    /// Hand the relay URL to the viewer as an image source.
    Image,
    /// Hand the relay URL to the viewer as an audio source.
    Audio,
    /// Hand the relay URL to the viewer as a video source.
    Video,
    /// Fetch as an opaque binary resource.
    Resource,
    /// Fetch as the explicitly requested media type.
    Exact(String),
}

impl FetchStrategy {
    /// The request type string the loader fetches with, for strategies
    /// that fetch at all.
    pub fn request_type(&self) -> Option<&str> {
        match self {
            Self::Text => Some("text"),
            Self::Resource => Some("resource"),
            Self::Exact(hint) => Some(hint.as_str()),
            Self::Image | Self::Audio | Self::Video => None,
        }
    }
}

/// Markup, script, style, and dynamic-page extensions fetched as text.
const DOCUMENT_EXTENSIONS: [&str; 18] = [
    "shtml", "shtm", "html", "htm", "php", "jsp", "jspx", "asp", "aspx", "py", "pl", "cgi", "css",
    "js", "json", "txt", "cfm", "cfml",
];

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "svg", "bmp", "ico"];
const AUDIO_EXTENSIONS: [&str; 3] = ["mp3", "wav", "ogg"];
const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "webm", "3gp"];

/// Ordered classification table; the first matching row wins.
const STRATEGY_TABLE: [(fn(&str) -> bool, FetchStrategy); 4] = [
    (is_document_like, FetchStrategy::Text),
    (is_image_reference, FetchStrategy::Image),
    (is_audio_reference, FetchStrategy::Audio),
    (is_video_reference, FetchStrategy::Video),
];

/// Classifies a resource reference, honoring an explicit type hint.
pub fn classify(resource_ref: &str, media_type_hint: Option<&str>) -> FetchStrategy {
    if let Some(hint) = media_type_hint {
        return FetchStrategy::Exact(hint.to_owned());
    }

    let segment = final_path_segment(resource_ref);
    for (matches, strategy) in &STRATEGY_TABLE {
        if matches(segment) {
            return strategy.clone();
        }
    }

    FetchStrategy::Resource
}

/// The last path segment of a reference, with any query or fragment
/// suffix removed.
fn final_path_segment(resource_ref: &str) -> &str {
    let end = resource_ref
        .find(['?', '#'])
        .unwrap_or(resource_ref.len());
    let trimmed = &resource_ref[..end];

    // Skip past `scheme://host` so the authority never looks like a
    // file extension.
    let path_start = match trimmed.find("://") {
        Some(scheme_end) => {
            let after_scheme = &trimmed[scheme_end + 3..];
            match after_scheme.find('/') {
                Some(slash) => scheme_end + 3 + slash + 1,
                None => trimmed.len(),
            }
        }
        None => 0,
    };

    let path = &trimmed[path_start..];
    match path.rfind('/') {
        Some(slash) => &path[slash + 1..],
        None => path,
    }
}

/// Document-like: a known text extension, a bare segment with no
/// extension, or a segment without lowercase letters (directory-style
/// uppercase paths).
fn is_document_like(segment: &str) -> bool {
    if !segment.bytes().any(|byte| byte.is_ascii_lowercase()) {
        return true;
    }

    match extension_of(segment) {
        Some(extension) => DOCUMENT_EXTENSIONS
            .iter()
            .any(|known| extension.eq_ignore_ascii_case(known)),
        None => true,
    }
}

fn is_image_reference(segment: &str) -> bool {
    has_extension_in(segment, &IMAGE_EXTENSIONS)
}

fn is_audio_reference(segment: &str) -> bool {
    has_extension_in(segment, &AUDIO_EXTENSIONS)
}

fn is_video_reference(segment: &str) -> bool {
    has_extension_in(segment, &VIDEO_EXTENSIONS)
}

fn has_extension_in(segment: &str, known: &[&str]) -> bool {
    extension_of(segment)
        .is_some_and(|extension| known.iter().any(|entry| extension.eq_ignore_ascii_case(entry)))
}

fn extension_of(segment: &str) -> Option<&str> {
    segment
        .rfind('.')
        .map(|dot| &segment[dot + 1..])
        .filter(|extension| !extension.is_empty())
}
