//! Resource-reference tagging and restoration.
//!
//! Free-text prompts embed media locators in several notations. Before any
//! reasoning pass runs, every recognized locator is replaced by a semantic
//! placeholder tag (`<IMAGE_1/>`, `<VIDEO_2/>`, ...) so the reasoning
//! service never has to copy long URLs verbatim. After compilation the
//! tags are resolved back: structured fields receive the canonical
//! `gs://` form, and tags left unused in the payload are expanded back to
//! the locator the user originally typed.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Locator notations
// ---------------------------------------------------------------------------

/// Redirect-style download URL with a percent-encoded object segment:
/// `https://firebasestorage.googleapis.com/v0/b/<bucket>/o/<object>?...`.
///
/// Must be applied before [`OBJECT_URL_RE`]: the generic pattern also
/// matches this host and would otherwise swallow the whole URL with the
/// wrong bucket/object split.
static REDIRECT_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"https://firebasestorage\.googleapis\.com/v0/b/([A-Za-z0-9._-]+)/o/([A-Za-z0-9._/%-]+)(?:\?[^\s]*)?",
    )
    .expect("valid regex")
});

/// Signed or public object-store URL:
/// `https://<service>.googleapis.com/<bucket>/<object>.<ext>[?signature]`.
static OBJECT_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"https://[A-Za-z0-9.-]+\.googleapis\.com/([A-Za-z0-9._-]+)/([A-Za-z0-9._/%-]+\.[A-Za-z0-9]{1,5})(?:\?[^\s]*)?",
    )
    .expect("valid regex")
});

/// Structured bucket-path form, which is also the canonical form.
static BUCKET_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"gs://[A-Za-z0-9._/%-]+").expect("valid regex"));

/// Placeholder tag produced by [`tag`], e.g. `<VIDEO_2/>`.
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:IMAGE|VIDEO|AUDIO|FILE)_\d+/>").expect("valid regex"));

/// Whitespace run before closing punctuation, introduced by tag removal.
static SPACE_BEFORE_PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+([.,;:!?])").expect("valid regex"));

// ---------------------------------------------------------------------------
// Media categories
// ---------------------------------------------------------------------------

/// Broad media category of a referenced object, derived from its
/// file-extension suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaCategory {
    Video,
    Image,
    Audio,
    Other,
}

impl MediaCategory {
    /// Classify by extension (lowercased, without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "jpg" | "jpeg" | "png" | "webp" | "gif" | "bmp" | "tiff" => MediaCategory::Image,
            "mp4" | "mov" | "webm" | "mkv" | "avi" | "m4v" => MediaCategory::Video,
            "mp3" | "wav" | "ogg" | "m4a" | "flac" | "aac" | "opus" => MediaCategory::Audio,
            _ => MediaCategory::Other,
        }
    }

    /// Tag-name prefix for this category.
    pub fn tag_prefix(self) -> &'static str {
        match self {
            MediaCategory::Image => "IMAGE",
            MediaCategory::Video => "VIDEO",
            MediaCategory::Audio => "AUDIO",
            MediaCategory::Other => "FILE",
        }
    }
}

/// MIME type for a file extension (lowercased, without the dot).
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "m4a" => "audio/mp4",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "opus" => "audio/opus",
        _ => "application/octet-stream",
    }
}

/// Extension suffix of a canonical URI (lowercased, without the dot).
fn extension_of(uri: &str) -> Option<String> {
    let name = uri.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// One media locator extracted from a prompt.
///
/// One reference exists per distinct canonical URI per compilation; a
/// locator encountered twice (in any notation) reuses the same tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReference {
    /// The locator exactly as the user typed it.
    pub original_locator: String,
    /// Canonical `gs://bucket/object` form.
    pub canonical_uri: String,
    pub media_category: MediaCategory,
    pub mime_type: String,
    /// Placeholder tag substituted into the text, e.g. `<IMAGE_1/>`.
    pub tag: String,
}

/// Result of [`tag`]: the rewritten text plus the extracted references in
/// first-appearance order.
#[derive(Debug, Clone)]
pub struct TagOutcome {
    pub tagged_text: String,
    pub references: Vec<ResourceReference>,
}

/// Result of [`restore`]: payload fields with tags resolved to canonical
/// URIs, and the cleaned free text.
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub fields: serde_json::Value,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Tagging
// ---------------------------------------------------------------------------

/// A locator match claimed by one notation pattern.
struct Claim {
    start: usize,
    end: usize,
    canonical: String,
}

/// Replace every recognized media locator in `text` with a placeholder tag.
///
/// Notations are matched in specificity order (redirect URL, object-store
/// URL, bucket-path) so the generic URL pattern cannot swallow a more
/// specific match. Unsupported notations are left untouched; tagging never
/// fails an input. The tag index is global across all media categories and
/// assigned in order of first appearance; a canonical URI seen twice
/// reuses its existing tag.
pub fn tag(text: &str) -> TagOutcome {
    let mut claims: Vec<Claim> = Vec::new();

    claim_matches(text, &REDIRECT_URL_RE, &mut claims, |caps| {
        let bucket = &caps[1];
        let object = percent_decode(&caps[2]);
        format!("gs://{bucket}/{object}")
    });
    claim_matches(text, &OBJECT_URL_RE, &mut claims, |caps| {
        let bucket = &caps[1];
        let object = percent_decode(&caps[2]);
        format!("gs://{bucket}/{object}")
    });
    claim_matches(text, &BUCKET_PATH_RE, &mut claims, |caps| {
        caps[0].to_string()
    });

    claims.sort_by_key(|c| c.start);

    let mut references: Vec<ResourceReference> = Vec::new();
    let mut tag_by_uri: HashMap<String, String> = HashMap::new();
    let mut tagged_text = String::with_capacity(text.len());
    let mut cursor = 0;

    for claim in &claims {
        let tag = match tag_by_uri.get(&claim.canonical) {
            Some(existing) => existing.clone(),
            None => {
                let ext = extension_of(&claim.canonical).unwrap_or_default();
                let category = MediaCategory::from_extension(&ext);
                let tag = format!("<{}_{}/>", category.tag_prefix(), references.len() + 1);
                references.push(ResourceReference {
                    original_locator: text[claim.start..claim.end].to_string(),
                    canonical_uri: claim.canonical.clone(),
                    media_category: category,
                    mime_type: mime_for_extension(&ext).to_string(),
                    tag: tag.clone(),
                });
                tag_by_uri.insert(claim.canonical.clone(), tag.clone());
                tag
            }
        };
        tagged_text.push_str(&text[cursor..claim.start]);
        tagged_text.push_str(&tag);
        cursor = claim.end;
    }
    tagged_text.push_str(&text[cursor..]);

    TagOutcome {
        tagged_text,
        references,
    }
}

/// Collect non-overlapping matches of one pattern. A span already claimed
/// by a more specific pattern is skipped.
fn claim_matches(
    text: &str,
    re: &Regex,
    claims: &mut Vec<Claim>,
    canonicalize: impl Fn(&regex::Captures<'_>) -> String,
) {
    for caps in re.captures_iter(text) {
        let m = caps.get(0).expect("whole match");
        let overlaps = claims
            .iter()
            .any(|c| m.start() < c.end && c.start < m.end());
        if overlaps {
            continue;
        }
        claims.push(Claim {
            start: m.start(),
            end: m.end(),
            canonical: canonicalize(&caps),
        });
    }
}

/// Decode `%XX` escapes. Malformed escapes are passed through literally.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ---------------------------------------------------------------------------
// Restoration
// ---------------------------------------------------------------------------

/// Resolve tags in a compiled payload and its free text.
///
/// Every string field containing a tag receives the canonical URI. Fields
/// whose path appears in `media_object_paths` and whose value is exactly
/// one tag become a `{uri, mime_type}` object instead of a bare string.
/// A tag consumed by at least one field is stripped from the text; a tag
/// used nowhere is expanded back to the original user-typed locator, so
/// nothing is silently dropped. Output whitespace is normalized.
pub fn restore(
    fields: serde_json::Value,
    text: &str,
    references: &[ResourceReference],
    media_object_paths: &[String],
) -> RestoreOutcome {
    let by_tag: HashMap<&str, &ResourceReference> =
        references.iter().map(|r| (r.tag.as_str(), r)).collect();
    let mut consumed: HashSet<String> = HashSet::new();

    let mut fields = fields;
    resolve_value(
        &mut fields,
        String::new(),
        &by_tag,
        media_object_paths,
        &mut consumed,
    );

    let mut cleaned = text.to_string();
    for reference in references {
        let replacement = if consumed.contains(&reference.tag) {
            ""
        } else {
            reference.original_locator.as_str()
        };
        cleaned = cleaned.replace(&reference.tag, replacement);
    }

    RestoreOutcome {
        fields,
        text: normalize_whitespace(&cleaned),
    }
}

/// Expand every tag in `text` back to its original locator. Used for the
/// reasoning trail returned to the caller.
pub fn expand_tags(text: &str, references: &[ResourceReference]) -> String {
    let mut out = text.to_string();
    for reference in references {
        out = out.replace(&reference.tag, &reference.original_locator);
    }
    out
}

/// Walk the payload tree, replacing tags in string scalars and recording
/// which tags were consumed.
fn resolve_value(
    value: &mut serde_json::Value,
    path: String,
    by_tag: &HashMap<&str, &ResourceReference>,
    media_object_paths: &[String],
    consumed: &mut HashSet<String>,
) {
    match value {
        serde_json::Value::String(s) => {
            // A field that is exactly one tag and declared as a media
            // object resolves to {uri, mime_type}.
            if let Some(reference) = by_tag.get(s.as_str()) {
                if media_object_paths.iter().any(|p| *p == path) {
                    consumed.insert(reference.tag.clone());
                    *value = serde_json::json!({
                        "uri": reference.canonical_uri,
                        "mime_type": reference.mime_type,
                    });
                    return;
                }
            }
            let mut replaced = s.clone();
            for m in TAG_RE.find_iter(s) {
                if let Some(reference) = by_tag.get(m.as_str()) {
                    consumed.insert(reference.tag.clone());
                    replaced = replaced.replace(m.as_str(), &reference.canonical_uri);
                }
            }
            *s = replaced;
        }
        serde_json::Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                resolve_value(child, child_path, by_tag, media_object_paths, consumed);
            }
        }
        serde_json::Value::Array(items) => {
            for child in items.iter_mut() {
                resolve_value(child, path.clone(), by_tag, media_object_paths, consumed);
            }
        }
        _ => {}
    }
}

/// Collapse whitespace runs into single spaces and drop spaces left
/// dangling before punctuation after tag removal.
fn normalize_whitespace(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    SPACE_BEFORE_PUNCT_RE
        .replace_all(&collapsed, "$1")
        .into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_by_category_with_global_index() {
        let outcome = tag("Show gs://a.jpg then gs://b.mp4 then gs://c.mp3");
        assert_eq!(
            outcome.tagged_text,
            "Show <IMAGE_1/> then <VIDEO_2/> then <AUDIO_3/>"
        );
        let uris: Vec<&str> = outcome
            .references
            .iter()
            .map(|r| r.canonical_uri.as_str())
            .collect();
        assert_eq!(uris, vec!["gs://a.jpg", "gs://b.mp4", "gs://c.mp3"]);
    }

    #[test]
    fn repeated_locator_reuses_tag() {
        let outcome = tag("Use gs://media/cat.jpg and again gs://media/cat.jpg");
        assert_eq!(outcome.references.len(), 1);
        assert_eq!(outcome.tagged_text, "Use <IMAGE_1/> and again <IMAGE_1/>");
    }

    #[test]
    fn object_store_url_is_canonicalized() {
        let outcome =
            tag("Animate https://storage.googleapis.com/media/pets%20one/cat.jpg please");
        assert_eq!(outcome.references.len(), 1);
        assert_eq!(
            outcome.references[0].canonical_uri,
            "gs://media/pets one/cat.jpg"
        );
        assert_eq!(outcome.tagged_text, "Animate <IMAGE_1/> please");
    }

    #[test]
    fn redirect_url_wins_over_generic_pattern() {
        // The firebasestorage host also matches the generic googleapis
        // pattern; the specific notation must claim it first and decode
        // the percent-encoded object segment.
        let outcome = tag(
            "https://firebasestorage.googleapis.com/v0/b/media/o/pets%2Fcat.jpg?alt=media&token=abc",
        );
        assert_eq!(outcome.references.len(), 1);
        assert_eq!(outcome.references[0].canonical_uri, "gs://media/pets/cat.jpg");
        assert_eq!(outcome.tagged_text, "<IMAGE_1/>");
    }

    #[test]
    fn cross_notation_dedup_yields_one_reference() {
        let text = "gs://media/cat.jpg \
                    https://storage.googleapis.com/media/cat.jpg \
                    https://firebasestorage.googleapis.com/v0/b/media/o/cat.jpg?alt=media";
        let outcome = tag(text);
        assert_eq!(outcome.references.len(), 1);
        assert_eq!(outcome.tagged_text, "<IMAGE_1/> <IMAGE_1/> <IMAGE_1/>");
    }

    #[test]
    fn unsupported_notation_left_untouched() {
        let text = "See s3://other-cloud/file.jpg for details";
        let outcome = tag(text);
        assert!(outcome.references.is_empty());
        assert_eq!(outcome.tagged_text, text);
    }

    #[test]
    fn unknown_extension_tags_as_file() {
        let outcome = tag("Convert gs://docs/report.pdf for me");
        assert_eq!(outcome.references[0].media_category, MediaCategory::Other);
        assert_eq!(outcome.tagged_text, "Convert <FILE_1/> for me");
        assert_eq!(outcome.references[0].mime_type, "application/octet-stream");
    }

    #[test]
    fn trailing_punctuation_not_swallowed() {
        let outcome = tag("Look at https://storage.googleapis.com/media/cat.jpg, nice");
        assert_eq!(outcome.references[0].canonical_uri, "gs://media/cat.jpg");
        assert_eq!(outcome.tagged_text, "Look at <IMAGE_1/>, nice");
    }

    #[test]
    fn restore_resolves_field_and_strips_tag_from_text() {
        let outcome = tag("Animate gs://media/cat.jpg walking");
        let fields = serde_json::json!({"prompt": "a cat walking", "image": "<IMAGE_1/>"});
        let restored = restore(
            fields,
            &outcome.tagged_text,
            &outcome.references,
            &["image".to_string()],
        );
        assert_eq!(
            restored.fields["image"],
            serde_json::json!({"uri": "gs://media/cat.jpg", "mime_type": "image/jpeg"})
        );
        assert_eq!(restored.text, "Animate walking");
    }

    #[test]
    fn restore_inlines_canonical_uri_in_plain_string_fields() {
        let outcome = tag("Use gs://media/cat.jpg here");
        let fields = serde_json::json!({"prompt": "start from <IMAGE_1/> at dusk"});
        let restored = restore(fields, &outcome.tagged_text, &outcome.references, &[]);
        assert_eq!(
            restored.fields["prompt"],
            serde_json::json!("start from gs://media/cat.jpg at dusk")
        );
    }

    #[test]
    fn unused_tag_expands_back_to_original_locator() {
        let original = "https://storage.googleapis.com/media/cat.jpg";
        let outcome = tag(&format!("Show {original} now"));
        let restored = restore(
            serde_json::json!({"prompt": "unrelated"}),
            &outcome.tagged_text,
            &outcome.references,
            &[],
        );
        assert_eq!(restored.text, format!("Show {original} now"));
    }

    #[test]
    fn round_trip_without_consumption_preserves_text() {
        let original = "Blend gs://a/one.png with gs://b/two.mp4, then stop.";
        let outcome = tag(original);
        let restored = restore(
            serde_json::json!({}),
            &outcome.tagged_text,
            &outcome.references,
            &[],
        );
        assert_eq!(restored.text, original);
    }

    #[test]
    fn whitespace_normalized_after_tag_removal() {
        let outcome = tag("Render gs://media/dog.mp4 , thanks");
        let fields = serde_json::json!({"video": "<VIDEO_1/>"});
        let restored = restore(fields, &outcome.tagged_text, &outcome.references, &[]);
        // Tag consumed as a plain string field; the dangling space before
        // the comma is cleaned up.
        assert_eq!(restored.text, "Render, thanks");
    }

    #[test]
    fn expand_tags_restores_original_locators() {
        let outcome = tag("Mix gs://a.wav and gs://b.wav");
        let expanded = expand_tags(&outcome.tagged_text, &outcome.references);
        assert_eq!(expanded, "Mix gs://a.wav and gs://b.wav");
    }

    #[test]
    fn percent_decode_handles_malformed_escapes() {
        assert_eq!(percent_decode("a%2Fb"), "a/b");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }
}
