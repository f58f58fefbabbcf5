//! Record metadata types and ICY parsing
//!
//! Pure data types and parsing functions for ICY (Icecast/Shoutcast) metadata.

use std::hash::{Hash, Hasher};

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use serde::{Deserialize, Serialize};

/// Minimum confidence for a detected charset to replace the UTF-8 default
const CHARSET_CONFIDENCE: f32 = 0.5;

/// A track announcement taken from a `StreamTitle` metadata field
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordInfo {
    /// Raw StreamTitle text
    pub info: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub stream_url: Option<String>,
    /// Seconds the record played; zero until it is replaced
    #[serde(default)]
    pub duration: f64,
}

impl RecordInfo {
    /// Create a record from an ICY title string.
    ///
    /// Splits on first ` - ` separator: "Artist - Title" → artist="Artist", title="Title".
    /// If no separator found, the whole string becomes the title.
    pub fn from_icy_title(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::default();
        }

        let (artist, title) = match raw.find(" - ") {
            Some(pos) => {
                let artist = raw[..pos].trim().to_string();
                let title = raw[pos + 3..].trim().to_string();
                (
                    if artist.is_empty() { None } else { Some(artist) },
                    if title.is_empty() { None } else { Some(title) },
                )
            }
            None => (None, Some(raw.to_string())),
        };

        Self {
            info: raw.to_string(),
            title,
            artist,
            stream_url: None,
            duration: 0.0,
        }
    }

    /// True for the "no record" value
    pub fn is_empty(&self) -> bool {
        self.info.trim().is_empty()
    }

    /// Info text used for equality: trimmed, whitespace collapsed, lower-cased.
    pub fn normalized(&self) -> String {
        self.info
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

impl PartialEq for RecordInfo {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for RecordInfo {}

impl Hash for RecordInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

/// Extract a `key='value';` field from ICY metadata text.
fn parse_field(metadata: &str, key: &str) -> Option<String> {
    let marker = format!("{key}='");
    let start = metadata.find(&marker)? + marker.len();
    let rest = &metadata[start..];
    // Titles may contain quotes; the field ends at the first `';` or at the end of the text.
    let end = rest
        .find("';")
        .or_else(|| rest.rfind('\''))
        .unwrap_or(rest.len());
    let value = rest[..end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parse ICY metadata string to extract StreamTitle value.
///
/// ICY metadata format: `StreamTitle='Artist - Song';StreamUrl='...';`
pub fn parse_icy_metadata(metadata: &str) -> Option<String> {
    parse_field(metadata, "StreamTitle")
}

/// Parse a metadata text block into a record, if it carries a title.
pub fn parse_record(metadata: &str) -> Option<RecordInfo> {
    let title = parse_icy_metadata(metadata)?;
    let mut record = RecordInfo::from_icy_title(&title);
    record.stream_url = parse_field(metadata, "StreamUrl");
    Some(record)
}

/// Strip the NUL padding ICY blocks carry up to a multiple of 16 bytes.
pub fn trim_padding(raw_block: &[u8]) -> &[u8] {
    let end = raw_block
        .iter()
        .rposition(|&b| b != 0)
        .map(|p| p + 1)
        .unwrap_or(0);
    &raw_block[..end]
}

/// Text encoding of a station's ICY metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataCharset(&'static Encoding);

impl MetadataCharset {
    pub fn utf8() -> Self {
        Self(UTF_8)
    }

    pub fn encoding(self) -> &'static Encoding {
        self.0
    }

    /// WHATWG label, e.g. `windows-1251`
    pub fn name(self) -> &'static str {
        self.0.name()
    }

    /// Decode `bytes`; malformed sequences become U+FFFD.
    pub fn decode(self, bytes: &[u8]) -> String {
        self.0.decode_without_bom_handling(bytes).0.into_owned()
    }
}

/// Share of non-ASCII characters that decoded to something printable.
fn printable_share(text: &str) -> f32 {
    let mut high = 0usize;
    let mut printable = 0usize;
    for c in text.chars().filter(|c| !c.is_ascii()) {
        high += 1;
        if !c.is_control() && c != char::REPLACEMENT_CHARACTER {
            printable += 1;
        }
    }
    if high == 0 {
        return 0.0;
    }
    printable as f32 / high as f32
}

/// Guess the charset of a metadata block, with a confidence in `0.0..=1.0`.
///
/// Returns `None` for pure ASCII (every candidate decodes it the same way).
/// Valid UTF-8 wins outright; anything else goes to chardetng, and the
/// confidence is how much of the decoded text came out printable.
pub fn detect_charset(bytes: &[u8]) -> Option<(MetadataCharset, f32)> {
    if bytes.is_ascii() {
        return None;
    }
    if std::str::from_utf8(bytes).is_ok() {
        return Some((MetadataCharset::utf8(), 1.0));
    }
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let charset = MetadataCharset(detector.guess(None, false));
    let confidence = printable_share(&charset.decode(bytes));
    Some((charset, confidence))
}

/// Per-session charset: detected on the first non-ASCII block, then fixed.
#[derive(Debug, Default)]
pub struct CharsetDetector {
    detected: Option<MetadataCharset>,
}

impl CharsetDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Charset chosen for this session, if one was needed yet
    pub fn charset(&self) -> Option<MetadataCharset> {
        self.detected
    }

    /// Decode a metadata block, fixing the session charset on first need.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let charset = match self.detected {
            Some(charset) => charset,
            None => match detect_charset(bytes) {
                None => MetadataCharset::utf8(),
                Some((charset, confidence)) => {
                    let chosen = if confidence > CHARSET_CONFIDENCE {
                        charset
                    } else {
                        MetadataCharset::utf8()
                    };
                    tracing::debug!(charset = chosen.name(), confidence, "metadata charset");
                    self.detected = Some(chosen);
                    chosen
                }
            },
        };
        charset.decode(bytes)
    }
}
