//! Cached regex patterns for article markup processing.
//!
//! Uses LazyLock to compile patterns once on first use. All markup handling
//! is a targeted text scan: anything these patterns do not match is copied
//! through byte-for-byte.

use regex_lite::Regex;
use std::sync::LazyLock;

/// Elements that XHTML requires to be self-closed.
pub const VOID_ELEMENTS: &[&str] = &[
    "img", "br", "hr", "meta", "link", "source", "track", "input", "area", "base", "col", "embed",
    "param", "wbr",
];

/// Inside of a tag: quoted values are consumed whole, so a `>` or `src=`
/// within an attribute value never ends the tag or matches as an attribute.
const TAG_BODY: &str = r#"(?:[^>"']|"[^"]*"|'[^']*')"#;

// === Image patterns ===

/// Matches `<img ... src="...">`, capturing the double- or single-quoted value.
/// The leading `\s` keeps `data-src` and friends from matching.
pub static IMG_SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(r#"(?i)<img\b{TAG_BODY}*?\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)')"#);
    Regex::new(&pattern).unwrap()
});

/// Matches a whole `<img ...>` tag
pub static IMG_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)<img\b{TAG_BODY}*>")).unwrap());

/// Matches one attribute (with optional value) inside a tag, including its
/// leading whitespace.
pub static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\s+([^\s"'<>/=]+)(?:\s*=\s*(?:"[^"]*"|'[^']*'|[^\s"'<>`]+))?"#).unwrap()
});

// === Sanitizer patterns ===

/// Matches `<picture ...>` and `</picture>`
pub static PICTURE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)</?picture\b{TAG_BODY}*>")).unwrap());

/// Matches `<source ...>` and stray `</source>`
pub static SOURCE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)<source\b{TAG_BODY}*>|</source\s*>")).unwrap()
});

/// Matches explicit closing tags of void elements, e.g. `</img>`
pub static VOID_CLOSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(r"(?i)</(?:{})\s*>", VOID_ELEMENTS.join("|"));
    Regex::new(&pattern).unwrap()
});

/// Matches opening tags of void elements, capturing the name and attributes.
/// `<br/>` has no whitespace after the name and is left alone.
pub static VOID_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"(?i)<({})((?:\s{TAG_BODY}*)?)>",
        VOID_ELEMENTS.join("|")
    );
    Regex::new(&pattern).unwrap()
});

/// Matches named character references like `&nbsp;`
pub static NAMED_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&([A-Za-z][A-Za-z0-9]*);").unwrap());
