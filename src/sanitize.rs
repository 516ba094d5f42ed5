//! XHTML compliance for article markup.
//!
//! Strict EPUB readers parse content documents as XML, so markup that browsers
//! tolerate (named entities, unclosed `<br>`, `<picture>` wrappers) has to be
//! rewritten before packaging. Everything here is total: input these passes
//! do not understand comes back unchanged.
//!
//! General well-formedness repair (unbalanced tags, raw `&` or `<` in text) is
//! out of scope; the input is an already-extracted article.

use regex_lite::Captures;

use crate::patterns::{
    ATTR_RE, IMG_TAG_RE, NAMED_ENTITY_RE, PICTURE_TAG_RE, SOURCE_TAG_RE, VOID_CLOSE_RE,
    VOID_OPEN_RE,
};

/// Named entities rewritten to numeric character references.
///
/// The five XML predefined entities (`amp`, `lt`, `gt`, `quot`, `apos`) are
/// not listed and stay as named references.
pub const ENTITIES: &[(&str, u32)] = &[
    ("nbsp", 160),
    ("ndash", 8211),
    ("mdash", 8212),
    ("hellip", 8230),
    ("ldquo", 8220),
    ("rdquo", 8221),
    ("lsquo", 8216),
    ("rsquo", 8217),
    ("sbquo", 8218),
    ("bdquo", 8222),
    ("laquo", 171),
    ("raquo", 187),
    ("bull", 8226),
    ("middot", 183),
    ("copy", 169),
    ("reg", 174),
    ("trade", 8482),
    ("deg", 176),
    ("plusmn", 177),
    ("times", 215),
    ("divide", 247),
    ("para", 182),
    ("sect", 167),
    ("dagger", 8224),
    ("Dagger", 8225),
    ("prime", 8242),
    ("Prime", 8243),
    ("euro", 8364),
    ("pound", 163),
    ("yen", 165),
    ("cent", 162),
    ("frac14", 188),
    ("frac12", 189),
    ("frac34", 190),
    ("shy", 173),
    ("ensp", 8194),
    ("emsp", 8195),
    ("thinsp", 8201),
];

/// Image attributes that compete with `src` or only make sense online.
const STRIPPED_IMG_ATTRS: &[&str] = &["srcset", "sizes", "loading", "decoding"];

/// Run every sanitizer pass in order.
///
/// Idempotent: sanitizing already-sanitized markup is a no-op.
///
/// # Example
///
/// ```
/// let out = folio::sanitize::sanitize("<picture><img src=\"a.jpg\"></picture>&nbsp;<br>");
/// assert_eq!(out, "<img src=\"a.jpg\" />&#160;<br />");
/// ```
pub fn sanitize(html: &str) -> String {
    let html = strip_structural(html);
    let html = close_void_elements(&html);
    numeric_entities(&html)
}

/// Remove `<picture>` wrappers (keeping their `<img>`) and `<source>` elements.
pub fn strip_structural(html: &str) -> String {
    let html = PICTURE_TAG_RE.replace_all(html, "");
    SOURCE_TAG_RE.replace_all(&html, "").into_owned()
}

/// Drop explicit closing tags of void elements, then self-close the rest.
///
/// Element and attribute names of void tags are lowercased, since XHTML
/// names are case-sensitive.
pub fn close_void_elements(html: &str) -> String {
    let html = VOID_CLOSE_RE.replace_all(html, "");
    VOID_OPEN_RE
        .replace_all(&html, |caps: &Captures| {
            let name = caps[1].to_ascii_lowercase();
            let attrs = lowercase_attribute_names(caps[2].trim_end());
            if attrs.ends_with('/') {
                format!("<{name}{attrs}>")
            } else {
                format!("<{name}{attrs} />")
            }
        })
        .into_owned()
}

fn lowercase_attribute_names(attrs: &str) -> String {
    ATTR_RE
        .replace_all(attrs, |attr: &Captures| {
            let whole = &attr[0];
            let name = &attr[1];
            // ATTR_RE puts the name right after the leading whitespace
            let start = whole.len() - whole.trim_start().len();
            format!(
                "{}{}{}",
                &whole[..start],
                name.to_ascii_lowercase(),
                &whole[start + name.len()..]
            )
        })
        .into_owned()
}

/// Replace known named entities with numeric character references.
pub fn numeric_entities(html: &str) -> String {
    NAMED_ENTITY_RE
        .replace_all(html, |caps: &Captures| match entity_code(&caps[1]) {
            Some(code) => format!("&#{code};"),
            None => caps[0].to_string(),
        })
        .into_owned()
}

fn entity_code(name: &str) -> Option<u32> {
    ENTITIES
        .iter()
        .find(|(entity, _)| *entity == name)
        .map(|&(_, code)| code)
}

/// Remove `srcset`, `sizes`, `loading`, `decoding` and `data-*` attributes
/// from every `<img>` tag.
///
/// Some readers prefer `srcset` over `src`, which breaks offline references
/// once `src` points into the package.
pub fn strip_image_attributes(html: &str) -> String {
    IMG_TAG_RE
        .replace_all(html, |tag: &Captures| {
            ATTR_RE
                .replace_all(&tag[0], |attr: &Captures| {
                    let name = attr[1].to_ascii_lowercase();
                    if STRIPPED_IMG_ATTRS.contains(&name.as_str()) || name.starts_with("data-") {
                        String::new()
                    } else {
                        attr[0].to_string()
                    }
                })
                .into_owned()
        })
        .into_owned()
}
