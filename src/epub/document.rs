//! EPUB document generation: content document, package document (OPF),
//! navigation document, container descriptor and stylesheet.

use chrono::{DateTime, Utc};

use crate::article::ArticleInput;
use crate::images::ImageResource;

/// Directory holding the publication inside the archive.
pub const OEBPS_DIR: &str = "OEBPS";
pub const CONTAINER_PATH: &str = "META-INF/container.xml";
pub const PACKAGE_DOCUMENT: &str = "content.opf";
pub const CONTENT_DOCUMENT: &str = "index.xhtml";
pub const NAV_DOCUMENT: &str = "nav.xhtml";
pub const STYLESHEET: &str = "style.css";

/// Container.xml template.
pub const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

/// Typography rules shared by every export.
pub const STYLESHEET_CSS: &str = include_str!("style.css");

const UNTITLED: &str = "Untitled Article";

/// The text artifacts of one EPUB, ready for packaging.
#[derive(Debug, Clone)]
pub struct Documents {
    pub container: String,
    pub package: String,
    pub nav: String,
    pub content: String,
    pub stylesheet: String,
}

/// Render every document for an article.
///
/// `body` is embedded verbatim, so it must already be sanitized XHTML with
/// image references rewritten to the entries in `images`.
pub fn build_documents(
    article: &ArticleInput,
    body: &str,
    images: &[ImageResource],
    language: &str,
) -> Documents {
    Documents {
        container: CONTAINER_XML.to_string(),
        package: package_document(article, images, language),
        nav: navigation_document(display_title(article), language),
        content: content_document(article, body, language),
        stylesheet: STYLESHEET_CSS.to_string(),
    }
}

fn display_title(article: &ArticleInput) -> &str {
    let title = article.title.trim();
    if title.is_empty() { UNTITLED } else { title }
}

/// Generate the XHTML content document.
pub fn content_document(article: &ArticleInput, body: &str, language: &str) -> String {
    let title = escape_xml(display_title(article));
    let lang = escape_xml(language);

    let mut doc = String::with_capacity(body.len() + 1024);
    doc.push_str(&format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{lang}" lang="{lang}">
<head>
  <meta charset="UTF-8" />
  <title>{title}</title>
  <link rel="stylesheet" type="text/css" href="{STYLESHEET}" />
</head>
<body>
  <header class="article-header">
"#
    ));

    if let Some(site) = non_blank(article.site_name.as_deref()) {
        doc.push_str(&format!(
            "    <p class=\"site-name\">{}</p>\n",
            escape_xml(site)
        ));
    }
    doc.push_str(&format!("    <h1 class=\"article-title\">{title}</h1>\n"));
    if let Some(byline) = non_blank(article.byline.as_deref()) {
        doc.push_str(&format!("    <p class=\"byline\">{}</p>\n", escape_xml(byline)));
    }

    let mut meta = Vec::new();
    if article.word_count > 0 {
        meta.push(format!("{} words", group_thousands(article.word_count)));
    }
    meta.push(format_date(&article.extracted_at));
    doc.push_str(&format!(
        "    <p class=\"meta\">{}</p>\n",
        meta.join(" &#183; ")
    ));

    if let Some(source) = non_blank(Some(article.source_url.as_str())) {
        let source = escape_xml(source);
        doc.push_str(&format!(
            "    <p class=\"source\"><a href=\"{source}\">{source}</a></p>\n"
        ));
    }

    doc.push_str("  </header>\n  <article class=\"article-body\">\n");
    doc.push_str(body);
    doc.push_str("\n  </article>\n</body>\n</html>\n");
    doc
}

/// Generate content.opf.
pub fn package_document(article: &ArticleInput, images: &[ImageResource], language: &str) -> String {
    let mut opf = String::new();

    opf.push_str(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="BookId">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
"#,
    );

    opf.push_str(&format!(
        "    <dc:identifier id=\"BookId\">{}</dc:identifier>\n",
        escape_xml(article.id.trim())
    ));
    opf.push_str(&format!(
        "    <dc:title>{}</dc:title>\n",
        escape_xml(display_title(article))
    ));
    opf.push_str(&format!(
        "    <dc:creator>{}</dc:creator>\n",
        escape_xml(non_blank(article.byline.as_deref()).unwrap_or(""))
    ));
    opf.push_str(&format!(
        "    <dc:language>{}</dc:language>\n",
        escape_xml(language)
    ));

    if let Some(site) = non_blank(article.site_name.as_deref()) {
        opf.push_str(&format!(
            "    <dc:publisher>{}</dc:publisher>\n",
            escape_xml(site)
        ));
    }
    if let Some(excerpt) = non_blank(article.excerpt.as_deref()) {
        opf.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            escape_xml(excerpt)
        ));
    }
    if let Some(source) = non_blank(Some(article.source_url.as_str())) {
        opf.push_str(&format!(
            "    <dc:source>{}</dc:source>\n",
            escape_xml(source)
        ));
    }

    // dcterms:modified (required for EPUB3)
    let modified = format_timestamp(&article.extracted_at);
    opf.push_str(&format!("    <dc:date>{modified}</dc:date>\n"));
    opf.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{modified}</meta>\n"
    ));

    opf.push_str("  </metadata>\n  <manifest>\n");
    opf.push_str(&format!(
        "    <item id=\"nav\" href=\"{NAV_DOCUMENT}\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n"
    ));
    opf.push_str(&format!(
        "    <item id=\"content\" href=\"{CONTENT_DOCUMENT}\" media-type=\"application/xhtml+xml\"/>\n"
    ));
    opf.push_str(&format!(
        "    <item id=\"css\" href=\"{STYLESHEET}\" media-type=\"text/css\"/>\n"
    ));

    for image in images {
        opf.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
            href_to_id(&image.filename),
            escape_xml(&image.href()),
            escape_xml(&image.media_type)
        ));
    }

    opf.push_str("  </manifest>\n  <spine>\n");
    opf.push_str("    <itemref idref=\"content\"/>\n");
    opf.push_str("  </spine>\n</package>\n");
    opf
}

/// Generate nav.xhtml with a single entry for the article.
pub fn navigation_document(title: &str, language: &str) -> String {
    let title = escape_xml(title);
    let lang = escape_xml(language);

    // The epub: prefix must be declared for epub:type="toc"
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{lang}" lang="{lang}">
<head>
  <meta charset="UTF-8" />
  <title>{title}</title>
</head>
<body>
  <nav epub:type="toc" id="toc">
    <h1>Contents</h1>
    <ol>
      <li><a href="{CONTENT_DOCUMENT}">{title}</a></li>
    </ol>
  </nav>
</body>
</html>
"#
    )
}

/// Escape XML special characters.
pub fn escape_xml(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&apos;"),
            _ => result.push(c),
        }
    }
    result
}

fn href_to_id(href: &str) -> String {
    href.replace(['/', '.', ' ', '-'], "_")
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// `2024-03-01T10:00:00Z`
fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// `March 1, 2024`
fn format_date(at: &DateTime<Utc>) -> String {
    at.format("%B %-d, %Y").to_string()
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
