use std::io::{Cursor, Read};
use std::time::Duration;

use httpmock::MockServer;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use quick_xml::Reader;
use quick_xml::events::Event;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use zip::{CompressionMethod, ZipArchive};

use folio::epub::inspect_epub_from_reader;
use folio::images::ImageKind;
use folio::{ArticleInput, EpubExporter, Error, ExportConfig, SkipReason};

// ============================================================================
// Helpers
// ============================================================================

fn encode(format: ImageFormat, pixel: Rgba<u8>) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(6, 4, pixel));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), format).unwrap();
    out
}

fn png() -> Vec<u8> {
    encode(ImageFormat::Png, Rgba([0, 0, 255, 255]))
}

fn webp() -> Vec<u8> {
    encode(ImageFormat::WebP, Rgba([200, 10, 10, 255]))
}

fn article(body: &str, source_url: &str) -> ArticleInput {
    ArticleInput::new("article-1", "Test & Trial", body, source_url)
}

fn read_entry(bytes: &[u8], name: &str) -> Option<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut file = archive.by_name(name).ok()?;
    let mut data = Vec::new();
    file.read_to_end(&mut data).unwrap();
    Some(data)
}

fn read_text(bytes: &[u8], name: &str) -> String {
    let data = read_entry(bytes, name).unwrap_or_else(|| panic!("missing entry {name}"));
    String::from_utf8(data).unwrap()
}

fn assert_well_formed(xml: &str) {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => panic!("not well-formed at {}: {e}", reader.buffer_position()),
        }
    }
}

/// Serve one `image/png` response as `chunks` chunks of `chunk_len` bytes,
/// with chunked transfer encoding and no `Content-Length`.
async fn serve_chunked(chunks: usize, chunk_len: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }

        let head = "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nTransfer-Encoding: chunked\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        let chunk = vec![0u8; chunk_len];
        for _ in 0..chunks {
            let size = format!("{chunk_len:x}\r\n");
            // The client hangs up once it has seen enough
            if socket.write_all(size.as_bytes()).await.is_err()
                || socket.write_all(&chunk).await.is_err()
                || socket.write_all(b"\r\n").await.is_err()
            {
                return;
            }
        }
        let _ = socket.write_all(b"0\r\n\r\n").await;
    });

    format!("http://{addr}/stream.png")
}

fn entry_names(bytes: &[u8]) -> Vec<String> {
    let archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    archive.file_names().map(str::to_string).collect::<Vec<_>>()
}

// ============================================================================
// End to end
// ============================================================================

#[tokio::test]
async fn test_webp_article_end_to_end() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET").path("/a.webp");
        then.status(200).header("content-type", "image/webp").body(webp());
    });

    let body = format!(
        r#"<p>Hello&nbsp;World</p><img src="{}" alt="pic">"#,
        server.url("/a.webp")
    );
    let bytes = EpubExporter::new()
        .unwrap()
        .export(&article(&body, "https://example.com/post"))
        .await
        .unwrap();
    mock.assert();

    let image = read_entry(&bytes, "OEBPS/images/image1.jpg").expect("converted image");
    assert_eq!(&image[..3], [0xFF, 0xD8, 0xFF]);

    let content = read_text(&bytes, "OEBPS/index.xhtml");
    assert!(content.contains("Hello&#160;World"));
    assert!(content.contains(r#"<img src="images/image1.jpg" alt="pic" />"#));
    assert!(content.contains("<title>Test &amp; Trial</title>"));
    assert!(!content.contains("&nbsp;"));

    let opf = read_text(&bytes, "OEBPS/content.opf");
    assert!(opf.contains(r#"href="images/image1.jpg" media-type="image/jpeg""#));
    assert!(opf.contains("<dc:title>Test &amp; Trial</dc:title>"));
}

#[tokio::test]
async fn test_archive_layout() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/a.png");
        then.status(200).header("content-type", "image/png").body(png());
    });

    let body = format!(r#"<img src="{}">"#, server.url("/a.png"));
    let bytes = folio::export(&article(&body, "https://example.com/"))
        .await
        .unwrap();

    assert_eq!(&bytes[30..38], b"mimetype");
    assert_eq!(
        entry_names(&bytes),
        [
            "mimetype",
            "META-INF/container.xml",
            "OEBPS/content.opf",
            "OEBPS/style.css",
            "OEBPS/nav.xhtml",
            "OEBPS/index.xhtml",
            "OEBPS/images/image1.png",
        ]
    );

    let mut archive = ZipArchive::new(Cursor::new(&bytes)).unwrap();
    assert_eq!(archive.by_index(0).unwrap().compression(), CompressionMethod::Stored);
    assert_eq!(archive.by_index(2).unwrap().compression(), CompressionMethod::Deflated);
}

#[tokio::test]
async fn test_relative_reference_uses_source_url() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET").path("/media/pic.png");
        then.status(200).header("content-type", "image/png").body(png());
    });

    let body = r#"<picture><source srcset="pic.webp" type="image/webp"><img src="../media/pic.png" srcset="pic@2x.png 2x" loading="lazy"></picture>"#;
    let prepared = EpubExporter::new()
        .unwrap()
        .package(&article(body, &server.url("/posts/one")))
        .await
        .unwrap();
    mock.assert();

    assert_eq!(prepared.images.len(), 1);
    let content = prepared.package.entry("OEBPS/index.xhtml").unwrap();
    let content = String::from_utf8(content.data.clone()).unwrap();
    assert!(content.contains(r#"<img src="images/image1.png" />"#));
    assert!(!content.contains("<picture"));
    assert!(!content.contains("srcset"));
}

// ============================================================================
// Filenames
// ============================================================================

#[tokio::test]
async fn test_filenames_unique_and_in_document_order() {
    let server = MockServer::start();
    let png_mock = server.mock(|when, then| {
        when.method("GET").path("/a.png");
        then.status(200).header("content-type", "image/png").body(png());
    });
    server.mock(|when, then| {
        when.method("GET").path("/b.webp");
        then.status(200).header("content-type", "image/webp").body(webp());
    });
    server.mock(|when, then| {
        when.method("GET").path("/missing.png");
        then.status(404);
    });

    let body = format!(
        r#"<img src="{a}"><img src="{missing}"><img src="{b}"><img src="{a}">"#,
        a = server.url("/a.png"),
        b = server.url("/b.webp"),
        missing = server.url("/missing.png"),
    );
    let exporter = EpubExporter::with_config(ExportConfig::default().with_fetch_concurrency(3)).unwrap();
    let prepared = exporter
        .package(&article(&body, "https://example.com/"))
        .await
        .unwrap();

    // Duplicates are fetched and packaged again
    png_mock.assert_calls(2);

    let names: Vec<_> = prepared.images.iter().map(|i| i.filename.as_str()).collect();
    assert_eq!(names, ["image1.png", "image2.jpg", "image3.png"]);
    assert_eq!(prepared.skipped.len(), 1);
    assert_eq!(prepared.skipped[0].reason, SkipReason::Status(404));
    assert_eq!(prepared.skipped[0].src, server.url("/missing.png"));
}

#[tokio::test]
async fn test_filenames_follow_document_order_not_completion_order() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/slow.png");
        then.status(200)
            .header("content-type", "image/png")
            .body(png())
            .delay(Duration::from_millis(600));
    });
    let fast = server.mock(|when, then| {
        when.method("GET").path("/fast.gif");
        then.status(200)
            .header("content-type", "image/gif")
            .body(encode(ImageFormat::Gif, Rgba([0, 255, 0, 255])));
    });

    let slow_src = server.url("/slow.png");
    let fast_src = server.url("/fast.gif");
    let body = format!(r#"<img src="{slow_src}"><img src="{fast_src}">"#);
    let exporter = EpubExporter::with_config(ExportConfig::default().with_fetch_concurrency(4)).unwrap();
    let prepared = exporter
        .package(&article(&body, "https://example.com/"))
        .await
        .unwrap();
    fast.assert();

    let names: Vec<_> = prepared.images.iter().map(|i| i.filename.as_str()).collect();
    assert_eq!(names, ["image1.png", "image2.gif"]);

    let content = prepared.package.entry("OEBPS/index.xhtml").unwrap();
    let content = String::from_utf8(content.data.clone()).unwrap();
    let first = content.find("images/image1.png").unwrap();
    let second = content.find("images/image2.gif").unwrap();
    assert!(first < second);
}

#[tokio::test]
async fn test_gt_in_attribute_value_keeps_document_well_formed() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET").path("/a.png");
        then.status(200).header("content-type", "image/png").body(png());
    });

    let body = format!(
        r#"<p>x</p><img alt="5 > 3" src="{}"><p>y</p>"#,
        server.url("/a.png")
    );
    let bytes = folio::export(&article(&body, "https://example.com/")).await.unwrap();
    mock.assert();

    let content = read_text(&bytes, "OEBPS/index.xhtml");
    assert!(content.contains(r#"<img alt="5 > 3" src="images/image1.png" />"#));
    assert_well_formed(&content);
    assert!(read_entry(&bytes, "OEBPS/images/image1.png").is_some());
}

// ============================================================================
// Skipped images
// ============================================================================

async fn export_single(src: String, config: ExportConfig) -> (Vec<u8>, Vec<SkipReason>) {
    let body = format!(r#"<p>Before</p><img src="{src}"><p>After</p>"#);
    let exporter = EpubExporter::with_config(config).unwrap();
    let prepared = exporter
        .package(&article(&body, "https://example.com/"))
        .await
        .unwrap();

    assert!(prepared.images.is_empty());
    let content = prepared.package.entry("OEBPS/index.xhtml").unwrap();
    let content = String::from_utf8(content.data.clone()).unwrap();
    assert!(
        content.contains(&format!(r#"<img src="{src}" />"#)),
        "skipped image should keep its remote src"
    );

    let bytes = prepared.package.to_bytes(6).unwrap();
    assert!(!entry_names(&bytes).iter().any(|n| n.starts_with("OEBPS/images/")));
    (bytes, prepared.skipped.into_iter().map(|s| s.reason).collect())
}

#[tokio::test]
async fn test_oversize_image_skipped() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/huge.png");
        then.status(200)
            .header("content-type", "image/png")
            .body(vec![0u8; 9_000_000]);
    });

    let (_, reasons) = export_single(server.url("/huge.png"), ExportConfig::default()).await;
    assert_eq!(reasons, [SkipReason::TooLarge { limit: 8_000_000 }]);
}

#[tokio::test]
async fn test_oversize_streamed_image_skipped() {
    let src = serve_chunked(9, 1_000_000).await;
    let (_, reasons) = export_single(src, ExportConfig::default()).await;
    assert_eq!(reasons, [SkipReason::TooLarge { limit: 8_000_000 }]);
}

#[tokio::test]
async fn test_streamed_image_under_cap_embedded() {
    let src = serve_chunked(3, 1_000).await;
    let config = ExportConfig::default().with_max_image_bytes(4_000);
    let body = format!(r#"<img src="{src}">"#);
    let prepared = EpubExporter::with_config(config)
        .unwrap()
        .package(&article(&body, "https://example.com/"))
        .await
        .unwrap();

    // Zero bytes sniff as nothing; the declared type wins
    assert_eq!(prepared.images.len(), 1);
    assert_eq!(prepared.images[0].data.len(), 3_000);
    assert!(prepared.skipped.is_empty());
}

#[tokio::test]
async fn test_slow_image_times_out() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/slow.png");
        then.status(200)
            .header("content-type", "image/png")
            .body(png())
            .delay(Duration::from_secs(3));
    });

    let config = ExportConfig::default().with_fetch_timeout(Duration::from_millis(200));
    let (bytes, reasons) = export_single(server.url("/slow.png"), config).await;
    assert_eq!(reasons, [SkipReason::Timeout]);
    assert!(read_text(&bytes, "OEBPS/index.xhtml").contains("<p>After</p>"));
}

#[tokio::test]
async fn test_non_image_response_skipped() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/login");
        then.status(200)
            .header("content-type", "text/html; charset=utf-8")
            .body("<html>Please sign in</html>");
    });

    let (_, reasons) = export_single(server.url("/login"), ExportConfig::default()).await;
    assert!(matches!(&reasons[..], [SkipReason::NotAnImage(t)] if t.starts_with("text/html")));
}

#[tokio::test]
async fn test_error_status_skipped() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/gone.png");
        then.status(410);
    });

    let (_, reasons) = export_single(server.url("/gone.png"), ExportConfig::default()).await;
    assert_eq!(reasons, [SkipReason::Status(410)]);
}

// ============================================================================
// Conversion
// ============================================================================

#[tokio::test]
async fn test_svg_rasterized_to_png() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/chart.svg");
        then.status(200).header("content-type", "image/svg+xml").body(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="20" height="10"><rect width="20" height="10" fill="green"/></svg>"#,
        );
    });

    let body = format!(r#"<img src="{}">"#, server.url("/chart.svg"));
    let bytes = folio::export(&article(&body, "https://example.com/")).await.unwrap();

    let png = read_entry(&bytes, "OEBPS/images/image1.png").expect("rasterized image");
    let decoded = image::load_from_memory(&png).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (1024, 768));
}

#[tokio::test]
async fn test_manifest_type_matches_bytes_when_conversion_fails() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/broken.svg");
        then.status(200)
            .header("content-type", "image/svg+xml")
            .body("<svg this is not xml");
    });
    server.mock(|when, then| {
        when.method("GET").path("/photo");
        // Declared as WebP, actually a PNG
        then.status(200).header("content-type", "image/webp").body(png());
    });

    let body = format!(
        r#"<img src="{}"><img src="{}">"#,
        server.url("/broken.svg"),
        server.url("/photo")
    );
    let bytes = folio::export(&article(&body, "https://example.com/")).await.unwrap();
    let inspection = inspect_epub_from_reader(Cursor::new(&bytes)).unwrap();

    let svg = inspection.package.manifest_item("images/image1.svg").expect("original svg kept");
    assert_eq!(svg.media_type, "image/svg+xml");

    let photo = inspection.package.manifest_item("images/image2.png").expect("sniffed png");
    assert_eq!(photo.media_type, "image/png");

    for item in inspection.package.manifest.iter().filter(|i| i.href.starts_with("images/")) {
        let data = read_entry(&bytes, &format!("OEBPS/{}", item.href)).unwrap();
        let kind = ImageKind::sniff(&data).unwrap();
        assert_eq!(kind.media_type(), item.media_type, "{}", item.href);
    }
}

// ============================================================================
// Validation and output
// ============================================================================

#[tokio::test]
async fn test_empty_body_rejected_before_fetching() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET");
        then.status(200).header("content-type", "image/png").body(png());
    });

    let exporter = EpubExporter::new().unwrap();
    let err = exporter
        .export(&article("   ", &server.url("/post")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyBody));
    mock.assert_calls(0);
}

#[tokio::test]
async fn test_missing_identifier_rejected() {
    let mut input = article("<p>Body</p>", "https://example.com/");
    input.id = " ".to_string();
    let err = folio::export(&input).await.unwrap_err();
    assert!(matches!(err, Error::MissingIdentifier));
}

#[tokio::test]
async fn test_export_to_dir_writes_unique_files() {
    let dir = tempfile::tempdir().unwrap();
    let exporter = EpubExporter::new().unwrap();
    let input = article("<p>Offline</p>", "https://example.com/");

    let first = exporter.export_to_dir(&input, dir.path()).await.unwrap();
    let second = exporter.export_to_dir(&input, dir.path()).await.unwrap();
    assert_ne!(first, second);

    for path in [&first, &second] {
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("test-trial-"), "{name}");
        assert!(name.ends_with(".epub"));
    }

    let inspection = folio::inspect_epub(&first).unwrap();
    assert_eq!(inspection.entries[0].name, "mimetype");
    assert_eq!(inspection.package.title, "Test & Trial");
    assert_eq!(inspection.package.identifier, "article-1");
    assert_eq!(inspection.package.spine, ["content"]);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[tokio::test]
async fn test_export_to_missing_dir_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");
    let err = EpubExporter::new()
        .unwrap()
        .export_to_dir(&article("<p>x</p>", "https://example.com/"), &missing)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Export(_)));
    assert!(!missing.exists());
}
