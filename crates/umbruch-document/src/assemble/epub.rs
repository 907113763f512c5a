// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// EPUB 3 container writer.
//
// Layout inside the archive:
//   mimetype                    (stored, first entry)
//   META-INF/container.xml
//   OEBPS/content.opf
//   OEBPS/nav.xhtml
//   OEBPS/toc.ncx
//   OEBPS/styles/book.css
//   OEBPS/text/chapter-NNN.xhtml
//   OEBPS/images/img-*.{jpg,png}

use std::fmt::Write as _;
use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;

use tracing::{info, instrument};
use umbruch_core::package::NavPoint;
use umbruch_core::{OutputPackage, Result, UmbruchError};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::markup::escape_xml;

const MIMETYPE: &str = "application/epub+zip";
const CONTENT_DIR: &str = "OEBPS";

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

/// Serialize a package to an EPUB file at `path`.
#[instrument(skip(package), fields(chapters = package.chapters.len(), images = package.images.len()))]
pub fn write_epub(package: &OutputPackage, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    write_epub_to(package, file)?;
    info!(path = %path.display(), "EPUB written");
    Ok(())
}

/// Serialize a package into any seekable writer.
pub fn write_epub_to<W: Write + Seek>(package: &OutputPackage, writer: W) -> Result<()> {
    let mut zip = ZipWriter::new(writer);
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    add_entry(&mut zip, "mimetype", MIMETYPE.as_bytes(), stored)?;
    add_entry(&mut zip, "META-INF/container.xml", CONTAINER_XML.as_bytes(), deflated)?;
    add_entry(&mut zip, &content_path("content.opf"), content_opf(package).as_bytes(), deflated)?;
    add_entry(&mut zip, &content_path("nav.xhtml"), nav_xhtml(package).as_bytes(), deflated)?;
    add_entry(&mut zip, &content_path("toc.ncx"), toc_ncx(package).as_bytes(), deflated)?;
    if let Some(stylesheet) = &package.stylesheet {
        add_entry(&mut zip, &content_path(&stylesheet.href), stylesheet.css.as_bytes(), deflated)?;
    }
    for chapter in &package.chapters {
        add_entry(&mut zip, &content_path(&chapter.href), chapter.markup.as_bytes(), deflated)?;
    }
    for image in &package.images {
        // Already compressed.
        add_entry(&mut zip, &content_path(&image.href), &image.bytes, stored)?;
    }

    zip.finish().map_err(zip_error)?;
    Ok(())
}

fn add_entry<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    name: &str,
    bytes: &[u8],
    options: SimpleFileOptions,
) -> Result<()> {
    zip.start_file(name, options).map_err(zip_error)?;
    zip.write_all(bytes)?;
    Ok(())
}

fn zip_error(err: zip::result::ZipError) -> UmbruchError {
    UmbruchError::Io(std::io::Error::other(format!("failed to write EPUB archive: {}", err)))
}

fn content_path(href: &str) -> String {
    format!("{CONTENT_DIR}/{href}")
}

// -- Package document ---------------------------------------------------------

fn content_opf(package: &OutputPackage) -> String {
    let metadata = &package.metadata;
    let mut opf = String::new();
    let _ = writeln!(opf, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    let _ = writeln!(
        opf,
        r#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="book-id" xml:lang="{}">"#,
        escape_xml(&metadata.language)
    );
    opf.push_str("  <metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n");
    let _ = writeln!(opf, r#"    <dc:identifier id="book-id">{}</dc:identifier>"#, escape_xml(&metadata.identifier));
    let _ = writeln!(opf, "    <dc:title>{}</dc:title>", escape_xml(&metadata.title));
    let _ = writeln!(opf, "    <dc:language>{}</dc:language>", escape_xml(&metadata.language));
    if let Some(author) = &metadata.author {
        let _ = writeln!(opf, "    <dc:creator>{}</dc:creator>", escape_xml(author));
    }
    if let Some(description) = &metadata.description {
        let _ = writeln!(opf, "    <dc:description>{}</dc:description>", escape_xml(description));
    }
    let _ = writeln!(
        opf,
        r#"    <meta property="dcterms:modified">{}</meta>"#,
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
    );
    opf.push_str("  </metadata>\n  <manifest>\n");
    opf.push_str(
        "    <item id=\"nav\" href=\"nav.xhtml\" media-type=\"application/xhtml+xml\" properties=\"nav\"/>\n",
    );
    opf.push_str("    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n");
    if let Some(stylesheet) = &package.stylesheet {
        let _ = writeln!(
            opf,
            r#"    <item id="css" href="{}" media-type="text/css"/>"#,
            escape_xml(&stylesheet.href)
        );
    }
    for chapter in &package.chapters {
        let _ = writeln!(
            opf,
            r#"    <item id="{}" href="{}" media-type="application/xhtml+xml"/>"#,
            escape_xml(&chapter.id),
            escape_xml(&chapter.href)
        );
    }
    for image in &package.images {
        let _ = writeln!(
            opf,
            r#"    <item id="{}" href="{}" media-type="{}"/>"#,
            escape_xml(&image.id),
            escape_xml(&image.href),
            image.encoding.mime_type()
        );
    }
    opf.push_str("  </manifest>\n  <spine toc=\"ncx\">\n");
    for chapter in &package.chapters {
        let _ = writeln!(opf, r#"    <itemref idref="{}"/>"#, escape_xml(&chapter.id));
    }
    opf.push_str("  </spine>\n</package>\n");
    opf
}

// -- Navigation ---------------------------------------------------------------

fn nav_xhtml(package: &OutputPackage) -> String {
    fn list(points: &[NavPoint], depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth + 2);
        let _ = writeln!(out, "{indent}<ol>");
        for point in points {
            let _ = write!(
                out,
                r#"{indent}  <li><a href="{}">{}</a>"#,
                escape_xml(&point.target),
                escape_xml(&point.title)
            );
            if point.children.is_empty() {
                out.push_str("</li>\n");
            } else {
                out.push('\n');
                list(&point.children, depth + 2, out);
                let _ = writeln!(out, "{indent}  </li>");
            }
        }
        let _ = writeln!(out, "{indent}</ol>");
    }

    let mut nav = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{lang}" lang="{lang}">
<head>
  <title>{title}</title>
</head>
<body>
  <nav epub:type="toc" id="toc">
    <h1>{title}</h1>
"#,
        lang = escape_xml(&package.metadata.language),
        title = escape_xml(&package.metadata.title),
    );
    list(&package.navigation, 0, &mut nav);
    nav.push_str("  </nav>\n</body>\n</html>\n");
    nav
}

fn toc_ncx(package: &OutputPackage) -> String {
    fn nav_points(points: &[NavPoint], depth: usize, order: &mut usize, out: &mut String) {
        let indent = "  ".repeat(depth + 2);
        for point in points {
            *order += 1;
            let _ = writeln!(out, r#"{indent}<navPoint id="nav-{order}" playOrder="{order}">"#);
            let _ = writeln!(
                out,
                "{indent}  <navLabel><text>{}</text></navLabel>",
                escape_xml(&point.title)
            );
            let _ = writeln!(out, r#"{indent}  <content src="{}"/>"#, escape_xml(&point.target));
            nav_points(&point.children, depth + 1, order, out);
            let _ = writeln!(out, "{indent}</navPoint>");
        }
    }

    fn depth_of(points: &[NavPoint]) -> usize {
        points
            .iter()
            .map(|point| 1 + depth_of(&point.children))
            .max()
            .unwrap_or(0)
    }

    let mut ncx = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{uid}"/>
    <meta name="dtb:depth" content="{depth}"/>
    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
  <docTitle><text>{title}</text></docTitle>
  <navMap>
"#,
        uid = escape_xml(&package.metadata.identifier),
        depth = depth_of(&package.navigation).max(1),
        title = escape_xml(&package.metadata.title),
    );
    let mut order = 0;
    nav_points(&package.navigation, 0, &mut order, &mut ncx);
    ncx.push_str("  </navMap>\n</ncx>\n");
    ncx
}
