//! Text extraction for binary document formats (PDF, DOCX, PPTX, XLSX, EPUB).
//!
//! Each extractor returns text segments: PDF pages, one DOCX body, PPTX
//! slides, XLSX sheets, EPUB spine documents. Empty segments are dropped. Extractors never panic
//! on malformed input; they return [`ExtractError`] and the file is skipped.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

/// Maximum sheets read from one workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells read from one sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Maximum decompressed bytes read from one ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum spine documents read from one book.
const EPUB_MAX_SPINE_ITEMS: usize = 1_000;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("EPUB extraction failed: {0}")]
    Epub(String),
}

fn ooxml(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Ooxml(e.to_string())
}

fn epub(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Epub(e.to_string())
}

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

/// One segment per page (pdf-extract separates pages with form feeds).
pub fn pdf_segments(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(non_empty(text.split('\u{c}').map(str::to_string)))
}

/// The document body as one segment, one line per paragraph.
pub fn docx_segments(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut archive = Archive::new(Cursor::new(bytes)).map_err(ooxml)?;
    let xml = read_entry_bounded(&mut archive, "word/document.xml", ExtractError::Ooxml)?;
    let paragraphs = paragraph_texts(&xml)?;
    Ok(non_empty(std::iter::once(paragraphs.join("\n"))))
}

/// One segment per slide, in slide-number order.
pub fn pptx_segments(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut archive = Archive::new(Cursor::new(bytes)).map_err(ooxml)?;
    let slides = numbered_entries(&archive, "ppt/slides/slide");
    let mut segments = Vec::with_capacity(slides.len());
    for name in slides {
        let xml = read_entry_bounded(&mut archive, &name, ExtractError::Ooxml)?;
        segments.push(paragraph_texts(&xml)?.join("\n"));
    }
    Ok(non_empty(segments))
}

/// One segment per sheet: cells joined by spaces, one line per row.
pub fn xlsx_segments(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut archive = Archive::new(Cursor::new(bytes)).map_err(ooxml)?;
    let shared = if archive.index_for_name("xl/sharedStrings.xml").is_some() {
        let xml = read_entry_bounded(&mut archive, "xl/sharedStrings.xml", ExtractError::Ooxml)?;
        shared_strings(&xml)?
    } else {
        Vec::new()
    };
    let sheets = numbered_entries(&archive, "xl/worksheets/sheet");
    let mut segments = Vec::new();
    for name in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let xml = read_entry_bounded(&mut archive, &name, ExtractError::Ooxml)?;
        segments.push(sheet_rows(&xml, &shared)?);
    }
    Ok(non_empty(segments))
}

/// One segment per spine document, in reading order.
///
/// The package document is found through `META-INF/container.xml`; spine
/// `idref`s resolve through its manifest to XHTML entries.
pub fn epub_segments(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut archive = Archive::new(Cursor::new(bytes)).map_err(epub)?;
    let container = read_entry_bounded(&mut archive, "META-INF/container.xml", ExtractError::Epub)?;
    let opf_path = rootfile_path(&container)?;
    let opf = read_entry_bounded(&mut archive, &opf_path, ExtractError::Epub)?;
    let base = opf_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");

    let mut segments = Vec::new();
    for href in spine_hrefs(&opf)?.into_iter().take(EPUB_MAX_SPINE_ITEMS) {
        let name = resolve_href(base, &href);
        let xhtml = read_entry_bounded(&mut archive, &name, ExtractError::Epub)?;
        segments.push(xhtml_text(&xhtml)?);
    }
    Ok(non_empty(segments))
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn rootfile_path(container: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(container);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"rootfile" => {
                if let Some(path) = attribute(&e, b"full-path") {
                    return Ok(path);
                }
            }
            Ok(Event::Eof) => return Err(epub("container.xml names no rootfile")),
            Err(e) => return Err(epub(e)),
            _ => {}
        }
        buf.clear();
    }
}

/// Manifest hrefs of the spine items, in spine order.
fn spine_hrefs(opf: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(opf);
    let mut buf = Vec::new();
    let mut manifest: HashMap<String, String> = HashMap::new();
    let mut spine: Vec<String> = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"item" => {
                    if let (Some(id), Some(href)) = (attribute(&e, b"id"), attribute(&e, b"href")) {
                        manifest.insert(id, href);
                    }
                }
                b"itemref" => spine.extend(attribute(&e, b"idref")),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(epub(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(spine
        .into_iter()
        .filter_map(|id| manifest.get(&id).cloned())
        .collect())
}

/// Archive path of `href` relative to the package directory `base`.
fn resolve_href(base: &str, href: &str) -> String {
    let href = href.split('#').next().unwrap_or(href);
    let mut parts: Vec<&str> = base.split('/').filter(|p| !p.is_empty()).collect();
    for part in href.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

fn is_hidden(name: &[u8]) -> bool {
    matches!(name, b"head" | b"script" | b"style")
}

fn is_block(name: &[u8]) -> bool {
    matches!(
        name,
        b"p" | b"div"
            | b"h1"
            | b"h2"
            | b"h3"
            | b"h4"
            | b"h5"
            | b"h6"
            | b"li"
            | b"tr"
            | b"blockquote"
            | b"pre"
            | b"section"
    )
}

fn flush_line(current: &mut String, lines: &mut Vec<String>) {
    let line = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !line.is_empty() {
        lines.push(line);
    }
    current.clear();
}

/// Visible body text of an XHTML document, one line per block element.
fn xhtml_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut hidden = 0usize;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if is_hidden(e.local_name().as_ref()) => hidden += 1,
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"br" => {
                flush_line(&mut current, &mut lines)
            }
            Ok(Event::Text(te)) if hidden == 0 => match te.unescape() {
                Ok(text) => current.push_str(&text),
                // HTML entities such as &nbsp; are not XML; keep the raw text.
                Err(_) => current.push_str(&String::from_utf8_lossy(&te)),
            },
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if is_hidden(name.as_ref()) {
                    hidden = hidden.saturating_sub(1);
                } else if is_block(name.as_ref()) {
                    flush_line(&mut current, &mut lines);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(epub(e)),
            _ => {}
        }
        buf.clear();
    }
    flush_line(&mut current, &mut lines);
    Ok(lines.join("\n"))
}

fn non_empty(segments: impl IntoIterator<Item = String>) -> Vec<String> {
    segments
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Read entry `name`, reporting failures through `wrap`.
fn read_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    wrap: fn(String) -> ExtractError,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| wrap(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| wrap(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(wrap(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Entries named `<prefix><n>.xml`, sorted by `n`.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|n| {
            let number = n.strip_prefix(prefix)?.strip_suffix(".xml")?.parse().ok()?;
            Some((number, n.to_string()))
        })
        .collect();
    names.sort();
    names.into_iter().map(|(_, n)| n).collect()
}

/// Text of every `<*:p>` paragraph, concatenating its `<*:t>` runs.
/// Works for both WordprocessingML and DrawingML.
fn paragraph_texts(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(te)) if in_t => {
                current.push_str(&te.unescape().map_err(ooxml)?);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => {
                    let text = current.trim();
                    if !text.is_empty() {
                        paragraphs.push(text.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(te)) if in_t => current.push_str(&te.unescape().map_err(ooxml)?),
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn sheet_rows(xml: &[u8], shared: &[String]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut in_v = false;
    let mut is_shared = false;
    let mut cells = 0usize;
    loop {
        if cells >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    is_shared = e.attributes().flatten().any(|a| {
                        a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" => in_v = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_v => {
                let raw = te.unescape().map_err(ooxml)?;
                let value = raw.trim();
                let text = if is_shared {
                    value.parse::<usize>().ok().and_then(|i| shared.get(i)).cloned()
                } else {
                    Some(value.to_string())
                };
                if let Some(text) = text.filter(|t| !t.is_empty()) {
                    row.push(text);
                    cells += 1;
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" => in_v = false,
                b"c" => is_shared = false,
                b"row" if !row.is_empty() => rows.push(std::mem::take(&mut row).join(" ")),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    if !row.is_empty() {
        rows.push(row.join(" "));
    }
    Ok(rows.join("\n"))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Write;

    /// A ZIP archive holding the given `(name, contents)` entries.
    pub fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, contents) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(contents.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    pub fn docx(paragraphs: &[&str]) -> Vec<u8> {
        let body: String = paragraphs
            .iter()
            .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
            .collect();
        let xml = format!(
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
            body
        );
        zip_with(&[("word/document.xml", &xml)])
    }

    /// An EPUB whose package lives in `OEBPS/`, with `chapters` as
    /// `(manifest id, body)` pairs and the spine listing `spine` ids.
    pub fn epub(chapters: &[(&str, &str)], spine: &[&str]) -> Vec<u8> {
        let container = "<?xml version=\"1.0\"?><container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\"><rootfiles><rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/></rootfiles></container>";
        let items: String = chapters
            .iter()
            .map(|(id, _)| {
                format!(
                    "<item id=\"{0}\" href=\"text/{0}.xhtml\" media-type=\"application/xhtml+xml\"/>",
                    id
                )
            })
            .collect();
        let itemrefs: String = spine
            .iter()
            .map(|id| format!("<itemref idref=\"{}\"/>", id))
            .collect();
        let opf = format!(
            "<?xml version=\"1.0\"?><package xmlns=\"http://www.idpf.org/2007/opf\" version=\"3.0\"><manifest>{}<item id=\"css\" href=\"style.css\" media-type=\"text/css\"/></manifest><spine>{}</spine></package>",
            items, itemrefs
        );
        let pages: Vec<(String, String)> = chapters
            .iter()
            .map(|(id, body)| {
                (
                    format!("OEBPS/text/{}.xhtml", id),
                    format!(
                        "<?xml version=\"1.0\" encoding=\"utf-8\"?><html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>{0}</title><style>p {{ margin: 0 }}</style></head><body>{1}</body></html>",
                        id, body
                    ),
                )
            })
            .collect();
        let mut entries: Vec<(&str, &str)> = vec![
            ("mimetype", "application/epub+zip"),
            ("META-INF/container.xml", container),
            ("OEBPS/content.opf", opf.as_str()),
        ];
        entries.extend(pages.iter().map(|(n, c)| (n.as_str(), c.as_str())));
        zip_with(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{docx, epub, zip_with};
    use super::*;

    fn slide(text: &str) -> String {
        format!(
            "<p:sld xmlns:p=\"p\" xmlns:a=\"a\"><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{}</a:t></a:r></a:p></p:txBody></p:sp></p:spTree></p:cSld></p:sld>",
            text
        )
    }

    #[test]
    fn test_docx_paragraphs_one_per_line() {
        let bytes = docx(&["Admissions open in June", "Fees &amp; scholarships"]);
        let segments = docx_segments(&bytes).unwrap();
        assert_eq!(segments, vec!["Admissions open in June\nFees & scholarships"]);
    }

    #[test]
    fn test_docx_keeps_spaces_between_runs() {
        let xml = "<w:document xmlns:w=\"w\"><w:body><w:p><w:r><w:t xml:space=\"preserve\">Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p></w:body></w:document>";
        let bytes = zip_with(&[("word/document.xml", xml)]);
        assert_eq!(docx_segments(&bytes).unwrap(), vec!["Hello world"]);
    }

    #[test]
    fn test_pptx_slides_in_numeric_order() {
        let s2 = slide("second");
        let s10 = slide("tenth");
        let s1 = slide("first");
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", &s10),
            ("ppt/slides/slide2.xml", &s2),
            ("ppt/slides/slide1.xml", &s1),
        ]);
        assert_eq!(pptx_segments(&bytes).unwrap(), vec!["first", "second", "tenth"]);
    }

    #[test]
    fn test_xlsx_rows_with_shared_and_inline_values() {
        let shared = "<sst><si><t>Course</t></si><si><t>Seats</t></si><si><t>Computer Engineering</t></si></sst>";
        let sheet = "<worksheet><sheetData>\
            <row r=\"1\"><c r=\"A1\" t=\"s\"><v>0</v></c><c r=\"B1\" t=\"s\"><v>1</v></c></row>\
            <row r=\"2\"><c r=\"A2\" t=\"s\"><v>2</v></c><c r=\"B2\"><v>120</v></c></row>\
            </sheetData></worksheet>";
        let bytes = zip_with(&[
            ("xl/sharedStrings.xml", shared),
            ("xl/worksheets/sheet1.xml", sheet),
        ]);
        assert_eq!(
            xlsx_segments(&bytes).unwrap(),
            vec!["Course Seats\nComputer Engineering 120"]
        );
    }

    #[test]
    fn test_epub_chapters_in_spine_order() {
        let bytes = epub(
            &[
                ("rules", "<p>Hostel rules</p>\n  <p>Lights out at <em>ten</em>.</p>"),
                ("preface", "<h1>Preface</h1><div>Welcome<br/>students</div>"),
            ],
            &["preface", "rules"],
        );
        assert_eq!(
            epub_segments(&bytes).unwrap(),
            vec!["Preface\nWelcome\nstudents", "Hostel rules\nLights out at ten."]
        );
    }

    #[test]
    fn test_epub_href_resolution() {
        assert_eq!(resolve_href("OEBPS", "text/ch1.xhtml#top"), "OEBPS/text/ch1.xhtml");
        assert_eq!(resolve_href("OEBPS/pkg", "../text/./ch1.xhtml"), "OEBPS/text/ch1.xhtml");
        assert_eq!(resolve_href("", "ch1.xhtml"), "ch1.xhtml");
    }

    #[test]
    fn test_invalid_inputs_return_errors() {
        assert!(matches!(pdf_segments(b"not a pdf"), Err(ExtractError::Pdf(_))));
        assert!(matches!(docx_segments(b"not a zip"), Err(ExtractError::Ooxml(_))));
        let missing = zip_with(&[("other.xml", "<x/>")]);
        assert!(matches!(docx_segments(&missing), Err(ExtractError::Ooxml(_))));
        assert!(matches!(epub_segments(&missing), Err(ExtractError::Epub(_))));
        let dangling = zip_with(&[(
            "META-INF/container.xml",
            "<container><rootfiles><rootfile full-path=\"content.opf\"/></rootfiles></container>",
        )]);
        assert!(matches!(epub_segments(&dangling), Err(ExtractError::Epub(_))));
    }
}
