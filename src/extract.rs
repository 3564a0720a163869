//! Multi-format document text extraction.
//!
//! Dispatches by MIME type (falling back to file extension) to a
//! format-specific extractor, then applies the bounded-stream cap and the
//! quality gate described in the indexing pipeline: extraction that yields
//! too little text, or text that is too repetitive (boilerplate headers and
//! footers repeated down a long document), is rejected rather than indexed.

use std::io::Read;

use crate::error::RagError;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_TXT: &str = "text/plain";
pub const MIME_MD: &str = "text/markdown";
pub const MIME_CSV: &str = "text/csv";
pub const MIME_JSON: &str = "application/json";
pub const MIME_XML: &str = "application/xml";

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Bounded-stream cap: extraction stops after whichever of these limits is
/// hit first.
pub const MAX_SOURCE_BYTES: u64 = 7_500_000;
pub const MAX_EXTRACTED_CHARS: usize = 250_000;

const MIN_EXTRACTED_CHARS: usize = 350;
const MIN_LINES_FOR_REPETITION_CHECK: usize = 10;
const MIN_UNIQUE_LINE_RATIO: f64 = 0.35;
const DENOISE_MIN_LINE_REPEATS: usize = 3;
const DENOISE_MAX_LINE_LEN: usize = 60;

/// Extract raw text from `bytes`, dispatching on `mime` (falling back to
/// `filename`'s extension when `mime` is unrecognized). Applies the bounded
/// character cap, but NOT the quality gate — call [`gate_quality`]
/// afterwards once the caller has also normalized the text.
pub fn extract_text(bytes: &[u8], mime: &str, filename: &str) -> Result<String, RagError> {
    if bytes.len() as u64 > MAX_SOURCE_BYTES {
        tracing::debug!(bytes = bytes.len(), cap = MAX_SOURCE_BYTES, "source exceeds byte cap, truncating");
    }
    let bounded = &bytes[..bytes.len().min(MAX_SOURCE_BYTES as usize)];

    let format = resolve_format(mime, filename);
    let mut text = match format {
        Format::Pdf => extract_pdf(bounded)?,
        Format::Docx => extract_docx(bounded)?,
        Format::Pptx => extract_pptx(bounded)?,
        Format::Xlsx => extract_xlsx(bounded)?,
        Format::PlainText | Format::Markdown => extract_plain(bounded),
        Format::Csv => extract_csv(bounded)?,
        Format::Json => extract_json(bounded)?,
        Format::Xml => extract_xml(bounded)?,
        Format::Unsupported => {
            return Err(RagError::UnsupportedFormat(if mime.is_empty() {
                filename.to_string()
            } else {
                mime.to_string()
            }))
        }
    };

    if text.chars().count() > MAX_EXTRACTED_CHARS {
        text = text.chars().take(MAX_EXTRACTED_CHARS).collect();
    }

    Ok(text)
}

/// Apply the quality gate to already-normalized text: denoise repeated
/// short lines (headers/footers), then reject if too short or too
/// repetitive.
pub fn gate_quality(normalized: &str) -> Result<String, RagError> {
    if normalized.is_empty() {
        return Err(RagError::ExtractionEmpty);
    }

    let denoised = denoise_repeated_lines(normalized);

    let chars = denoised.chars().count();
    if chars < MIN_EXTRACTED_CHARS {
        return Err(RagError::ExtractionTooShort {
            chars,
            min: MIN_EXTRACTED_CHARS,
        });
    }

    let lines: Vec<&str> = denoised.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() >= MIN_LINES_FOR_REPETITION_CHECK {
        let ratio = unique_line_ratio(&lines);
        if ratio < MIN_UNIQUE_LINE_RATIO {
            return Err(RagError::ExtractionTooRepetitive {
                ratio,
                min: MIN_UNIQUE_LINE_RATIO,
            });
        }
    }

    Ok(denoised)
}

fn unique_line_ratio(lines: &[&str]) -> f64 {
    use std::collections::HashSet;
    let normalized: Vec<String> = lines
        .iter()
        .map(|l| l.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" "))
        .collect();
    let unique: HashSet<&String> = normalized.iter().collect();
    unique.len() as f64 / normalized.len() as f64
}

/// Drop short lines that repeat three or more times across the document
/// (typical running headers/footers), unless doing so would remove most of
/// the content.
fn denoise_repeated_lines(text: &str) -> String {
    use std::collections::HashMap;

    let lines: Vec<&str> = text.lines().collect();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for line in &lines {
        let trimmed = line.trim();
        if !trimmed.is_empty() && trimmed.len() <= DENOISE_MAX_LINE_LEN {
            *counts.entry(trimmed.to_lowercase()).or_insert(0) += 1;
        }
    }

    let filtered: Vec<&str> = lines
        .iter()
        .filter(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.len() > DENOISE_MAX_LINE_LEN {
                return true;
            }
            counts.get(&trimmed.to_lowercase()).copied().unwrap_or(0) < DENOISE_MIN_LINE_REPEATS
        })
        .copied()
        .collect();

    let candidate = filtered.join("\n");
    let floor = (text.len() / 4).max(120);
    if candidate.len() >= floor {
        candidate
    } else {
        text.to_string()
    }
}

enum Format {
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    PlainText,
    Markdown,
    Csv,
    Json,
    Xml,
    Unsupported,
}

fn resolve_format(mime: &str, filename: &str) -> Format {
    match mime {
        MIME_PDF => return Format::Pdf,
        MIME_DOCX => return Format::Docx,
        MIME_PPTX => return Format::Pptx,
        MIME_XLSX => return Format::Xlsx,
        MIME_TXT => return Format::PlainText,
        MIME_MD => return Format::Markdown,
        MIME_CSV => return Format::Csv,
        MIME_JSON => return Format::Json,
        MIME_XML => return Format::Xml,
        _ => {}
    }

    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
    match ext.as_str() {
        "pdf" => Format::Pdf,
        "docx" => Format::Docx,
        "pptx" => Format::Pptx,
        "xlsx" => Format::Xlsx,
        "txt" => Format::PlainText,
        "md" | "markdown" => Format::Markdown,
        "csv" => Format::Csv,
        "json" => Format::Json,
        "xml" => Format::Xml,
        _ => Format::Unsupported,
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, RagError> {
    pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| RagError::UnsupportedFormat(format!("pdf: {}", e)))
}

fn extract_plain(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn extract_csv(bytes: &[u8]) -> Result<String, RagError> {
    let text = String::from_utf8_lossy(bytes);
    let mut rows = Vec::new();
    for line in text.lines() {
        let cells: Vec<&str> = line.split(',').map(|c| c.trim()).collect();
        rows.push(cells.join("\t"));
    }
    Ok(rows.join("\n"))
}

fn extract_json(bytes: &[u8]) -> Result<String, RagError> {
    let text = String::from_utf8_lossy(bytes);
    let value: serde_json::Value = serde_json::from_str(&text)
        .map_err(|_| RagError::UnsupportedFormat("malformed json".to_string()))?;
    serde_json::to_string_pretty(&value).map_err(RagError::Json)
}

fn extract_xml(bytes: &[u8]) -> Result<String, RagError> {
    extract_text_elements(bytes, |_| true)
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, RagError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| RagError::UnsupportedFormat(format!("zip entry {}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(RagError::IOError)?;
    if out.len() as u64 >= max_bytes {
        return Err(RagError::UnsupportedFormat(format!(
            "zip entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, RagError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| RagError::UnsupportedFormat(format!("docx zip: {}", e)))?;
    let doc_xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    extract_text_elements(&doc_xml, |name| name == b"t")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, RagError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| RagError::UnsupportedFormat(format!("pptx zip: {}", e)))?;
    let mut slide_names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    slide_names.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    let mut out = String::new();
    for name in slide_names {
        let xml = read_zip_entry_bounded(&mut archive, &name, MAX_XML_ENTRY_BYTES)?;
        let text = extract_text_elements(&xml, |n| n == b"t")?;
        if !out.is_empty() && !text.is_empty() {
            out.push(' ');
        }
        out.push_str(&text);
    }
    Ok(out)
}

/// Generic `quick_xml` text-node extractor: concatenates the content of any
/// element whose local name passes `want_name`, joined by nothing (caller
/// controls separators through what it passes in).
fn extract_text_elements(xml: &[u8], want_name: impl Fn(&[u8]) -> bool) -> Result<String, RagError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if want_name(e.local_name().as_ref()) {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf) {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Text(te)) => {
                let s = te.unescape().unwrap_or_default();
                let trimmed = s.trim();
                if !trimmed.is_empty() {
                    if !out.is_empty() {
                        out.push(' ');
                    }
                    out.push_str(trimmed);
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(RagError::UnsupportedFormat(format!("xml: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, RagError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| RagError::UnsupportedFormat(format!("xlsx zip: {}", e)))?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet_names = list_worksheet_names(&mut archive);
    let mut out = String::new();
    for (idx, (sheet_num, path, display_name)) in sheet_names.into_iter().take(XLSX_MAX_SHEETS).enumerate() {
        let sheet_xml = read_zip_entry_bounded(&mut archive, &path, MAX_XML_ENTRY_BYTES)?;
        let cell_texts = extract_xlsx_sheet_cells(&sheet_xml, &shared_strings)?;
        if idx > 0 && !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("Sheet: {}\n", display_name.unwrap_or_else(|| sheet_num.to_string())));
        out.push_str(&cell_texts);
    }
    Ok(out)
}

fn read_shared_strings(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<String>, RagError> {
    let xml = match read_zip_entry_bounded(archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES) {
        Ok(x) => x,
        Err(_) => return Ok(Vec::new()),
    };
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_si = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = true;
                } else if in_si && e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf) {
                        strings.push(te.unescape().unwrap_or_default().into_owned());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"si" {
                    in_si = false;
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(RagError::UnsupportedFormat(format!("xlsx shared strings: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Lists worksheet entries as `(positional index, zip entry path, display name)`,
/// ordered by the numeric suffix of `xl/worksheets/sheetN.xml`. The display
/// name is resolved through `xl/workbook.xml`'s `<sheets><sheet name="..."
/// r:id="..."/>` mapping and `xl/_rels/workbook.xml.rels`'s relationship
/// targets; it is `None` when either file is missing or malformed, in which
/// case the caller falls back to the positional index.
fn list_worksheet_names(archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>) -> Vec<(u32, String, Option<String>)> {
    let mut entries: Vec<(u32, String)> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| {
            let num = s
                .trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX);
            (num, s.to_string())
        })
        .collect();
    entries.sort_by_key(|(n, _)| *n);

    let names_by_path = resolve_sheet_display_names(archive);
    entries
        .into_iter()
        .map(|(num, path)| {
            let display_name = names_by_path.get(&path).cloned();
            (num, path, display_name)
        })
        .collect()
}

/// Maps each worksheet's zip entry path to its workbook-defined display name
/// by joining `xl/workbook.xml`'s `r:id`-keyed sheet names with
/// `xl/_rels/workbook.xml.rels`'s `r:id -> Target` relationships. Returns an
/// empty map (triggering the positional-index fallback for every sheet) if
/// either file is missing or fails to parse.
fn resolve_sheet_display_names(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> std::collections::HashMap<String, String> {
    let workbook_xml = match read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES) {
        Ok(x) => x,
        Err(_) => return std::collections::HashMap::new(),
    };
    let rels_xml = match read_zip_entry_bounded(archive, "xl/_rels/workbook.xml.rels", MAX_XML_ENTRY_BYTES) {
        Ok(x) => x,
        Err(_) => return std::collections::HashMap::new(),
    };

    let names_by_rid = match parse_workbook_sheet_names(&workbook_xml) {
        Ok(m) => m,
        Err(_) => return std::collections::HashMap::new(),
    };
    let targets_by_rid = match parse_workbook_rels(&rels_xml) {
        Ok(m) => m,
        Err(_) => return std::collections::HashMap::new(),
    };

    names_by_rid
        .into_iter()
        .filter_map(|(rid, name)| {
            let target = targets_by_rid.get(&rid)?;
            let path = if let Some(stripped) = target.strip_prefix('/') {
                stripped.to_string()
            } else {
                format!("xl/{}", target)
            };
            Some((path, name))
        })
        .collect()
}

fn parse_workbook_sheet_names(xml: &[u8]) -> Result<std::collections::HashMap<String, String>, RagError> {
    let mut out = std::collections::HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) | Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"sheet" {
                    let mut name = None;
                    let mut rid = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"name" => name = attr.unescape_value().ok().map(|s| s.into_owned()),
                            b"r:id" => rid = attr.unescape_value().ok().map(|s| s.into_owned()),
                            _ => {}
                        }
                    }
                    if let (Some(name), Some(rid)) = (name, rid) {
                        out.insert(rid, name);
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(RagError::UnsupportedFormat(format!("workbook.xml: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn parse_workbook_rels(xml: &[u8]) -> Result<std::collections::HashMap<String, String>, RagError> {
    let mut out = std::collections::HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) | Ok(quick_xml::events::Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Relationship" {
                    let mut id = None;
                    let mut target = None;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"Id" => id = attr.unescape_value().ok().map(|s| s.into_owned()),
                            b"Target" => target = attr.unescape_value().ok().map(|s| s.into_owned()),
                            _ => {}
                        }
                    }
                    if let (Some(id), Some(target)) = (id, target) {
                        out.insert(id, target);
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(RagError::UnsupportedFormat(format!("workbook.xml.rels: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_xlsx_sheet_cells(xml: &[u8], shared_strings: &[String]) -> Result<String, RagError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut in_v = false;
    let mut cell_is_shared_str = false;
    let mut cell_count = 0usize;
    let mut current_row: Vec<String> = Vec::new();
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"row" {
                    current_row = Vec::new();
                } else if e.local_name().as_ref() == b"c" {
                    cell_is_shared_str = e.attributes().any(|a| {
                        a.as_ref()
                            .map(|a| a.key.as_ref() == b"t" && a.value.as_ref() == b"s")
                            .unwrap_or(false)
                    });
                } else if e.local_name().as_ref() == b"v" {
                    in_v = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) if in_v => {
                let v = te.unescape().unwrap_or_default();
                let s = v.trim();
                if !s.is_empty() {
                    let resolved = if cell_is_shared_str {
                        s.parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned())
                            .unwrap_or_default()
                    } else {
                        s.to_string()
                    };
                    current_row.push(resolved);
                    cell_count += 1;
                }
                in_v = false;
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"v" {
                    in_v = false;
                } else if e.local_name().as_ref() == b"c" {
                    cell_is_shared_str = false;
                } else if e.local_name().as_ref() == b"row" && !current_row.is_empty() {
                    rows.push(std::mem::take(&mut current_row));
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(RagError::UnsupportedFormat(format!("xlsx sheet: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows
        .into_iter()
        .map(|row| row.join("\t"))
        .collect::<Vec<_>>()
        .join("\n"))
}
