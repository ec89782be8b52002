//! Loader registry: file extension → text segments.
//!
//! A loader is a plain function from a path to the file's raw text segments.
//! Supporting a new format means adding one entry to the table. Files whose
//! extension has no entry are skipped by ingestion without error.
//!
//! | Extension | Segments |
//! |-----------|----------|
//! | `txt`, `md` | whole file |
//! | `csv` | one per data row, as `header: value` pairs |
//! | `json` | FAQ entries, crawler record contents, or the raw text |
//! | `pdf` | one per page |
//! | `docx` | document body |
//! | `pptx` | one per slide |
//! | `xlsx` | one per sheet |
//! | `epub` | one per spine document |

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::extract;

pub type LoaderFn = fn(&Path) -> Result<Vec<String>>;

#[derive(Clone)]
pub struct LoaderRegistry {
    loaders: HashMap<String, LoaderFn>,
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl LoaderRegistry {
    pub fn empty() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }

    /// Every built-in format.
    pub fn standard() -> Self {
        Self::empty()
            .with("txt", load_plain_text)
            .with("md", load_plain_text)
            .with("csv", load_csv)
            .with("json", load_json)
            .with("pdf", load_pdf)
            .with("docx", load_docx)
            .with("pptx", load_pptx)
            .with("xlsx", load_xlsx)
            .with("epub", load_epub)
    }

    /// Register (or replace) the loader for `extension` (without the dot).
    pub fn with(mut self, extension: &str, loader: LoaderFn) -> Self {
        self.loaders.insert(extension.to_ascii_lowercase(), loader);
        self
    }

    /// Loader for `path` by its lowercased extension.
    pub fn get(&self, path: &Path) -> Option<LoaderFn> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        self.loaders.get(&ext).copied()
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.get(path).is_some()
    }

    pub fn extensions(&self) -> Vec<&str> {
        let mut exts: Vec<&str> = self.loaders.keys().map(String::as_str).collect();
        exts.sort_unstable();
        exts
    }

    /// Regular files directly inside `dir` that have a loader, sorted by name.
    /// Subdirectories are not descended into.
    pub fn supported_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry =
                entry.with_context(|| format!("Failed to read directory: {}", dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if self.supports(entry.path()) {
                files.push(entry.into_path());
            } else {
                tracing::debug!(file = %entry.path().display(), "no loader for extension, skipping");
            }
        }
        Ok(files)
    }
}

fn read_text(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

pub fn load_plain_text(path: &Path) -> Result<Vec<String>> {
    Ok(vec![read_text(path)?])
}

pub fn load_csv(path: &Path) -> Result<Vec<String>> {
    Ok(csv_rows(&read_text(path)?))
}

fn csv_rows(text: &str) -> Vec<String> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(header_line) = lines.next() else {
        return Vec::new();
    };
    let header = split_csv_line(header_line);
    let rows: Vec<String> = lines
        .map(|line| {
            split_csv_line(line)
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_empty())
                .map(|(i, v)| match header.get(i).filter(|h| !h.is_empty()) {
                    Some(h) => format!("{}: {}", h, v),
                    None => v.clone(),
                })
                .collect::<Vec<_>>()
                .join("; ")
        })
        .filter(|r| !r.is_empty())
        .collect();
    if rows.is_empty() {
        // A single line is data, not a header.
        return vec![header.join("; ")];
    }
    rows
}

/// Split one CSV line on commas, honouring double-quoted fields.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field).trim().to_string()),
            _ => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}

/// FAQ object → `Question/Answer` segments; crawler records (array or
/// JSON Lines) → their `content` fields; anything else → the raw text.
pub fn load_json(path: &Path) -> Result<Vec<String>> {
    let text = read_text(path)?;
    Ok(json_segments(&text))
}

fn json_segments(text: &str) -> Vec<String> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Object(map)) if map.values().all(|v| v.is_string()) => map
            .iter()
            .filter_map(|(q, a)| a.as_str().map(|a| format!("Question: {}\nAnswer: {}", q, a)))
            .collect(),
        Ok(serde_json::Value::Array(records)) => {
            let contents = record_contents(records.iter());
            if contents.is_empty() {
                vec![text.to_string()]
            } else {
                contents
            }
        }
        Ok(_) => vec![text.to_string()],
        Err(_) => {
            let records: Vec<serde_json::Value> = text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .filter_map(|l| serde_json::from_str(l).ok())
                .collect();
            let contents = record_contents(records.iter());
            if contents.is_empty() {
                vec![text.to_string()]
            } else {
                contents
            }
        }
    }
}

fn record_contents<'a>(records: impl Iterator<Item = &'a serde_json::Value>) -> Vec<String> {
    records
        .filter_map(|r| r.get("content").and_then(|c| c.as_str()))
        .filter(|c| !c.trim().is_empty())
        .map(str::to_string)
        .collect()
}

pub fn load_pdf(path: &Path) -> Result<Vec<String>> {
    Ok(extract::pdf_segments(&read_bytes(path)?)?)
}

pub fn load_docx(path: &Path) -> Result<Vec<String>> {
    Ok(extract::docx_segments(&read_bytes(path)?)?)
}

pub fn load_pptx(path: &Path) -> Result<Vec<String>> {
    Ok(extract::pptx_segments(&read_bytes(path)?)?)
}

pub fn load_xlsx(path: &Path) -> Result<Vec<String>> {
    Ok(extract::xlsx_segments(&read_bytes(path)?)?)
}

pub fn load_epub(path: &Path) -> Result<Vec<String>> {
    Ok(extract::epub_segments(&read_bytes(path)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::fixtures::docx;
    use tempfile::TempDir;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = LoaderRegistry::standard();
        assert!(registry.supports(Path::new("Notes.TXT")));
        assert!(registry.supports(Path::new("faq_t1.json")));
        assert!(!registry.supports(Path::new("image.png")));
        assert!(!registry.supports(Path::new("Makefile")));
        assert_eq!(
            registry.extensions(),
            vec!["csv", "docx", "epub", "json", "md", "pdf", "pptx", "txt", "xlsx"]
        );
    }

    #[test]
    fn test_custom_entry() {
        fn shout(_: &Path) -> Result<Vec<String>> {
            Ok(vec!["LOUD".to_string()])
        }
        let registry = LoaderRegistry::empty().with("LOG", shout);
        let loader = registry.get(Path::new("x.log")).unwrap();
        assert_eq!(loader(Path::new("x.log")).unwrap(), vec!["LOUD"]);
    }

    #[test]
    fn test_supported_files_skips_unknown_and_subdirs() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.txt"), "b").unwrap();
        std::fs::write(tmp.path().join("a.md"), "a").unwrap();
        std::fs::write(tmp.path().join("c.png"), [0u8; 4]).unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("nested").join("d.txt"), "d").unwrap();

        let files = LoaderRegistry::standard().supported_files(tmp.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.md", "b.txt"]);
    }

    #[test]
    fn test_csv_rows_use_header() {
        let rows = csv_rows("Course,Seats\n\"Computer, Engg\",120\n\nCivil,\n");
        assert_eq!(rows, vec!["Course: Computer, Engg; Seats: 120", "Course: Civil"]);
        assert_eq!(csv_rows("only,one"), vec!["only; one"]);
        assert!(csv_rows("").is_empty());
    }

    #[test]
    fn test_split_csv_line_escaped_quotes() {
        assert_eq!(split_csv_line(r#"a,"say ""hi""",c"#), vec!["a", "say \"hi\"", "c"]);
    }

    #[test]
    fn test_json_faq_object() {
        let segments = json_segments(r#"{"What are the hours?": "9 to 5"}"#);
        assert_eq!(segments, vec!["Question: What are the hours?\nAnswer: 9 to 5"]);
    }

    #[test]
    fn test_json_crawl_array_and_lines() {
        let array = r#"[{"url": "u1", "content": "first page"}, {"url": "u2", "content": ""}]"#;
        assert_eq!(json_segments(array), vec!["first page"]);
        let lines = "{\"url\": \"u1\", \"content\": \"one\"}\n{\"url\": \"u2\", \"content\": \"two\"}\n";
        assert_eq!(json_segments(lines), vec!["one", "two"]);
    }

    #[test]
    fn test_json_fallback_raw() {
        assert_eq!(json_segments(r#"{"n": 1}"#), vec![r#"{"n": 1}"#]);
        assert_eq!(json_segments("not json"), vec!["not json"]);
    }

    #[test]
    fn test_docx_through_registry() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("brochure.docx");
        std::fs::write(&path, docx(&["Campus tour every Friday"])).unwrap();
        let loader = LoaderRegistry::standard().get(&path).unwrap();
        assert_eq!(loader(&path).unwrap(), vec!["Campus tour every Friday"]);
    }

    #[test]
    fn test_corrupt_pdf_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.pdf");
        std::fs::write(&path, b"garbage").unwrap();
        assert!(load_pdf(&path).is_err());
    }
}
