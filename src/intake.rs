//! Intake steps that write into a tenant's dataset directory and ingest
//! the new content.
//!
//! Each step writes its file into the dataset directory, so a later bulk
//! load sees it, and ingests only the new content through a scratch
//! directory inside the tenant's index location. The scratch directory is
//! removed afterwards.
//!
//! | Step | Dataset file |
//! |------|--------------|
//! | [`Intake::add_faq`] | `faq_<tenant>.json` (whole FAQ store) |
//! | [`Intake::add_manual_text`] | `manual_input_<uuid>.txt` |
//! | [`Intake::import_crawl`] | `scraped_content_<uuid>.txt` |
//! | [`Intake::finalize_uploads`] | the staged files, by name |

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use uuid::Uuid;

use tenant_rag_core::chunk::hash_text;

use crate::error::RagError;
use crate::registry::TenantRegistry;
use crate::tenant::{IngestReport, TenantIndex};

/// Result of [`Intake::finalize_uploads`].
#[derive(Debug, Clone, Default)]
pub struct FinalizedUploads {
    /// File names moved into the dataset directory, sorted.
    pub files: Vec<String>,
    pub report: IngestReport,
}

pub struct Intake {
    registry: Arc<TenantRegistry>,
}

impl Intake {
    pub fn new(registry: Arc<TenantRegistry>) -> Self {
        Self { registry }
    }

    /// Add or replace one FAQ entry. The tenant's FAQ store is
    /// read-modify-written; concurrent writers are last-write-wins.
    pub async fn add_faq(&self, tenant_id: &str, question: &str, answer: &str) -> Result<IngestReport> {
        let index = self.registry.get_or_create(tenant_id)?;
        let dataset = dataset_dir(&index)?;

        let store_path = dataset.join(format!("faq_{}.json", tenant_id));
        let mut faq = read_faq(&store_path)?;
        faq.insert(question.to_string(), Value::String(answer.to_string()));
        write_json(&store_path, &Value::Object(faq))?;

        let mut entry = Map::new();
        entry.insert(question.to_string(), Value::String(answer.to_string()));
        let entry_hash = hash_text(&format!("{}\n{}", question, answer));
        let name = format!("faq_{}.json", &entry_hash[..16]);
        let body = serde_json::to_vec_pretty(&Value::Object(entry))?;

        tracing::info!(tenant = %tenant_id, file = %name, "adding FAQ entry");
        ingest_new(&index, &[(name, body)]).await
    }

    pub async fn add_manual_text(&self, tenant_id: &str, text: &str) -> Result<IngestReport> {
        let index = self.registry.get_or_create(tenant_id)?;
        let dataset = dataset_dir(&index)?;

        let name = format!("manual_input_{}.txt", Uuid::new_v4());
        std::fs::write(dataset.join(&name), text)
            .with_context(|| format!("Failed to write {}", name))?;

        tracing::info!(tenant = %tenant_id, file = %name, "adding manual text");
        ingest_new(&index, &[(name, text.as_bytes().to_vec())]).await
    }

    /// Convert a crawler handoff file (JSON Lines or a JSON array of
    /// `{url, content}` records) into one dataset text file and ingest it.
    pub async fn import_crawl(&self, tenant_id: &str, handoff: &Path) -> Result<IngestReport> {
        let index = self.registry.get_or_create(tenant_id)?;
        let raw = std::fs::read_to_string(handoff)
            .with_context(|| format!("Failed to read crawl file: {}", handoff.display()))?;
        let contents = crawl_contents(&raw);
        if contents.is_empty() {
            return Err(RagError::EmptyCrawl {
                path: handoff.to_path_buf(),
            }
            .into());
        }
        let dataset = dataset_dir(&index)?;

        let text = contents.join("\n\n");
        let name = format!("scraped_content_{}.txt", Uuid::new_v4());
        std::fs::write(dataset.join(&name), &text)
            .with_context(|| format!("Failed to write {}", name))?;

        tracing::info!(tenant = %tenant_id, file = %name, records = contents.len(), "imported crawl");
        ingest_new(&index, &[(name, text.into_bytes())]).await
    }

    /// Save an upload into the tenant's staging location. Nothing is
    /// ingested until [`finalize_uploads`](Self::finalize_uploads).
    pub fn stage_upload(&self, tenant_id: &str, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let index = self.registry.get_or_create(tenant_id)?;
        validate_file_name(file_name)?;
        let staging = index.staging_dir();
        std::fs::create_dir_all(&staging)
            .with_context(|| format!("Failed to create {}", staging.display()))?;
        let path = staging.join(file_name);
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::debug!(tenant = %tenant_id, file = %file_name, bytes = bytes.len(), "staged upload");
        Ok(path)
    }

    /// Move every staged upload into the dataset directory, remove the
    /// staging location and ingest the moved files.
    pub async fn finalize_uploads(&self, tenant_id: &str) -> Result<FinalizedUploads> {
        let index = self.registry.get_or_create(tenant_id)?;
        let staging = index.staging_dir();
        if !staging.is_dir() {
            return Err(RagError::NoStagedUploads {
                tenant: tenant_id.to_string(),
            }
            .into());
        }
        let dataset = dataset_dir(&index)?;

        let mut staged: Vec<PathBuf> = std::fs::read_dir(&staging)
            .with_context(|| format!("Failed to read {}", staging.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        staged.sort();

        let mut files = Vec::new();
        let mut moved = Vec::new();
        for src in &staged {
            let Some(name) = src.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let dest = dataset.join(&name);
            move_file(src, &dest)?;
            let body =
                std::fs::read(&dest).with_context(|| format!("Failed to read {}", dest.display()))?;
            moved.push((name.clone(), body));
            files.push(name);
        }
        std::fs::remove_dir_all(&staging)
            .with_context(|| format!("Failed to remove {}", staging.display()))?;

        tracing::info!(tenant = %tenant_id, files = files.len(), "finalized uploads");
        let report = ingest_new(&index, &moved).await?;
        Ok(FinalizedUploads { files, report })
    }
}

fn dataset_dir(index: &TenantIndex) -> Result<PathBuf> {
    let dir = index.dataset_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir)
}

/// Ingest `files` (name, contents) through a scratch directory that holds
/// only them.
async fn ingest_new(index: &TenantIndex, files: &[(String, Vec<u8>)]) -> Result<IngestReport> {
    let scratch = index
        .index_dir()
        .join(format!("intake-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&scratch)
        .with_context(|| format!("Failed to create {}", scratch.display()))?;
    for (name, body) in files {
        std::fs::write(scratch.join(name), body)
            .with_context(|| format!("Failed to write {}", name))?;
    }

    let result = index.update_document_set(&scratch).await;
    if let Err(e) = std::fs::remove_dir_all(&scratch) {
        tracing::warn!(dir = %scratch.display(), error = %e, "failed to remove scratch directory");
    }
    result
}

fn read_faq(path: &Path) -> Result<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    match serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse FAQ store {}", path.display()))?
    {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("FAQ store {} is not a JSON object", path.display()),
    }
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))
}

/// Non-empty `content` fields of crawl records, in file order.
pub fn crawl_contents(raw: &str) -> Vec<String> {
    let records: Vec<Value> = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(records)) => records,
        Ok(single @ Value::Object(_)) => vec![single],
        _ => raw
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str(l) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::debug!(error = %e, "skipping malformed crawl record");
                    None
                }
            })
            .collect(),
    };
    records
        .iter()
        .filter_map(|r| r.get("content").and_then(Value::as_str))
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// A plain file name: no separators, not `.` or `..`.
fn validate_file_name(name: &str) -> Result<(), RagError> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && Path::new(name).file_name().map(|n| n == name).unwrap_or(false);
    if plain {
        Ok(())
    } else {
        Err(RagError::InvalidFileName {
            name: name.to_string(),
        })
    }
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(src: &Path, dest: &Path) -> Result<()> {
    if std::fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dest)
        .with_context(|| format!("Failed to move {} to {}", src.display(), dest.display()))?;
    std::fs::remove_file(src).with_context(|| format!("Failed to remove {}", src.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawl_contents_formats() {
        let lines = "{\"url\": \"a\", \"content\": \" first \"}\n\nnot json\n{\"url\": \"b\", \"content\": \"\"}\n{\"url\": \"c\", \"content\": \"second\"}";
        assert_eq!(crawl_contents(lines), vec!["first", "second"]);

        let array = r#"[{"url": "a", "content": "one"}, {"url": "b"}]"#;
        assert_eq!(crawl_contents(array), vec!["one"]);

        assert!(crawl_contents("").is_empty());
        assert!(crawl_contents("[]").is_empty());
    }

    #[test]
    fn test_file_name_validation() {
        for ok in ["brochure.pdf", "notes", ".hidden.txt"] {
            assert!(validate_file_name(ok).is_ok(), "{}", ok);
        }
        for bad in ["", ".", "..", "../x.txt", "a/b.txt", "a\\b.txt"] {
            assert!(validate_file_name(bad).is_err(), "{}", bad);
        }
    }
}
