//! `export` / `import` (spec §4.2, §6): JSON/CSV/YAML/XML snapshots of one or
//! more namespaces, with optional symmetric encryption and conflict
//! resolution on import.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::domain::memory_entry::MemoryEntry;
use crate::error::{CoreError, CoreResult};

use super::{DistributedMemory, StoreOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Yaml,
    Xml,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    Overwrite,
    Skip,
    Merge,
    Rename,
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub namespace: Option<String>,
    pub value_type: Option<crate::domain::memory_entry::MemoryValueType>,
    pub include_metadata: bool,
    pub encryption_key: Option<[u8; 32]>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::Json,
            namespace: None,
            value_type: None,
            include_metadata: true,
            encryption_key: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub format: ExportFormat,
    pub conflict_policy: ConflictPolicy,
    pub dry_run: bool,
    pub expected_checksum: Option<String>,
    pub decryption_key: Option<[u8; 32]>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::Json,
            conflict_policy: ConflictPolicy::Skip,
            dry_run: false,
            expected_checksum: None,
            decryption_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub generator: String,
    pub version: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub checksum: String,
    pub encrypted: bool,
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExportedEntry {
    namespace: String,
    key: String,
    value: serde_json::Value,
    tags: Vec<String>,
    owner: Option<String>,
    version: u64,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
    compressed: bool,
}

impl From<&MemoryEntry> for ExportedEntry {
    fn from(entry: &MemoryEntry) -> Self {
        Self {
            namespace: entry.namespace.clone(),
            key: entry.key.clone(),
            value: entry.value.clone(),
            tags: entry.tags.iter().cloned().collect(),
            owner: entry.owner.clone(),
            version: entry.version,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
            compressed: entry.compressed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExportDocument {
    metadata: ExportMetadata,
    /// Populated when the export is not encrypted.
    #[serde(default)]
    entries: Vec<ExportedEntry>,
    /// Base64 ciphertext of the serialized entry list, populated instead of
    /// `entries` when `metadata.encrypted` is true.
    #[serde(default)]
    encrypted_entries: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExportReport {
    pub entries_written: usize,
    pub checksum: String,
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub renamed: usize,
    pub merged: usize,
}

fn checksum_of(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> CoreResult<(Vec<u8>, String)> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|err| CoreError::CorruptData(format!("encryption failed: {err}")))?;
    Ok((ciphertext, BASE64.encode(nonce_bytes)))
}

fn decrypt(ciphertext: &[u8], key: &[u8; 32], nonce_b64: &str) -> CoreResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce_bytes = BASE64
        .decode(nonce_b64)
        .map_err(|err| CoreError::CorruptData(format!("invalid nonce: {err}")))?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|err| CoreError::CorruptData(format!("decryption failed: {err}")))
}

fn serialize_entries(entries: &[ExportedEntry], format: ExportFormat) -> CoreResult<Vec<u8>> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_vec_pretty(entries)?),
        ExportFormat::Yaml => serde_yaml::to_string(entries)
            .map(String::into_bytes)
            .map_err(|err| CoreError::ValidationFailed(format!("yaml serialization error: {err}"))),
        ExportFormat::Csv => {
            let mut out = String::from("namespace,key,value,tags,owner,version\n");
            for entry in entries {
                let value = entry.value.to_string().replace('"', "\"\"");
                let tags = entry.tags.join(";");
                out.push_str(&format!(
                    "\"{}\",\"{}\",\"{value}\",\"{tags}\",\"{}\",{}\n",
                    entry.namespace,
                    entry.key,
                    entry.owner.clone().unwrap_or_default(),
                    entry.version
                ));
            }
            Ok(out.into_bytes())
        }
        ExportFormat::Xml => {
            let mut out = String::from("<entries>\n");
            for entry in entries {
                out.push_str(&format!(
                    "  <entry namespace=\"{}\" key=\"{}\" version=\"{}\"><value>{}</value></entry>\n",
                    xml_escape(&entry.namespace),
                    xml_escape(&entry.key),
                    entry.version,
                    xml_escape(&entry.value.to_string()),
                ));
            }
            out.push_str("</entries>\n");
            Ok(out.into_bytes())
        }
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

pub(crate) async fn export(memory: &DistributedMemory, path: &Path, opts: ExportOptions) -> CoreResult<ExportReport> {
    let namespaces = match &opts.namespace {
        Some(ns) => vec![ns.clone()],
        None => memory.list_namespaces().await,
    };

    let mut exported = Vec::new();
    for namespace in namespaces {
        for entry in memory.all_namespace_entries(&namespace).await {
            if opts.value_type.is_some_and(|t| t != entry.value_type) {
                continue;
            }
            exported.push(ExportedEntry::from(&entry));
        }
    }
    exported.sort_by(|a, b| (a.namespace.as_str(), a.key.as_str()).cmp(&(b.namespace.as_str(), b.key.as_str())));

    // Checksum is always computed over the canonical (plaintext) JSON
    // projection of the entry list, independent of output format or
    // encryption, so importers can verify regardless of which format they
    // received (spec §6: "a checksum returned from export that the importer
    // must verify when supplied").
    let canonical = serde_json::to_vec(&exported)?;
    let checksum = checksum_of(&canonical);

    if opts.format != ExportFormat::Json {
        let body = serialize_entries(&exported, opts.format)?;
        tokio::fs::write(path, body).await?;
        return Ok(ExportReport { entries_written: exported.len(), checksum });
    }

    let (entries, encrypted_entries, nonce) = match &opts.encryption_key {
        Some(key) => {
            let (ciphertext, nonce) = encrypt(&canonical, key)?;
            (Vec::new(), Some(BASE64.encode(ciphertext)), Some(nonce))
        }
        None => (exported.clone(), None, None),
    };

    let metadata = ExportMetadata {
        generator: "swarmcore".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        checksum: checksum.clone(),
        encrypted: opts.encryption_key.is_some(),
        nonce,
    };

    let document = ExportDocument { metadata, entries, encrypted_entries };
    tokio::fs::write(path, serde_json::to_vec_pretty(&document)?).await?;

    Ok(ExportReport { entries_written: exported.len(), checksum })
}

pub(crate) async fn import(memory: &DistributedMemory, path: &Path, opts: ImportOptions) -> CoreResult<ImportReport> {
    let raw = tokio::fs::read(path).await?;

    let document: ExportDocument = match opts.format {
        ExportFormat::Json => serde_json::from_slice(&raw)?,
        other => {
            return Err(CoreError::ValidationFailed(format!(
                "import currently supports the json metadata envelope only, got {other:?}"
            )))
        }
    };

    let entries = if document.metadata.encrypted {
        let key = opts
            .decryption_key
            .ok_or_else(|| CoreError::ValidationFailed("import is encrypted but no key was supplied".to_string()))?;
        let nonce = document
            .metadata
            .nonce
            .as_deref()
            .ok_or_else(|| CoreError::CorruptData("encrypted export missing nonce".to_string()))?;
        let ciphertext = BASE64
            .decode(document.encrypted_entries.as_deref().ok_or_else(|| {
                CoreError::CorruptData("export is marked encrypted but carries no ciphertext".to_string())
            })?)
            .map_err(|err| CoreError::CorruptData(format!("encrypted export is not valid base64: {err}")))?;
        let plaintext = decrypt(&ciphertext, &key, nonce)?;
        serde_json::from_slice::<Vec<ExportedEntry>>(&plaintext)?
    } else {
        document.entries
    };

    // Checksums are always taken over the canonical (plaintext) entry list
    // using the same non-pretty encoding `export` used, regardless of
    // whether the document on disk was encrypted.
    if let Some(expected) = &opts.expected_checksum {
        let actual = checksum_of(&serde_json::to_vec(&entries)?);
        if &actual != expected {
            return Err(CoreError::CorruptData(format!(
                "checksum mismatch: expected {expected}, computed {actual}"
            )));
        }
    }

    let mut report = ImportReport::default();
    for entry in entries {
        let existing = memory
            .retrieve(&entry.key, super::RetrieveOptions { namespace: Some(entry.namespace.clone()), skip_touch: true })
            .await;

        let (target_namespace, target_key) = match (&existing, opts.conflict_policy) {
            (None, _) => (entry.namespace.clone(), entry.key.clone()),
            (Some(_), ConflictPolicy::Overwrite) => (entry.namespace.clone(), entry.key.clone()),
            (Some(_), ConflictPolicy::Skip) => {
                report.skipped += 1;
                continue;
            }
            (Some(_), ConflictPolicy::Merge) => {
                report.merged += 1;
                (entry.namespace.clone(), entry.key.clone())
            }
            (Some(_), ConflictPolicy::Rename) => {
                let mut suffix = 1u32;
                loop {
                    let candidate = format!("{}~{suffix}", entry.key);
                    let collision = memory
                        .retrieve(&candidate, super::RetrieveOptions { namespace: Some(entry.namespace.clone()), skip_touch: true })
                        .await;
                    if collision.is_none() {
                        report.renamed += 1;
                        break (entry.namespace.clone(), candidate);
                    }
                    suffix += 1;
                    if suffix > 10_000 {
                        return Err(CoreError::ConflictResolutionRequired(format!(
                            "no available rename suffix for key {}",
                            entry.key
                        )));
                    }
                }
            }
        };

        if !opts.dry_run {
            memory
                .store(
                    &target_key,
                    entry.value,
                    StoreOptions {
                        namespace: Some(target_namespace),
                        tags: entry.tags.into_iter().collect(),
                        owner: entry.owner,
                        force_compress: entry.compressed,
                        ..Default::default()
                    },
                )
                .await?;
        }
        report.imported += 1;
    }

    Ok(report)
}
