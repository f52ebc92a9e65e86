//! On-disk artifact tree: downloaded documents, tabular exports, JSON reports.
//!
//! Every write is a whole-file write, so readers walking the tree while a
//! mining run is in flight see either the old listing or the new file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Local;
use jwalk::WalkDir;
use log::{debug, info, warn};
use rust_xlsxwriter::Workbook;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{MinerError, Result};
use crate::fetcher::FetchedPage;
use crate::logger::log_download;
use crate::models::{CompanyRecord, FileCandidate, FileRef, SocialPlatform, StorageSnapshot};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Pdf,
    Excel,
    Word,
    Html,
    Zip,
    Csv,
    Other,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 7] = [
        ArtifactKind::Pdf,
        ArtifactKind::Excel,
        ArtifactKind::Word,
        ArtifactKind::Html,
        ArtifactKind::Zip,
        ArtifactKind::Csv,
        ArtifactKind::Other,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::Pdf => "PDFs",
            ArtifactKind::Excel => "Excel",
            ArtifactKind::Word => "Word",
            ArtifactKind::Html => "HTML",
            ArtifactKind::Zip => "ZIP",
            ArtifactKind::Csv => "CSV",
            ArtifactKind::Other => "Outros",
        }
    }
}

const EXTENSION_KINDS: [(&str, ArtifactKind); 9] = [
    (".pdf", ArtifactKind::Pdf),
    (".xlsx", ArtifactKind::Excel),
    (".xls", ArtifactKind::Excel),
    (".doc", ArtifactKind::Word),
    (".docx", ArtifactKind::Word),
    (".html", ArtifactKind::Html),
    (".htm", ArtifactKind::Html),
    (".zip", ArtifactKind::Zip),
    (".csv", ArtifactKind::Csv),
];

const CONTENT_TYPE_KINDS: [(&str, &str, ArtifactKind); 8] = [
    ("application/pdf", ".pdf", ArtifactKind::Pdf),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ".xlsx",
        ArtifactKind::Excel,
    ),
    ("application/vnd.ms-excel", ".xls", ArtifactKind::Excel),
    ("application/msword", ".doc", ArtifactKind::Word),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ".docx",
        ArtifactKind::Word,
    ),
    ("text/html", ".html", ArtifactKind::Html),
    ("application/zip", ".zip", ArtifactKind::Zip),
    ("text/csv", ".csv", ArtifactKind::Csv),
];

/// Pick extension and target directory from the URL path, then the content
/// type, then fall back to `.txt` under `Outros`.
pub fn classify(url: &str, content_type: Option<&str>) -> (&'static str, ArtifactKind) {
    let path = url::Url::parse(url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_else(|_| url.to_lowercase());

    if let Some((ext, kind)) = EXTENSION_KINDS.iter().find(|(ext, _)| path.ends_with(ext)) {
        return (*ext, *kind);
    }

    if let Some(content_type) = content_type {
        let mime = content_type.split(';').next().unwrap_or_default().trim();
        if let Some((_, ext, kind)) = CONTENT_TYPE_KINDS.iter().find(|(m, _, _)| *m == mime) {
            return (*ext, *kind);
        }
    }

    (".txt", ArtifactKind::Other)
}

/// One row of the CSV/spreadsheet export.
#[derive(Debug, Clone, Serialize)]
pub struct CompanyRow {
    #[serde(rename = "nome")]
    pub name: String,
    pub url: String,
    #[serde(rename = "descricao")]
    pub description: String,
    #[serde(rename = "telefone")]
    pub phone: String,
    pub email: String,
    #[serde(rename = "endereco")]
    pub address: String,
    #[serde(rename = "fonte_busca")]
    pub search_source: String,
    pub instagram: String,
    pub whatsapp: String,
    pub facebook: String,
    pub linkedin: String,
    #[serde(rename = "arquivos_baixados")]
    pub downloaded_files: usize,
    #[serde(rename = "timestamp_processamento")]
    pub processed_at: String,
}

pub const ROW_HEADERS: [&str; 13] = [
    "nome",
    "url",
    "descricao",
    "telefone",
    "email",
    "endereco",
    "fonte_busca",
    "instagram",
    "whatsapp",
    "facebook",
    "linkedin",
    "arquivos_baixados",
    "timestamp_processamento",
];

impl CompanyRow {
    pub fn from_record(record: &CompanyRecord, processed_at: &str) -> Self {
        let social = |p| record.social(p).unwrap_or_default().to_string();
        CompanyRow {
            name: record.title.clone(),
            url: record.url.clone(),
            description: record.description.clone(),
            phone: record.phone.clone().unwrap_or_default(),
            email: record.email.clone().unwrap_or_default(),
            address: record.address.clone().unwrap_or_default(),
            search_source: record
                .source_result
                .as_ref()
                .map(|r| r.source.to_string())
                .unwrap_or_default(),
            instagram: social(SocialPlatform::Instagram),
            whatsapp: social(SocialPlatform::WhatsApp),
            facebook: social(SocialPlatform::Facebook),
            linkedin: social(SocialPlatform::LinkedIn),
            downloaded_files: record.downloaded_files.len(),
            processed_at: processed_at.to_string(),
        }
    }

    fn text_cells(&self) -> [&str; 11] {
        [
            &self.name,
            &self.url,
            &self.description,
            &self.phone,
            &self.email,
            &self.address,
            &self.search_source,
            &self.instagram,
            &self.whatsapp,
            &self.facebook,
            &self.linkedin,
        ]
    }
}

pub fn rows_for(records: &[CompanyRecord]) -> Vec<CompanyRow> {
    let processed_at = Local::now().to_rfc3339();
    records
        .iter()
        .map(|r| CompanyRow::from_record(r, &processed_at))
        .collect()
}

#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    /// Open (and create) the storage tree with one subdirectory per artifact kind.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for kind in ArtifactKind::ALL {
            let dir = root.join(kind.dir_name());
            fs::create_dir_all(&dir).map_err(|e| MinerError::persistence(&dir, e))?;
            debug!("Storage directory ready: {:?}", dir);
        }
        Ok(Storage { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    /// Persist a downloaded document under the directory matching its type.
    pub fn store_download(&self, candidate: &FileCandidate, page: &FetchedPage) -> Result<FileRef> {
        let (ext, kind) = classify(&candidate.url, page.content_type.as_deref());

        let mut filename = sanitize_filename::sanitize(&candidate.filename);
        if filename.is_empty() {
            filename = format!("download_{}", Local::now().format(TIMESTAMP_FORMAT));
        }
        if !filename.to_lowercase().ends_with(ext) {
            filename.push_str(ext);
        }

        let path = free_path(&self.dir(kind), &filename);
        if let Some(name) = path.file_name() {
            filename = name.to_string_lossy().into_owned();
        }
        fs::write(&path, &page.body).map_err(|e| MinerError::persistence(&path, e))?;

        let size_bytes = page.body.len() as u64;
        log_download(&filename, size_bytes, "OK");

        Ok(FileRef {
            original_url: candidate.url.clone(),
            local_path: path,
            size_bytes,
            filename,
        })
    }

    pub fn write_csv(&self, rows: &[CompanyRow], filename: &str) -> Result<PathBuf> {
        let path = self.dir(ArtifactKind::Csv).join(filename);
        let mut writer = csv::Writer::from_path(&path)?;
        if rows.is_empty() {
            writer.write_record(ROW_HEADERS)?;
        }
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush().map_err(|e| MinerError::persistence(&path, e))?;
        info!("CSV saved: {:?}", path);
        Ok(path)
    }

    pub fn write_spreadsheet(&self, rows: &[CompanyRow], filename: &str) -> Result<PathBuf> {
        let path = self.dir(ArtifactKind::Excel).join(filename);
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();

        for (col, header) in ROW_HEADERS.iter().enumerate() {
            worksheet.write_string(0, col as u16, *header)?;
        }
        for (i, row) in rows.iter().enumerate() {
            let r = (i + 1) as u32;
            for (col, value) in row.text_cells().iter().enumerate() {
                worksheet.write_string(r, col as u16, *value)?;
            }
            worksheet.write_number(r, 11, row.downloaded_files as f64)?;
            worksheet.write_string(r, 12, &row.processed_at)?;
        }

        workbook.save(&path)?;
        info!("Spreadsheet saved: {:?}", path);
        Ok(path)
    }

    /// Pretty JSON under `Outros`.
    pub fn write_json<T: Serialize + ?Sized>(&self, value: &T, filename: &str) -> Result<PathBuf> {
        let path = self.dir(ArtifactKind::Other).join(filename);
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json).map_err(|e| MinerError::persistence(&path, e))?;
        info!("JSON saved: {:?}", path);
        Ok(path)
    }

    /// Walk the whole tree now; nothing is cached between calls.
    pub fn snapshot(&self) -> StorageSnapshot {
        let (total_files, total_size_bytes) = WalkDir::new(&self.root)
            .skip_hidden(false)
            .follow_links(false)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| fs::metadata(entry.path()).ok())
            .fold((0usize, 0u64), |(count, size), meta| (count + 1, size + meta.len()));

        StorageSnapshot {
            storage_path: self.root.clone(),
            total_files,
            total_size_bytes,
            total_size_mb: (total_size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
        }
    }

    /// Delete files whose modification time is more than `days` days ago.
    pub fn cleanup_old_files(&self, days: u64) -> usize {
        let max_age = Duration::from_secs(days * 24 * 3600);
        let now = SystemTime::now();
        let mut removed = 0;

        let files = WalkDir::new(&self.root)
            .skip_hidden(false)
            .follow_links(false)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file());

        for entry in files {
            let path = entry.path();
            let age = fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            match age {
                Some(age) if age > max_age => match fs::remove_file(&path) {
                    Ok(()) => {
                        removed += 1;
                        info!("Old file removed: {:?}", path);
                    }
                    Err(e) => warn!("Could not remove {:?}: {}", path, e),
                },
                _ => {}
            }
        }

        info!("Cleanup finished: {} files removed", removed);
        removed
    }
}

/// `dir/filename`, or `dir/stem_N.ext` with the first free N when that is taken.
fn free_path(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }
    let name = Path::new(filename);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    let ext = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1..)
        .map(|n| dir.join(format!("{}_{}{}", stem, n, ext)))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// `timestamp()` plus a short id suffix, for files written once per run.
pub fn run_stamp(run_id: &Uuid) -> String {
    let id = run_id.simple().to_string();
    format!("{}_{}", timestamp(), &id[..8])
}
