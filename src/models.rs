//! Value types shared by the search, extraction, pipeline and scheduler layers.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MinerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompanySize {
    Micro,
    Small,
    Medium,
    Large,
}

impl CompanySize {
    pub const ALL: [CompanySize; 4] = [
        CompanySize::Micro,
        CompanySize::Small,
        CompanySize::Medium,
        CompanySize::Large,
    ];

    /// Label used in queries, filenames and on the command line.
    pub fn label(&self) -> &'static str {
        match self {
            CompanySize::Micro => "Micro",
            CompanySize::Small => "Pequena",
            CompanySize::Medium => "Média",
            CompanySize::Large => "Grande",
        }
    }
}

impl fmt::Display for CompanySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CompanySize {
    type Err = MinerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "Micro" => Ok(CompanySize::Micro),
            "Pequena" => Ok(CompanySize::Small),
            "Média" | "Media" => Ok(CompanySize::Medium),
            "Grande" => Ok(CompanySize::Large),
            other => Err(MinerError::Validation(format!(
                "company size {:?} is not one of {}",
                other,
                CompanySize::ALL.map(|s| s.label()).join(", ")
            ))),
        }
    }
}

macro_rules! state_codes {
    ($($code:ident),+ $(,)?) => {
        /// Brazilian federative unit (UF).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum StateCode {
            $($code),+
        }

        impl StateCode {
            pub const ALL: &'static [StateCode] = &[$(StateCode::$code),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(StateCode::$code => stringify!($code)),+
                }
            }
        }
    };
}

state_codes!(
    AC, AL, AP, AM, BA, CE, DF, ES, GO, MA, MT, MS, MG, PA, PB, PR, PE, PI, RJ, RN, RS, RO, RR,
    SC, SP, SE, TO,
);

impl fmt::Display for StateCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateCode {
    type Err = MinerError;

    fn from_str(s: &str) -> Result<Self> {
        let code = s.trim();
        StateCode::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == code)
            .ok_or_else(|| MinerError::Validation(format!("state {:?} is not a Brazilian UF code", code)))
    }
}

/// A validated size/state/niche triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQueryParams {
    pub company_size: CompanySize,
    pub state_code: StateCode,
    pub niche: String,
}

impl SearchQueryParams {
    pub fn new(company_size: CompanySize, state_code: StateCode, niche: &str) -> Result<Self> {
        let niche = niche.trim();
        if niche.chars().count() < 3 {
            return Err(MinerError::Validation(
                "niche must have at least 3 characters".to_string(),
            ));
        }
        Ok(SearchQueryParams {
            company_size,
            state_code,
            niche: niche.to_string(),
        })
    }
}

/// Parse and validate raw size/state/niche values.
pub fn validate_params(size: &str, state: &str, niche: &str) -> Result<SearchQueryParams> {
    let company_size = size.parse()?;
    let state_code = state.parse()?;
    SearchQueryParams::new(company_size, state_code, niche)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchSource {
    Google,
    Bing,
    LinkedIn,
}

impl fmt::Display for SearchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchSource::Google => "Google",
            SearchSource::Bing => "Bing",
            SearchSource::LinkedIn => "LinkedIn",
        };
        f.write_str(name)
    }
}

/// Raw title/url pair as returned by one search surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub source: SearchSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub original_url: String,
    pub local_path: PathBuf,
    pub size_bytes: u64,
    pub filename: String,
}

/// A link on a page that looks like a downloadable document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    pub url: String,
    pub filename: String,
    pub extension: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocialPlatform {
    Instagram,
    Facebook,
    LinkedIn,
    WhatsApp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub url: String,
    pub title: String,
    pub description: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub social_media: BTreeMap<SocialPlatform, String>,
    pub downloaded_files: Vec<FileRef>,
    pub source_result: Option<SearchResult>,
}

impl CompanyRecord {
    /// Admission rule: some contact field or at least one social link.
    pub fn is_valid(&self) -> bool {
        let has_contact = [&self.phone, &self.email, &self.address]
            .iter()
            .any(|field| field.as_deref().is_some_and(|v| !v.is_empty()));
        has_contact || !self.social_media.is_empty()
    }

    pub fn social(&self, platform: SocialPlatform) -> Option<&str> {
        self.social_media.get(&platform).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCounts {
    pub total: usize,
    pub with_phone: usize,
    pub with_email: usize,
    pub with_instagram: usize,
    pub with_whatsapp: usize,
}

impl ReportCounts {
    pub fn tally(records: &[CompanyRecord]) -> Self {
        let has = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());
        ReportCounts {
            total: records.len(),
            with_phone: records.iter().filter(|r| has(&r.phone)).count(),
            with_email: records.iter().filter(|r| has(&r.email)).count(),
            with_instagram: records
                .iter()
                .filter(|r| r.social(SocialPlatform::Instagram).is_some())
                .count(),
            with_whatsapp: records
                .iter()
                .filter(|r| r.social(SocialPlatform::WhatsApp).is_some())
                .count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub storage_path: PathBuf,
    pub total_files: usize,
    pub total_size_bytes: u64,
    pub total_size_mb: f64,
}

/// Outcome of one mining run. Built once, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningReport {
    pub run_id: Uuid,
    pub status: ReportStatus,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub duration_seconds: f64,
    pub params: Option<SearchQueryParams>,
    pub counts: ReportCounts,
    pub generated_files: Vec<PathBuf>,
    pub storage: Option<StorageSnapshot>,
    pub summary: String,
    pub message: Option<String>,
}

impl MiningReport {
    pub fn failure(started_at: DateTime<Local>, params: Option<SearchQueryParams>, message: String) -> Self {
        let finished_at = Local::now();
        MiningReport {
            run_id: Uuid::new_v4(),
            status: ReportStatus::Error,
            started_at,
            finished_at,
            duration_seconds: seconds_between(started_at, finished_at),
            params,
            counts: ReportCounts::default(),
            generated_files: Vec::new(),
            storage: None,
            summary: format!("Mining failed: {}", message),
            message: Some(message),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReportStatus::Success
    }
}

pub(crate) fn seconds_between(start: DateTime<Local>, end: DateTime<Local>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub next_run_at: Option<DateTime<Local>>,
    pub scheduled_job_count: usize,
    pub worker_alive: bool,
    pub mining_in_progress: bool,
}
