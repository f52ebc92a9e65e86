use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use log::{error, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{Config, AUTOMATIC_PRESETS};
use crate::delay_manager::DelayManager;
use crate::error::Result;
use crate::extractor::PageInspector;
use crate::fetcher::{build_client, HttpFetcher, PageFetcher};
use crate::logger::log_mining;
use crate::models::{
    seconds_between, validate_params, CompanyRecord, FileRef, MiningReport, ReportCounts, ReportStatus,
    SearchQueryParams, SearchResult, StorageSnapshot,
};
use crate::search_engine::{HttpSearchSurface, SearchAggregator, SearchSurface};
use crate::storage::{self, rows_for, Storage};

#[derive(Debug, Clone, Serialize)]
pub struct StatisticsSettings {
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
    pub max_results: usize,
    pub storage_max_size_mb: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub storage: StorageSnapshot,
    pub settings: StatisticsSettings,
    pub over_quota: bool,
    pub timestamp: DateTime<Local>,
}

// Closes the search sessions on every exit path, unwinding included.
struct SessionGuard<'a>(&'a SearchAggregator);

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Search → enrich → filter → persist → report, for one parameter triple at a time.
pub struct Miner {
    config: Config,
    aggregator: SearchAggregator,
    inspector: PageInspector,
    fetcher: Arc<dyn PageFetcher>,
    storage: Storage,
    delay: DelayManager,
}

impl Miner {
    pub fn new(config: Config, surfaces: Vec<Box<dyn SearchSurface>>, fetcher: Arc<dyn PageFetcher>) -> Result<Self> {
        let storage = Storage::new(&config.storage_path)?;
        let delay = DelayManager::new(config.request_delay);
        let aggregator = SearchAggregator::new(surfaces, config.results_per_surface(), delay);
        Ok(Miner {
            inspector: PageInspector::new(fetcher.clone()),
            config,
            aggregator,
            fetcher,
            storage,
            delay,
        })
    }

    /// Miner wired to the live HTTP search surfaces and page fetcher.
    pub fn from_config(config: Config) -> Result<Self> {
        let client = build_client(&config)?;
        let surfaces = HttpSearchSurface::all(&client);
        let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(&config)?);
        Miner::new(config, surfaces, fetcher)
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Validate raw parameters and run one mining pass. Never panics or
    /// returns an error: failures come back as an error-status report.
    pub fn execute_mining(&self, size: &str, state: &str, niche: &str) -> MiningReport {
        let started_at = Local::now();
        let _session = SessionGuard(&self.aggregator);
        log_mining("STARTED", &format!("Size: {}, State: {}, Niche: {}", size, state, niche));

        match validate_params(size, state, niche) {
            Ok(params) => self.run_guarded(&params, started_at),
            Err(e) => {
                error!("Mining aborted: {}", e);
                MiningReport::failure(started_at, None, e.to_string())
            }
        }
    }

    fn run_guarded(&self, params: &SearchQueryParams, started_at: DateTime<Local>) -> MiningReport {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run(params, started_at)));
        let message = match outcome {
            Ok(Ok(report)) => {
                log_mining(
                    "FINISHED",
                    &format!(
                        "Results: {} companies, Files: {}",
                        report.counts.total,
                        report.generated_files.len()
                    ),
                );
                return report;
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload),
        };
        error!("Mining run failed: {}", message);
        MiningReport::failure(started_at, Some(params.clone()), message)
    }

    fn run(&self, params: &SearchQueryParams, started_at: DateTime<Local>) -> Result<MiningReport> {
        info!("Starting mining process...");
        let results = self.aggregator.smart_search(params);
        if results.is_empty() {
            warn!("Search returned no results");
        }

        let records = self.enrich(&results);
        let valid = filter_records(records);
        info!("Mining processed: {} valid companies", valid.len());

        let generated_files = self.persist(&valid, params);
        Ok(self.report(params, &valid, generated_files, started_at))
    }

    fn enrich(&self, results: &[SearchResult]) -> Vec<CompanyRecord> {
        let mut records = Vec::new();
        for (i, result) in results.iter().enumerate() {
            if i > 0 {
                self.delay.result_delay();
            }
            info!("Processing {} / {}: {}", i + 1, results.len(), result.url);

            match panic::catch_unwind(AssertUnwindSafe(|| self.enrich_one(result))) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(payload) => error!("Failed to process {}: {}", result.url, panic_message(payload)),
            }
        }
        info!("Enrichment finished: {} companies processed", records.len());
        records
    }

    fn enrich_one(&self, result: &SearchResult) -> Option<CompanyRecord> {
        let mut record = self.inspector.extract_company_info(&result.url)?;
        record.source_result = Some(result.clone());
        record.downloaded_files = self.download_all_files(&result.url);
        Some(record)
    }

    /// Download every document linked from `url`; failures are skipped.
    pub fn download_all_files(&self, url: &str) -> Vec<FileRef> {
        let candidates = self.inspector.find_downloadable_files(url);
        let mut downloaded = Vec::new();

        for (i, candidate) in candidates.iter().enumerate() {
            if i > 0 {
                self.delay.download_delay();
            }
            info!("Downloading {}", candidate.url);
            let stored = self
                .fetcher
                .fetch_page(&candidate.url)
                .and_then(|page| self.storage.store_download(candidate, &page));
            match stored {
                Ok(file) => downloaded.push(file),
                Err(e) => error!("Failed to download {}: {}", candidate.url, e),
            }
        }

        if !candidates.is_empty() {
            info!("Downloads finished: {} of {} files", downloaded.len(), candidates.len());
        }
        downloaded
    }

    fn persist(&self, records: &[CompanyRecord], params: &SearchQueryParams) -> Vec<PathBuf> {
        if records.is_empty() {
            warn!("No results to save");
            return Vec::new();
        }

        let base = base_filename(params, &storage::timestamp());
        let rows = rows_for(records);
        let mut generated = Vec::new();

        match self.storage.write_csv(&rows, &format!("{}.csv", base)) {
            Ok(path) => generated.push(path),
            Err(e) => error!("Failed to save CSV: {}", e),
        }
        match self.storage.write_spreadsheet(&rows, &format!("{}.xlsx", base)) {
            Ok(path) => generated.push(path),
            Err(e) => error!("Failed to save spreadsheet: {}", e),
        }
        match self.storage.write_json(records, &format!("{}.json", base)) {
            Ok(path) => generated.push(path),
            Err(e) => error!("Failed to save JSON: {}", e),
        }

        info!("Results saved to {} files", generated.len());
        generated
    }

    fn report(
        &self,
        params: &SearchQueryParams,
        records: &[CompanyRecord],
        generated_files: Vec<PathBuf>,
        started_at: DateTime<Local>,
    ) -> MiningReport {
        let finished_at = Local::now();
        let duration_seconds = seconds_between(started_at, finished_at);
        let counts = ReportCounts::tally(records);
        let summary = format!(
            "Mining finished with {} companies found in {:.1} seconds",
            counts.total, duration_seconds
        );

        let report = MiningReport {
            run_id: Uuid::new_v4(),
            status: ReportStatus::Success,
            started_at,
            finished_at,
            duration_seconds,
            params: Some(params.clone()),
            counts,
            generated_files,
            storage: Some(self.storage.snapshot()),
            summary,
            message: None,
        };

        let filename = format!("relatorio_mineracao_{}.json", storage::run_stamp(&report.run_id));
        if let Err(e) = self.storage.write_json(&report, &filename) {
            error!("Failed to save mining report: {}", e);
        }
        report
    }

    /// Run the preset triples one after another, keeping every report.
    pub fn execute_automatic_mining(&self) -> Vec<MiningReport> {
        info!("Starting automatic mining...");
        let mut reports = Vec::with_capacity(AUTOMATIC_PRESETS.len());

        for (i, (size, state, niche)) in AUTOMATIC_PRESETS.iter().enumerate() {
            if i > 0 {
                self.delay.run_delay();
            }
            info!("Running mining for: {}, {}, {}", size, state, niche);
            reports.push(self.execute_mining(size, state, niche));
        }

        info!("Automatic mining finished: {} executions", reports.len());
        reports
    }

    pub fn cleanup_old_files(&self, days: u64) -> usize {
        self.storage.cleanup_old_files(days)
    }

    pub fn statistics(&self) -> Statistics {
        let storage = self.storage.snapshot();
        let over_quota = storage.total_size_mb > self.config.storage_max_size_mb as f64;
        if over_quota {
            warn!(
                "Storage uses {} MB, above the {} MB quota",
                storage.total_size_mb, self.config.storage_max_size_mb
            );
        }
        Statistics {
            storage,
            settings: StatisticsSettings {
                interval_seconds: self.config.interval.as_secs(),
                timeout_seconds: self.config.request_timeout.as_secs(),
                max_results: self.config.max_results,
                storage_max_size_mb: self.config.storage_max_size_mb,
            },
            over_quota,
            timestamp: Local::now(),
        }
    }

    /// Persist the current statistics under `Outros`.
    pub fn write_statistics(&self) -> Result<PathBuf> {
        let stats = self.statistics();
        let filename = format!("estatisticas_diarias_{}.json", storage::run_stamp(&Uuid::new_v4()));
        self.storage.write_json(&stats, &filename)
    }
}

/// Admission filter: keep records carrying contact data or a social link.
pub fn filter_records(records: Vec<CompanyRecord>) -> Vec<CompanyRecord> {
    let total = records.len();
    let valid: Vec<_> = records.into_iter().filter(CompanyRecord::is_valid).collect();
    info!("Companies validated: {} of {}", valid.len(), total);
    valid
}

pub fn base_filename(params: &SearchQueryParams, timestamp: &str) -> String {
    sanitize_filename::sanitize(format!(
        "empresas_{}_{}_{}_{}",
        params.company_size.label(),
        params.state_code,
        params.niche,
        timestamp
    ))
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
