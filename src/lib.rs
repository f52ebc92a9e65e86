pub mod config;
pub mod delay_manager;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod logger;
pub mod models;
pub mod pipeline;
pub mod scheduler;
pub mod search_engine;
pub mod storage;

// Exporting types for convenience
pub use config::Config;
pub use error::{MinerError, Result};
pub use extractor::{Extractor, PageInspector};
pub use fetcher::{FetchedPage, HttpFetcher, PageFetcher};
pub use models::{CompanyRecord, CompanySize, MiningReport, SearchQueryParams, StateCode};
pub use pipeline::Miner;
pub use scheduler::{MiningService, Scheduler, SchedulerSettings};
pub use search_engine::{SearchAggregator, SearchSurface};
pub use storage::Storage;
