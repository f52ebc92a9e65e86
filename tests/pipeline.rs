use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use business_miner_lib::error::{MinerError, Result};
use business_miner_lib::fetcher::{FetchedPage, PageFetcher};
use business_miner_lib::models::{CompanySize, ReportStatus, SearchHit, SearchSource, StateCode};
use business_miner_lib::search_engine::SearchSurface;
use business_miner_lib::storage::ArtifactKind;
use business_miner_lib::{Config, Miner, MiningService};
use tempfile::TempDir;

const BAKERY: &str = r#"<html><head><title>Padaria Pão Quente</title>
    <meta name="description" content="Padaria em São Paulo"></head>
    <body><p>Fone: (11) 3333-4444</p>
    <a href="https://instagram.com/paoquente">Instagram</a>
    <a href="/cardapio.pdf">Cardapio</a>
    </body></html>"#;

const NO_CONTACT: &str = "<html><head><title>Sem contato</title></head><body>Nada aqui</body></html>";

struct FakeSurface {
    hits: Vec<(&'static str, &'static str)>,
    closed: Arc<AtomicUsize>,
}

impl SearchSurface for FakeSurface {
    fn source(&self) -> SearchSource {
        SearchSource::Google
    }

    fn search_page(&self, _query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        Ok(self
            .hits
            .iter()
            .take(max_results)
            .map(|(title, url)| SearchHit {
                title: title.to_string(),
                url: url.to_string(),
            })
            .collect())
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeFetcher {
    pages: HashMap<&'static str, (&'static str, Vec<u8>)>,
}

impl FakeFetcher {
    fn new() -> Self {
        let mut pages = HashMap::new();
        pages.insert("https://paoquente.com.br/", ("text/html", BAKERY.as_bytes().to_vec()));
        pages.insert("https://semcontato.com.br/", ("text/html", NO_CONTACT.as_bytes().to_vec()));
        pages.insert("https://paoquente.com.br/cardapio.pdf", ("application/pdf", b"%PDF-1.4".to_vec()));
        FakeFetcher { pages }
    }
}

impl PageFetcher for FakeFetcher {
    fn fetch_page(&self, url: &str) -> Result<FetchedPage> {
        match self.pages.get(url) {
            Some((content_type, body)) => Ok(FetchedPage {
                url: url.to_string(),
                status: 200,
                content_type: Some(content_type.to_string()),
                body: body.clone(),
            }),
            None => Err(MinerError::Http {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

fn miner(root: &Path, hits: Vec<(&'static str, &'static str)>) -> (Miner, Arc<AtomicUsize>) {
    let config = Config {
        storage_path: root.to_path_buf(),
        request_delay: Duration::ZERO,
        max_results: 30,
        ..Config::default()
    };
    let closed = Arc::new(AtomicUsize::new(0));
    let surface = FakeSurface {
        hits,
        closed: closed.clone(),
    };
    let miner = Miner::new(config, vec![Box::new(surface)], Arc::new(FakeFetcher::new())).unwrap();
    (miner, closed)
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn mining_keeps_contactable_companies_and_writes_artifacts() {
    let tmp = TempDir::new().unwrap();
    let (miner, closed) = miner(
        tmp.path(),
        vec![
            ("Pão Quente", "https://paoquente.com.br/"),
            ("Sem contato", "https://semcontato.com.br/"),
            ("Fora do ar", "https://foradoar.com.br/"),
        ],
    );

    let report = miner.execute_mining("Pequena", "SP", "Padarias");

    assert_eq!(report.status, ReportStatus::Success);
    assert_eq!(report.counts.total, 1);
    assert_eq!(report.counts.with_phone, 1);
    assert_eq!(report.counts.with_instagram, 1);
    assert_eq!(report.counts.with_email, 0);
    assert_eq!(closed.load(Ordering::SeqCst), 1);

    let params = report.params.as_ref().unwrap();
    assert_eq!(params.company_size, CompanySize::Small);
    assert_eq!(params.state_code, StateCode::SP);
    assert_eq!(params.niche, "Padarias");

    assert_eq!(report.generated_files.len(), 3);
    for path in &report.generated_files {
        assert!(path.exists(), "{:?} missing", path);
    }

    let storage = miner.storage();
    assert_eq!(entries(&storage.dir(ArtifactKind::Csv)).len(), 1);
    assert_eq!(entries(&storage.dir(ArtifactKind::Excel)).len(), 1);
    assert_eq!(entries(&storage.dir(ArtifactKind::Pdf)), vec!["Cardapio.pdf".to_string()]);

    let others = entries(&storage.dir(ArtifactKind::Other));
    assert!(others.iter().any(|n| n.starts_with("relatorio_mineracao_")));
    assert!(others.iter().any(|n| n.starts_with("empresas_Pequena_SP_Padarias_")));

    let csv = fs::read_to_string(&report.generated_files[0]).unwrap();
    assert!(csv.starts_with("nome,url,descricao,telefone,email,endereco,fonte_busca"));
    assert!(csv.contains("Padaria Pão Quente"));
    assert!(!csv.contains("semcontato"));
}

#[test]
fn invalid_parameters_produce_error_report_without_artifacts() {
    let tmp = TempDir::new().unwrap();
    let (miner, closed) = miner(tmp.path(), vec![("Pão Quente", "https://paoquente.com.br/")]);

    let report = miner.execute_mining("Gigante", "SP", "Padarias");

    assert_eq!(report.status, ReportStatus::Error);
    assert!(report.params.is_none());
    assert!(report.message.is_some());
    assert!(report.generated_files.is_empty());
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert!(entries(&miner.storage().dir(ArtifactKind::Other)).is_empty());
    assert!(entries(&miner.storage().dir(ArtifactKind::Csv)).is_empty());
}

#[test]
fn empty_search_is_a_successful_run_with_no_records() {
    let tmp = TempDir::new().unwrap();
    let (miner, _closed) = miner(tmp.path(), Vec::new());

    let report = miner.execute_mining("Micro", "MG", "Serviços");

    assert!(report.is_success());
    assert_eq!(report.counts.total, 0);
    assert!(report.generated_files.is_empty());
    assert!(entries(&miner.storage().dir(ArtifactKind::Csv)).is_empty());
    assert!(entries(&miner.storage().dir(ArtifactKind::Excel)).is_empty());
}

#[test]
fn automatic_mining_runs_every_preset_through_the_service_trait() {
    let tmp = TempDir::new().unwrap();
    let (miner, closed) = miner(tmp.path(), vec![("Pão Quente", "https://paoquente.com.br/")]);
    let service: Arc<dyn MiningService> = Arc::new(miner);

    let reports = service.execute_automatic_mining();
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.is_success()));
    assert_eq!(closed.load(Ordering::SeqCst), 3);

    let persisted = entries(&tmp.path().join("Outros"))
        .into_iter()
        .filter(|n| n.starts_with("relatorio_mineracao_"))
        .count();
    assert_eq!(persisted, 3);

    let stats = service.write_statistics().unwrap();
    assert!(stats
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("estatisticas_diarias_"));
}

#[test]
fn failing_spreadsheet_writer_does_not_stop_the_others() {
    let tmp = TempDir::new().unwrap();
    let (miner, _closed) = miner(tmp.path(), vec![("Pão Quente", "https://paoquente.com.br/")]);

    let excel = miner.storage().dir(ArtifactKind::Excel);
    fs::remove_dir_all(&excel).unwrap();
    fs::write(&excel, b"not a directory").unwrap();

    let report = miner.execute_mining("Pequena", "SP", "Padarias");

    assert_eq!(report.status, ReportStatus::Success);
    assert_eq!(report.counts.total, 1);
    assert_eq!(report.generated_files.len(), 2);
    assert!(report.generated_files[0].extension().is_some_and(|e| e == "csv"));
    assert!(report.generated_files[1].extension().is_some_and(|e| e == "json"));
    for path in &report.generated_files {
        assert!(path.exists(), "{:?} missing", path);
    }
}
