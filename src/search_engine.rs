use std::collections::HashSet;

use log::{debug, error, info, warn};
use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use scraper::{Html, Selector};
use url::Url;

use crate::delay_manager::DelayManager;
use crate::error::{MinerError, Result};
use crate::fetcher::random_user_agent;
use crate::logger::log_mining;
use crate::models::{SearchHit, SearchQueryParams, SearchResult, SearchSource};

/// One external search service.
pub trait SearchSurface: Send + Sync {
    fn source(&self) -> SearchSource;

    /// At most `max_results` hits for `query`. Timeouts and pages without
    /// result elements are errors.
    fn search_page(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;

    /// Release any session held by the surface. Called after every mining run.
    fn close(&self) {}
}

struct EngineLayout {
    search_url: &'static str,
    result_selector: &'static str,
    title_selector: &'static str,
    link_selector: &'static str,
}

fn layout(source: SearchSource) -> EngineLayout {
    match source {
        SearchSource::Google => EngineLayout {
            search_url: "https://www.google.com/search?q=",
            result_selector: "div.g",
            title_selector: "h3",
            link_selector: "a[href]",
        },
        SearchSource::Bing => EngineLayout {
            search_url: "https://www.bing.com/search?q=",
            result_selector: "li.b_algo",
            title_selector: "h2 a",
            link_selector: "h2 a[href]",
        },
        SearchSource::LinkedIn => EngineLayout {
            search_url: "https://www.linkedin.com/search/results/companies/?keywords=",
            result_selector: "div.search-result__info",
            title_selector: "h3 a",
            link_selector: "h3 a[href]",
        },
    }
}

/// Search surface backed by a plain HTTP GET of the engine's result page.
pub struct HttpSearchSurface {
    source: SearchSource,
    client: Client,
}

impl HttpSearchSurface {
    pub fn new(source: SearchSource, client: Client) -> Self {
        HttpSearchSurface { source, client }
    }

    /// Google, Bing and LinkedIn sharing one client.
    pub fn all(client: &Client) -> Vec<Box<dyn SearchSurface>> {
        [SearchSource::Google, SearchSource::Bing, SearchSource::LinkedIn]
            .into_iter()
            .map(|source| Box::new(HttpSearchSurface::new(source, client.clone())) as Box<dyn SearchSurface>)
            .collect()
    }
}

impl SearchSurface for HttpSearchSurface {
    fn source(&self) -> SearchSource {
        self.source
    }

    fn search_page(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let search_url = format!("{}{}", layout(self.source).search_url, urlencoding::encode(query));
        let context = format!("{} search", self.source);

        let resp = self
            .client
            .get(&search_url)
            .header(USER_AGENT, random_user_agent())
            .send()
            .map_err(|e| MinerError::collaborator(&context, e))?;
        if !resp.status().is_success() {
            return Err(MinerError::Http {
                url: search_url,
                status: resp.status().as_u16(),
            });
        }
        let html = resp.text().map_err(|e| MinerError::collaborator(&context, e))?;

        parse_results(self.source, &html, max_results)
    }

    fn close(&self) {
        debug!("{} search session closed", self.source);
    }
}

/// Extract title/url pairs from an engine's result page.
pub fn parse_results(source: SearchSource, html: &str, max_results: usize) -> Result<Vec<SearchHit>> {
    let layout = layout(source);
    let parse = |sel: &str| {
        Selector::parse(sel).map_err(|e| MinerError::collaborator(format!("selector {}", sel), e))
    };
    let result_selector = parse(layout.result_selector)?;
    let title_selector = parse(layout.title_selector)?;
    let link_selector = parse(layout.link_selector)?;

    let document = Html::parse_document(html);
    let elements: Vec<_> = document.select(&result_selector).collect();
    if elements.is_empty() {
        return Err(MinerError::collaborator(
            format!("{} search", source),
            "no result elements on page",
        ));
    }

    let base = Url::parse(layout.search_url).ok();
    let mut hits = Vec::new();
    for element in elements.into_iter().take(max_results) {
        let title = element
            .select(&title_selector)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        let href = element
            .select(&link_selector)
            .next()
            .and_then(|a| a.value().attr("href"))
            .unwrap_or_default();
        let url = absolute_result_url(base.as_ref(), href);

        if !title.is_empty() && !url.is_empty() {
            hits.push(SearchHit { title, url });
        }
    }
    Ok(hits)
}

// Google wraps organic links as /url?q=<target>&...
fn absolute_result_url(base: Option<&Url>, href: &str) -> String {
    let href = href.trim();
    if href.is_empty() {
        return String::new();
    }
    let Some(joined) = base.and_then(|b| b.join(href).ok()) else {
        return href.to_string();
    };
    if joined.path() == "/url" {
        if let Some((_, target)) = joined.query_pairs().find(|(k, _)| k == "q" || k == "url") {
            return target.into_owned();
        }
    }
    joined.to_string()
}

/// The three query intents: general presence, contact, phone/email.
pub fn build_queries(params: &SearchQueryParams) -> [String; 3] {
    let size = params.company_size.label();
    let state = params.state_code.as_str();
    let niche = &params.niche;
    [
        format!("\"{}\" empresa \"{}\" \"{}\" site instagram whatsapp", size, niche, state),
        format!("empresa \"{}\" \"{}\" \"{}\" contato", niche, state, size),
        format!("\"{}\" \"{}\" empresa \"{}\" telefone email", niche, state, size),
    ]
}

/// Keep the first occurrence of each URL, preserving order.
pub fn dedup_by_url(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(r.url.clone()))
        .collect()
}

/// Fans the query templates out over every surface and merges the hits.
pub struct SearchAggregator {
    surfaces: Vec<Box<dyn SearchSurface>>,
    results_per_surface: usize,
    delay: DelayManager,
}

impl SearchAggregator {
    pub fn new(surfaces: Vec<Box<dyn SearchSurface>>, results_per_surface: usize, delay: DelayManager) -> Self {
        SearchAggregator {
            surfaces,
            results_per_surface,
            delay,
        }
    }

    pub fn smart_search(&self, params: &SearchQueryParams) -> Vec<SearchResult> {
        log_mining(
            "SEARCH",
            &format!("Size: {}, State: {}, Niche: {}", params.company_size, params.state_code, params.niche),
        );

        let mut all_results = Vec::new();
        for query in build_queries(params) {
            info!("Running search: {}", query);
            for surface in &self.surfaces {
                all_results.extend(self.query_surface(surface.as_ref(), &query));
            }
            self.delay.query_delay();
        }

        let unique = dedup_by_url(all_results);
        info!("Smart search finished: {} unique results", unique.len());
        unique
    }

    fn query_surface(&self, surface: &dyn SearchSurface, query: &str) -> Vec<SearchResult> {
        let source = surface.source();
        match surface.search_page(query, self.results_per_surface) {
            Ok(hits) => {
                info!("{} search finished: {} results", source, hits.len());
                hits.into_iter()
                    .take(self.results_per_surface)
                    .map(|hit| SearchResult {
                        title: hit.title,
                        url: hit.url,
                        source,
                    })
                    .collect()
            }
            Err(MinerError::Collaborator { message, .. }) if message.contains("no result elements") => {
                warn!("{} search returned no result elements for: {}", source, query);
                Vec::new()
            }
            Err(e) => {
                error!("{} search failed: {}", source, e);
                Vec::new()
            }
        }
    }

    /// Close every surface session.
    pub fn close(&self) {
        for surface in &self.surfaces {
            surface.close();
        }
        info!("Search sessions closed");
    }
}
