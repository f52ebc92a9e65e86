use std::borrow::Cow;

use rand::Rng;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT};
use log::debug;

use crate::config::Config;
use crate::error::{MinerError, Result};

const USER_AGENTS: [&str; 4] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
];

/// A fetched document: status, content type and raw body.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedPage {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Retrieves a URL. Non-2xx responses are errors.
pub trait PageFetcher: Send + Sync {
    fn fetch_page(&self, url: &str) -> Result<FetchedPage>;
}

/// Build the blocking client shared by page fetches and search surfaces.
pub fn build_client(config: &Config) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("pt-BR,pt;q=0.9,en-US;q=0.8"));
    if let Ok(ua) = HeaderValue::from_str(&config.user_agent) {
        headers.insert(USER_AGENT, ua);
    }

    let mut builder = Client::builder()
        .timeout(config.request_timeout)
        .default_headers(headers)
        .cookie_store(true);

    if let Some(proxy) = &config.proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| MinerError::collaborator("proxy configuration", e))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| MinerError::collaborator("building HTTP client", e))
}

pub fn random_user_agent() -> &'static str {
    let mut rng = rand::thread_rng();
    USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(HttpFetcher {
            client: build_client(config)?,
        })
    }
}

impl PageFetcher for HttpFetcher {
    fn fetch_page(&self, url: &str) -> Result<FetchedPage> {
        debug!("GET {}", url);
        let resp = self
            .client
            .get(url)
            .header(USER_AGENT, random_user_agent())
            .send()
            .map_err(|e| MinerError::collaborator(format!("fetching {}", url), e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MinerError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = resp
            .bytes()
            .map_err(|e| MinerError::collaborator(format!("reading body of {}", url), e))?;

        Ok(FetchedPage {
            url: url.to_string(),
            status: status.as_u16(),
            content_type,
            body: body.to_vec(),
        })
    }
}
