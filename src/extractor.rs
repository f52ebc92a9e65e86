use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use log::{error, info, warn};
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::config::SUPPORTED_EXTENSIONS;
use crate::fetcher::PageFetcher;
use crate::models::{CompanyRecord, FileCandidate, SocialPlatform};

const IMAGE_SUFFIXES: [&str; 5] = [".png", ".jpg", ".jpeg", ".gif", ".webp"];

/// Pattern-based field extraction over an already fetched page.
pub struct Extractor {
    email_regex: Regex,
    phone_regex: Regex,
    address_regex: Regex,
    anchor_selector: Selector,
    title_selector: Selector,
    description_selector: Selector,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor {
    pub fn new() -> Self {
        Extractor {
            email_regex: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
                .expect("email pattern"),
            // (11) 3333-4444, 11 98888-7777, 1133334444
            phone_regex: Regex::new(r"\(?\d{2,3}\)?\s*\d{4,5}-?\d{4}").expect("phone pattern"),
            // "Rua X, 123, Bairro, Cidade"
            address_regex: Regex::new(r"Rua\s+[^,]+,\s*\d+[^,]*,[^,]*,[^,]*").expect("address pattern"),
            anchor_selector: Selector::parse("a[href]").expect("anchor selector"),
            title_selector: Selector::parse("title").expect("title selector"),
            description_selector: Selector::parse(r#"meta[name="description"]"#)
                .expect("description selector"),
        }
    }

    pub fn first_phone(&self, text: &str) -> Option<String> {
        self.phone_regex.find(text).map(|m| m.as_str().trim().to_string())
    }

    /// First email match, skipping image assets such as `logo@2x.png`.
    pub fn first_email(&self, text: &str) -> Option<String> {
        self.email_regex
            .find_iter(text)
            .map(|m| m.as_str())
            .find(|candidate| {
                let lower = candidate.to_lowercase();
                !IMAGE_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
            })
            .map(str::to_string)
    }

    pub fn first_address(&self, text: &str) -> Option<String> {
        self.address_regex.find(text).map(|m| m.as_str().trim().to_string())
    }

    /// Build a record from a page body. Contact fields take the first match in
    /// the raw body; social links take the last matching anchor per platform.
    pub fn company_info(&self, url: &str, body: &str) -> CompanyRecord {
        let document = Html::parse_document(body);

        let title = document
            .select(&self.title_selector)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .unwrap_or_default();
        let description = document
            .select(&self.description_selector)
            .next()
            .and_then(|meta| meta.value().attr("content"))
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        CompanyRecord {
            url: url.to_string(),
            title,
            description,
            phone: self.first_phone(body),
            email: self.first_email(body),
            address: self.first_address(body),
            social_media: self.social_links(&document),
            downloaded_files: Vec::new(),
            source_result: None,
        }
    }

    fn social_links(&self, document: &Html) -> BTreeMap<SocialPlatform, String> {
        let mut links = BTreeMap::new();
        for anchor in document.select(&self.anchor_selector) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let href = href.trim().to_lowercase();
            if let Some(platform) = social_platform(&href) {
                links.insert(platform, href);
            }
        }
        links
    }

    /// Links whose path ends with a supported document extension, resolved
    /// against `base_url`.
    pub fn downloadable_files(&self, base_url: &str, body: &str) -> Vec<FileCandidate> {
        let base = match Url::parse(base_url) {
            Ok(u) => u,
            Err(e) => {
                warn!("Invalid base URL {}: {}", base_url, e);
                return Vec::new();
            }
        };

        let document = Html::parse_document(body);
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for anchor in document.select(&self.anchor_selector) {
            let Some(href) = anchor.value().attr("href").map(str::trim) else {
                continue;
            };
            let lower = href.to_lowercase();
            let Some(extension) = SUPPORTED_EXTENSIONS.iter().copied().find(|ext| lower.ends_with(ext)) else {
                continue;
            };
            let Ok(resolved) = base.join(href) else {
                continue;
            };
            let resolved = resolved.to_string();
            if !seen.insert(resolved.clone()) {
                continue;
            }

            let text = anchor.text().collect::<String>().trim().to_string();
            let filename = if text.is_empty() {
                href.rsplit('/').next().unwrap_or(href).to_string()
            } else {
                text
            };

            files.push(FileCandidate {
                url: resolved,
                filename,
                extension,
            });
        }
        files
    }
}

fn social_platform(href: &str) -> Option<SocialPlatform> {
    if href.contains("instagram.com") {
        Some(SocialPlatform::Instagram)
    } else if href.contains("facebook.com") {
        Some(SocialPlatform::Facebook)
    } else if href.contains("linkedin.com") {
        Some(SocialPlatform::LinkedIn)
    } else if href.contains("whatsapp") || href.contains("wa.me") {
        Some(SocialPlatform::WhatsApp)
    } else {
        None
    }
}

/// Fetches pages and runs the [`Extractor`] over them. Any fetch failure is
/// logged and reported as absence.
pub struct PageInspector {
    fetcher: Arc<dyn PageFetcher>,
    extractor: Extractor,
}

impl PageInspector {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        PageInspector {
            fetcher,
            extractor: Extractor::new(),
        }
    }

    pub fn extract_company_info(&self, url: &str) -> Option<CompanyRecord> {
        match self.fetcher.fetch_page(url) {
            Ok(page) => {
                let record = self.extractor.company_info(url, &page.text());
                info!("Extracted company info from {}", url);
                Some(record)
            }
            Err(e) => {
                error!("Failed to extract company info from {}: {}", url, e);
                None
            }
        }
    }

    pub fn find_downloadable_files(&self, url: &str) -> Vec<FileCandidate> {
        match self.fetcher.fetch_page(url) {
            Ok(page) => {
                let files = self.extractor.downloadable_files(url, &page.text());
                info!("Found {} downloadable files at {}", files.len(), url);
                files
            }
            Err(e) => {
                error!("Failed to list files at {}: {}", url, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{MinerError, Result};
    use crate::fetcher::FetchedPage;

    const PAGE: &str = r#"<html><head>
        <title> Padaria Boa Massa </title>
        <meta name="description" content="Pães artesanais em Campinas">
        </head><body>
        <p>Ligue (19) 3232-1010 ou 19 98888-7777</p>
        <p>logo@2x.png contato@boamassa.com.br vendas@boamassa.com.br</p>
        <p>Rua das Flores, 120, Centro, Campinas - SP</p>
        <a href="https://www.instagram.com/boamassa_old">old</a>
        <a href="https://www.instagram.com/BoaMassa">ig</a>
        <a href="https://facebook.com/boamassa">fb</a>
        <a href="https://api.whatsapp.com/send?phone=5519988887777">zap</a>
        <a href="/docs/Cardapio.PDF">Cardápio</a>
        <a href="files/tabela.xlsx"></a>
        <a href="/docs/Cardapio.PDF">Cardápio again</a>
        <a href="/sobre">Sobre</a>
        </body></html>"#;

    #[test]
    fn contact_fields_take_first_match() {
        let record = Extractor::new().company_info("https://boamassa.com.br/", PAGE);
        assert_eq!(record.title, "Padaria Boa Massa");
        assert_eq!(record.description, "Pães artesanais em Campinas");
        assert_eq!(record.phone.as_deref(), Some("(19) 3232-1010"));
        assert_eq!(record.email.as_deref(), Some("contato@boamassa.com.br"));
        assert!(record
            .address
            .unwrap()
            .starts_with("Rua das Flores, 120, Centro, Campinas"));
    }

    #[test]
    fn social_links_take_last_match_per_platform() {
        let record = Extractor::new().company_info("https://boamassa.com.br/", PAGE);
        assert_eq!(
            record.social(SocialPlatform::Instagram),
            Some("https://www.instagram.com/boamassa")
        );
        assert_eq!(record.social(SocialPlatform::Facebook), Some("https://facebook.com/boamassa"));
        assert!(record.social(SocialPlatform::WhatsApp).is_some());
        assert!(record.social(SocialPlatform::LinkedIn).is_none());
    }

    #[test]
    fn missing_fields_stay_absent() {
        let record = Extractor::new().company_info("https://vazio.com.br", "<html><body>nada</body></html>");
        assert!(record.phone.is_none());
        assert!(record.email.is_none());
        assert!(record.address.is_none());
        assert!(record.social_media.is_empty());
        assert!(!record.is_valid());
    }

    #[test]
    fn downloadable_files_resolve_relative_links() {
        let files = Extractor::new().downloadable_files("https://boamassa.com.br/loja/", PAGE);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].url, "https://boamassa.com.br/docs/Cardapio.PDF");
        assert_eq!(files[0].filename, "Cardápio");
        assert_eq!(files[0].extension, ".pdf");
        assert_eq!(files[1].url, "https://boamassa.com.br/loja/files/tabela.xlsx");
        assert_eq!(files[1].filename, "tabela.xlsx");
    }

    struct FailingFetcher;

    impl PageFetcher for FailingFetcher {
        fn fetch_page(&self, url: &str) -> Result<FetchedPage> {
            Err(MinerError::Http {
                url: url.to_string(),
                status: 503,
            })
        }
    }

    #[test]
    fn fetch_failure_means_absence() {
        let inspector = PageInspector::new(Arc::new(FailingFetcher));
        assert!(inspector.extract_company_info("https://down.example").is_none());
        assert!(inspector.find_downloadable_files("https://down.example").is_empty());
    }
}
