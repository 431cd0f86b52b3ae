use crate::{Failure, ServiceLimiter};
use models::{Author, BiblioMetadata, Config, FailureReason, Identifiers};
use serde_json::Value;
use std::time::Duration;

const USER_AGENT: &str = concat!("harvest/", env!("CARGO_PKG_VERSION"));

/// The consolidated result of the metadata ladder for one Entry.
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    pub metadata: BiblioMetadata,
    /// OA link reported by the aggregator, when it answered.
    pub aggregator_url: Option<String>,
    /// Publisher full-text URL reported by the DOI registry.
    pub registry_url: Option<String>,
}

/// Unified client over the bibliographic aggregator, the DOI registry, and
/// the OA locator. The first source that answers provides the canonical
/// record; later sources only fill gaps.
pub struct MetadataClient {
    http: reqwest::Client,
    aggregator_url: Option<String>,
    doi_registry_url: String,
    oa_locator_url: String,
    contact_email: Option<String>,
    timeout: Duration,
    retries: u32,
    max_backoff: Duration,
    aggregator_limiter: ServiceLimiter,
    registry_limiter: ServiceLimiter,
    locator_limiter: ServiceLimiter,
}

impl MetadataClient {
    pub fn new(config: &Config) -> Result<Self, Failure> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| Failure::terminal(FailureReason::HttpError, err.to_string()))?;

        Ok(Self {
            http,
            aggregator_url: config
                .bibliographic_aggregator_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            doi_registry_url: config.doi_registry_url.trim_end_matches('/').to_string(),
            oa_locator_url: config.oa_locator_url.trim_end_matches('/').to_string(),
            contact_email: config.contact_email.clone(),
            timeout: config.metadata_timeout(),
            retries: config.per_stage_retries,
            max_backoff: config.max_backoff(),
            aggregator_limiter: ServiceLimiter::per_second(config.metadata_requests_per_second),
            registry_limiter: ServiceLimiter::per_second(config.metadata_requests_per_second),
            locator_limiter: ServiceLimiter::per_second(config.metadata_requests_per_second),
        })
    }

    /// Run the source ladder for `identifiers`. `seed` is row-provided
    /// metadata (CORD-19), used both for title-based aggregator lookup and
    /// as a last-resort record when no service answers.
    pub async fn enrich(
        &self,
        identifiers: &Identifiers,
        seed: Option<&BiblioMetadata>,
    ) -> Result<Enrichment, Failure> {
        let mut enrichment = Enrichment::default();
        let mut answered = false;

        if self.aggregator_url.is_some() {
            if let Some(record) = self.aggregator_lookup(identifiers, seed).await? {
                enrichment.aggregator_url = string_at(&record, &["oaLink"]);
                enrichment.metadata = parse_registry_record(&record);
                answered = true;
            }
        }

        let doi = identifiers.normalized_doi();

        if !answered {
            if let Some(doi) = &doi {
                if let Some(message) = self.registry_lookup(doi).await? {
                    enrichment.registry_url = registry_fulltext_url(&message);
                    enrichment.metadata = parse_registry_record(&message);
                    answered = true;
                }
            }
        }

        // The locator answers for gaps even when another source was
        // canonical: it is the only one that knows the best OA URL.
        if let Some(doi) = &doi {
            if enrichment.metadata.oa_url.is_none() {
                if let Some(record) = self.locator_lookup(doi).await? {
                    let locator = parse_locator_record(&record);
                    if answered {
                        enrichment.metadata.fill_from(locator);
                    } else {
                        enrichment.metadata = locator;
                        answered = true;
                    }
                }
            }
        }

        if !answered {
            match seed {
                Some(seed) => enrichment.metadata = seed.clone(),
                None => {
                    return Err(Failure::terminal(
                        FailureReason::Unresolved,
                        "no metadata source answered for this identifier set",
                    ))
                }
            }
        } else if let Some(seed) = seed {
            enrichment.metadata.fill_from(seed.clone());
        }

        Ok(enrichment)
    }

    async fn aggregator_lookup(
        &self,
        identifiers: &Identifiers,
        seed: Option<&BiblioMetadata>,
    ) -> Result<Option<Value>, Failure> {
        let base = match &self.aggregator_url {
            Some(base) => format!("{base}/service/lookup"),
            None => return Ok(None),
        };

        // Identifier ladder, strongest first, then a biblio query.
        let mut queries: Vec<Vec<(&str, String)>> = Vec::new();
        if let Some(doi) = identifiers.normalized_doi() {
            queries.push(vec![("doi", doi)]);
        }
        if let Some(pmid) = &identifiers.pmid {
            queries.push(vec![("pmid", pmid.clone())]);
        }
        if let Some(pmcid) = identifiers.normalized_pmcid() {
            queries.push(vec![("pmc", pmcid)]);
        }
        if let Some(seed) = seed {
            if let (Some(title), Some(author)) = (&seed.title, seed.first_author_surname()) {
                queries.push(vec![("atitle", title.clone()), ("firstAuthor", author)]);
            }
        }

        for query in queries {
            if let Some(record) = self
                .get_json(&self.aggregator_limiter, &base, &query)
                .await?
            {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn registry_lookup(&self, doi: &str) -> Result<Option<Value>, Failure> {
        let url = format!("{}/works/{}", self.doi_registry_url, doi);
        let mut query = Vec::new();
        if let Some(email) = &self.contact_email {
            query.push(("mailto", email.clone()));
        }
        let record = self.get_json(&self.registry_limiter, &url, &query).await?;
        Ok(record.and_then(|mut v| match v.get_mut("message") {
            Some(message) => Some(message.take()),
            None => None,
        }))
    }

    async fn locator_lookup(&self, doi: &str) -> Result<Option<Value>, Failure> {
        let url = format!("{}/{}", self.oa_locator_url, doi);
        let mut query = Vec::new();
        if let Some(email) = &self.contact_email {
            query.push(("email", email.clone()));
        }
        self.get_json(&self.locator_limiter, &url, &query).await
    }

    /// GET a JSON record. 404 means "this source has no record" (None);
    /// other 4xx are terminal; 5xx and transport errors retry with backoff.
    async fn get_json(
        &self,
        limiter: &ServiceLimiter,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Option<Value>, Failure> {
        let backoff = exponential_backoff::Backoff::new(
            self.retries,
            Duration::from_millis(500),
            Some(self.max_backoff),
        );

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            limiter.acquire().await;

            let result = self
                .http
                .get(url)
                .query(query)
                .timeout(self.timeout)
                .send()
                .await;

            let retry_in = match result {
                Ok(response) if response.status().is_success() => {
                    return match response.json::<Value>().await {
                        Ok(record) => Ok(Some(record)),
                        Err(err) => Err(Failure::terminal(
                            FailureReason::InvalidContent,
                            format!("{url}: {err}"),
                        )),
                    };
                }
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                    return Ok(None);
                }
                Ok(response) if response.status().is_client_error() => {
                    return Err(Failure::terminal(
                        FailureReason::HttpError,
                        format!("{url}: {}", response.status()),
                    ));
                }
                Ok(response) => {
                    // 5xx: the service is unhappy, retry.
                    Failure::new(
                        FailureReason::HttpError,
                        format!("{url}: {}", response.status()),
                    )
                }
                Err(err) => Failure::from_reqwest(err, url),
            };

            match backoff.next(attempt) {
                Some(delay) => {
                    tracing::debug!(url, attempt, ?delay, "metadata request failed; backing off");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(retry_in),
            }
        }
    }
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    match current {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn first_string(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::Array(items) => items.first().and_then(|v| v.as_str()).map(str::to_string),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Parse a DOI-registry-shaped record (the aggregator consolidates into the
/// same shape).
fn parse_registry_record(message: &Value) -> BiblioMetadata {
    let authors = message
        .get("author")
        .and_then(Value::as_array)
        .map(|authors| {
            authors
                .iter()
                .map(|author| {
                    let given = string_at(author, &["given"]);
                    let family = string_at(author, &["family"]);
                    let full_name = match (&given, &family) {
                        (Some(g), Some(f)) => format!("{g} {f}"),
                        (None, Some(f)) => f.clone(),
                        (Some(g), None) => g.clone(),
                        (None, None) => String::new(),
                    };
                    Author {
                        first_name: given,
                        last_name: family,
                        full_name,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let year = ["issued", "published-print", "published-online"]
        .iter()
        .find_map(|key| {
            message
                .get(key)?
                .get("date-parts")?
                .get(0)?
                .get(0)?
                .as_i64()
        })
        .map(|y| y as i32);

    BiblioMetadata {
        title: first_string(message, "title"),
        authors,
        journal: first_string(message, "container-title"),
        publisher: string_at(message, &["publisher"]),
        year,
        license: message
            .get("license")
            .and_then(Value::as_array)
            .and_then(|l| l.first())
            .and_then(|l| l.get("URL"))
            .and_then(Value::as_str)
            .map(str::to_string),
        abstract_text: string_at(message, &["abstract"]),
        oa_url: string_at(message, &["oaLink"]),
        raw: Some(message.clone()),
    }
}

/// Full-text URL advertised by the DOI registry: a `link` entry with a PDF
/// content type when present, else the registry's resource URL.
fn registry_fulltext_url(message: &Value) -> Option<String> {
    if let Some(links) = message.get("link").and_then(Value::as_array) {
        for link in links {
            let content_type = link.get("content-type").and_then(Value::as_str);
            if content_type == Some("application/pdf") {
                if let Some(url) = link.get("URL").and_then(Value::as_str) {
                    return Some(url.to_string());
                }
            }
        }
    }
    string_at(message, &["URL"])
}

/// Parse an OA-locator record.
fn parse_locator_record(record: &Value) -> BiblioMetadata {
    let best = record.get("best_oa_location");
    let oa_url = best
        .and_then(|b| string_at(b, &["url_for_pdf"]))
        .or_else(|| best.and_then(|b| string_at(b, &["url"])));

    let authors = record
        .get("z_authors")
        .and_then(Value::as_array)
        .map(|authors| {
            authors
                .iter()
                .map(|author| {
                    let given = string_at(author, &["given"]);
                    let family = string_at(author, &["family"]);
                    let full_name = match (&given, &family) {
                        (Some(g), Some(f)) => format!("{g} {f}"),
                        (None, Some(f)) => f.clone(),
                        (Some(g), None) => g.clone(),
                        (None, None) => String::new(),
                    };
                    Author {
                        first_name: given,
                        last_name: family,
                        full_name,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    BiblioMetadata {
        title: string_at(record, &["title"]),
        authors,
        journal: string_at(record, &["journal_name"]),
        publisher: string_at(record, &["publisher"]),
        year: record.get("year").and_then(Value::as_i64).map(|y| y as i32),
        license: best
            .and_then(|b| b.get("license"))
            .and_then(Value::as_str)
            .map(str::to_string),
        abstract_text: None,
        oa_url,
        raw: Some(record.clone()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_registry_record() {
        let message = json!({
            "title": ["Evaluating Potential Deceased Donor Renal Transplant Recipients for Asymptomatic COVID-19"],
            "author": [{"given": "Quan", "family": "Ho"}],
            "container-title": ["Transplantation Direct"],
            "publisher": "Wolters Kluwer",
            "issued": {"date-parts": [[2020, 5]]},
            "license": [{"URL": "https://creativecommons.org/licenses/by/4.0/"}],
            "URL": "https://doi.org/10.1097/txd.0000000000001010",
            "link": [
                {"URL": "https://example.org/fulltext.xml", "content-type": "text/xml"},
                {"URL": "https://example.org/fulltext.pdf", "content-type": "application/pdf"}
            ]
        });
        let meta = parse_registry_record(&message);
        assert_eq!(
            meta.title.as_deref(),
            Some("Evaluating Potential Deceased Donor Renal Transplant Recipients for Asymptomatic COVID-19")
        );
        assert_eq!(meta.authors.len(), 1);
        assert_eq!(meta.first_author_surname().as_deref(), Some("ho"));
        assert_eq!(meta.year, Some(2020));
        assert_eq!(
            registry_fulltext_url(&message).as_deref(),
            Some("https://example.org/fulltext.pdf")
        );
    }

    #[test]
    fn test_registry_fulltext_url_falls_back_to_resource() {
        let message = json!({"URL": "https://doi.org/10.1/x"});
        assert_eq!(
            registry_fulltext_url(&message).as_deref(),
            Some("https://doi.org/10.1/x")
        );
    }

    #[test]
    fn test_parse_locator_record() {
        let record = json!({
            "title": "A title",
            "year": 2020,
            "journal_name": "J Virol",
            "best_oa_location": {
                "url": "https://example.org/landing",
                "url_for_pdf": "https://example.org/a.pdf",
                "license": "cc-by"
            },
            "z_authors": [{"given": "An", "family": "Nguyen"}]
        });
        let meta = parse_locator_record(&record);
        assert_eq!(meta.oa_url.as_deref(), Some("https://example.org/a.pdf"));
        assert_eq!(meta.license.as_deref(), Some("cc-by"));
        assert_eq!(meta.authors[0].full_name, "An Nguyen");
    }

    #[test]
    fn test_locator_prefers_pdf_url() {
        let record = json!({
            "best_oa_location": {"url": "https://example.org/landing"}
        });
        let meta = parse_locator_record(&record);
        assert_eq!(meta.oa_url.as_deref(), Some("https://example.org/landing"));
    }
}
