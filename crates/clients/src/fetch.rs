use crate::{Failure, HostLimiter, LegacyMirror, PmcIndex, PublisherMirror};
use bytes::Bytes;
use models::{CandidateUrl, Config, FailureReason, UrlSource};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Every real PDF starts with this.
pub const PDF_MAGIC: &[u8] = b"%PDF-";

const MAX_REDIRECTS: usize = 5;

/// HTTP downloader for article artifacts. Candidate URLs are tried in
/// order; the first response that validates as a PDF wins. Hosts answering
/// 403/429 are put on cooldown for the rest of the run, and each host has
/// its own concurrency cap independent of the worker pool.
pub struct Fetcher {
    http: reqwest::Client,
    hosts: HostLimiter,
    min_bytes: u64,
    max_bytes: u64,
    pdf_timeout: Duration,
    jats_timeout: Duration,
    pmc: Option<PmcIndex>,
    publisher_mirror: Option<PublisherMirror>,
    legacy: Option<LegacyMirror>,
}

impl Fetcher {
    pub fn new(config: &Config) -> Result<Self, Failure> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("harvest/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|err| Failure::terminal(FailureReason::HttpError, err.to_string()))?;

        let pmc = match &config.pmc_oa_list_path {
            Some(path) => Some(PmcIndex::load(path)?),
            None => None,
        };
        let publisher_mirror = match &config.cord19_publisher_pdf_path {
            Some(path) => Some(PublisherMirror::load(path)?),
            None => None,
        };
        let legacy = config
            .legacy_data_path
            .as_deref()
            .map(LegacyMirror::new);

        Ok(Self {
            http,
            hosts: HostLimiter::new(config.per_host_limit),
            min_bytes: config.min_pdf_bytes,
            max_bytes: config.max_pdf_bytes,
            pdf_timeout: config.pdf_timeout(),
            jats_timeout: config.jats_timeout(),
            pmc,
            publisher_mirror,
            legacy,
        })
    }

    /// PMC OA archive URL for a PMCID, when the local index knows it.
    pub fn pmc_archive_url(&self, pmcid: &str) -> Option<String> {
        self.pmc.as_ref()?.archive_url(pmcid)
    }

    /// Mirrored publisher PDF for a PII, when configured and present.
    pub fn publisher_mirror_path(&self, pii: &str) -> Option<PathBuf> {
        self.publisher_mirror.as_ref()?.lookup(pii)
    }

    /// Try candidates in order and return the first valid PDF. A PDF from a
    /// previous harvest tree short-circuits the list entirely.
    pub async fn fetch_pdf(
        &self,
        id: &str,
        candidates: &[CandidateUrl],
    ) -> Result<(Bytes, UrlSource), Failure> {
        if let Some(path) = self.legacy.as_ref().and_then(|m| m.lookup_pdf(id)) {
            match self.read_local_pdf(&path).await {
                Ok(bytes) => return Ok((bytes, UrlSource::LegacyMirror)),
                Err(reason) => {
                    tracing::debug!(entry = id, ?path, %reason, "legacy pdf rejected");
                }
            }
        }

        if candidates.is_empty() {
            return Err(Failure::terminal(
                FailureReason::NoUrl,
                "no candidate url for pdf",
            ));
        }

        let mut tried = 0usize;
        let mut last_reject = None;
        for candidate in candidates {
            tried += 1;
            let rejected = match candidate.source {
                UrlSource::PublisherMirror => {
                    match self.read_local_pdf(Path::new(&candidate.url)).await {
                        Ok(bytes) => return Ok((bytes, candidate.source)),
                        Err(reason) => reason,
                    }
                }
                UrlSource::PmcOa => match self.fetch_archive_member(&candidate.url, ".pdf").await {
                    Ok(bytes) => match validate_pdf(&bytes, None, self.min_bytes, self.max_bytes) {
                        Ok(()) => return Ok((bytes, candidate.source)),
                        Err(reason) => reason,
                    },
                    Err(reason) => reason,
                },
                _ => match self.download_pdf(&candidate.url).await {
                    Ok(bytes) => return Ok((bytes, candidate.source)),
                    Err(reason) => reason,
                },
            };
            tracing::debug!(
                entry = id,
                url = %candidate.url,
                source = %candidate.source,
                %rejected,
                "pdf candidate rejected"
            );
            last_reject = Some(rejected);
        }

        // With a single candidate, surface its specific rejection; a mixed
        // list collapses to all_urls_failed.
        let reason = match (tried, last_reject) {
            (1, Some(reason)) => reason,
            _ => FailureReason::AllUrlsFailed,
        };
        Err(Failure::terminal(reason, format!("{tried} candidate urls rejected")))
    }

    /// Fetch the JATS `.nxml` for a PMCID from its PMC OA package. Absence
    /// from the index is `no_url`: the article simply is not in the OA
    /// subset.
    pub async fn fetch_jats(&self, pmcid: &str) -> Result<Bytes, Failure> {
        let index = self.pmc.as_ref().ok_or_else(|| {
            Failure::terminal(FailureReason::NoUrl, "no pmc oa index configured")
        })?;
        let url = index.archive_url(pmcid).ok_or_else(|| {
            Failure::terminal(
                FailureReason::NoUrl,
                format!("{pmcid} is not in the pmc oa index"),
            )
        })?;

        match self.fetch_archive_member(&url, ".nxml").await {
            Ok(bytes) => Ok(bytes),
            Err(reason) if reason.is_retryable() => {
                Err(Failure::new(reason, format!("jats fetch failed for {url}")))
            }
            Err(reason) => Err(Failure::terminal(
                reason,
                format!("jats fetch failed for {url}"),
            )),
        }
    }

    async fn read_local_pdf(&self, path: &Path) -> Result<Bytes, FailureReason> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|_| FailureReason::InvalidContent)?;
        let bytes = Bytes::from(bytes);
        validate_pdf(&bytes, None, self.min_bytes, self.max_bytes)?;
        Ok(bytes)
    }

    async fn download_pdf(&self, raw_url: &str) -> Result<Bytes, FailureReason> {
        let (bytes, content_type) = self.download(raw_url, self.pdf_timeout).await?;
        validate_pdf(
            &bytes,
            content_type.as_deref(),
            self.min_bytes,
            self.max_bytes,
        )?;
        Ok(bytes)
    }

    /// Download a `.tar.gz` package and extract its first member with the
    /// given suffix.
    async fn fetch_archive_member(
        &self,
        url: &str,
        suffix: &str,
    ) -> Result<Bytes, FailureReason> {
        let (bytes, _) = self.download(url, self.jats_timeout).await?;
        let suffix = suffix.to_string();
        let member = tokio::task::spawn_blocking(move || extract_tar_member(&bytes, &suffix))
            .await
            .expect("archive extraction does not panic")
            .map_err(|_| FailureReason::InvalidContent)?;
        match member {
            Some(member) => Ok(Bytes::from(member)),
            None => Err(FailureReason::InvalidContent),
        }
    }

    async fn download(
        &self,
        raw_url: &str,
        timeout: Duration,
    ) -> Result<(Bytes, Option<String>), FailureReason> {
        let url = url::Url::parse(raw_url).map_err(|_| FailureReason::InvalidContent)?;
        let host = url.host_str().unwrap_or_default().to_string();

        let Some(_permit) = self.hosts.acquire(&host).await else {
            return Err(FailureReason::HttpError);
        };

        let response = match self.http.get(url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => return Err(FailureReason::Timeout),
            Err(_) => return Err(FailureReason::HttpError),
        };

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            self.hosts.cool_down(&host);
            return Err(FailureReason::HttpError);
        }
        if !status.is_success() {
            return Err(FailureReason::HttpError);
        }

        // Reject oversized bodies before reading them when the server says.
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(FailureReason::TooLarge);
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match response.bytes().await {
            Ok(bytes) => Ok((bytes, content_type)),
            Err(err) if err.is_timeout() => Err(FailureReason::Timeout),
            Err(_) => Err(FailureReason::HttpError),
        }
    }
}

/// A download is a PDF when the server called it one (or octet-stream),
/// the size is within bounds, and the body carries the PDF header.
fn validate_pdf(
    bytes: &Bytes,
    content_type: Option<&str>,
    min_bytes: u64,
    max_bytes: u64,
) -> Result<(), FailureReason> {
    if let Some(content_type) = content_type {
        let content_type = content_type.to_ascii_lowercase();
        if !content_type.contains("application/pdf")
            && !content_type.contains("octet-stream")
        {
            return Err(FailureReason::InvalidContent);
        }
    }
    if bytes.len() as u64 > max_bytes {
        return Err(FailureReason::TooLarge);
    }
    if (bytes.len() as u64) < min_bytes {
        return Err(FailureReason::InvalidContent);
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(FailureReason::InvalidContent);
    }
    Ok(())
}

fn extract_tar_member(bytes: &[u8], suffix: &str) -> std::io::Result<Option<Vec<u8>>> {
    let decoder = flate2::read::GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let is_match = entry
            .path()?
            .to_str()
            .is_some_and(|path| path.ends_with(suffix));
        if is_match {
            let mut out = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut out)?;
            return Ok(Some(out));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod test {
    use super::*;

    fn pdf_bytes(len: usize) -> Bytes {
        let mut bytes = Vec::from(PDF_MAGIC);
        bytes.resize(len, b'x');
        Bytes::from(bytes)
    }

    #[test]
    fn test_validate_pdf() {
        for (bytes, content_type, expect) in [
            (pdf_bytes(2048), Some("application/pdf"), Ok(())),
            (pdf_bytes(2048), Some("application/pdf; charset=binary"), Ok(())),
            (pdf_bytes(2048), Some("application/octet-stream"), Ok(())),
            (pdf_bytes(2048), None, Ok(())),
            // An HTML error page with a 200 status.
            (
                Bytes::from_static(b"<html>not found</html>"),
                Some("text/html"),
                Err(FailureReason::InvalidContent),
            ),
            // Truncated body below the minimum plausible size.
            (pdf_bytes(16), Some("application/pdf"), Err(FailureReason::InvalidContent)),
            // Claims PDF but carries no magic.
            (
                Bytes::from(vec![b'x'; 2048]),
                Some("application/pdf"),
                Err(FailureReason::InvalidContent),
            ),
            (pdf_bytes(10_000), None, Err(FailureReason::TooLarge)),
        ] {
            assert_eq!(
                validate_pdf(&bytes, content_type, 1024, 8192),
                expect,
                "{content_type:?} len={}",
                bytes.len()
            );
        }
    }

    #[test]
    fn test_extract_tar_member() {
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::default(),
        ));
        let body = b"<article/>";
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_cksum();
        builder
            .append_data(&mut header, "PMC13900/PMC13900.nxml", body.as_slice())
            .unwrap();
        let targz = builder.into_inner().unwrap().finish().unwrap();

        let member = extract_tar_member(&targz, ".nxml").unwrap();
        assert_eq!(member.as_deref(), Some(body.as_slice()));
        assert_eq!(extract_tar_member(&targz, ".pdf").unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_pdf_without_candidates() {
        let fetcher = Fetcher::new(&Config::default()).unwrap();
        let err = fetcher.fetch_pdf("fq4xq00d", &[]).await.unwrap_err();
        assert_eq!(err.reason, FailureReason::NoUrl);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_jats_without_index() {
        let fetcher = Fetcher::new(&Config::default()).unwrap();
        let err = fetcher.fetch_jats("PMC7266364").await.unwrap_err();
        assert_eq!(err.reason, FailureReason::NoUrl);
    }

    #[tokio::test]
    async fn test_publisher_mirror_candidate() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("x.pdf"), pdf_bytes(2048)).unwrap();

        let fetcher = Fetcher::new(&Config::default()).unwrap();
        let candidates = vec![CandidateUrl {
            url: tmp.path().join("x.pdf").display().to_string(),
            source: UrlSource::PublisherMirror,
        }];
        let (bytes, source) = fetcher.fetch_pdf("fq4xq00d", &candidates).await.unwrap();
        assert_eq!(source, UrlSource::PublisherMirror);
        assert!(bytes.starts_with(PDF_MAGIC));
    }
}
