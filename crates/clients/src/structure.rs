use crate::Failure;
use bytes::Bytes;
use models::FailureReason;
use std::time::Duration;

/// Options forwarded to the PDF structuring service.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuringOptions {
    /// Consolidate extracted citations against the bibliographic services.
    pub consolidate_citations: bool,
    /// Request PDF coordinate attributes on structures.
    pub coordinates: bool,
    pub segment_sentences: bool,
}

#[derive(Debug, Clone)]
pub struct StructureOutput {
    pub tei: Bytes,
    /// The transform ran but reported warnings; still a success.
    pub has_warnings: bool,
}

/// Client for the PDF-to-TEI structuring service.
pub struct StructuringClient {
    http: reqwest::Client,
    base_url: String,
    base_timeout: Duration,
}

impl StructuringClient {
    pub fn new(base_url: &str, base_timeout: Duration) -> Result<Self, Failure> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("harvest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| Failure::terminal(FailureReason::HttpError, err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            base_timeout,
        })
    }

    /// Structuring is CPU-bound on the service side and scales with input
    /// size; the deadline grows with the document, with the configured
    /// timeout as the floor.
    fn timeout_for(&self, len: usize) -> Duration {
        let scaled = Duration::from_secs(len as u64 / (100 * 1024));
        self.base_timeout.max(scaled)
    }

    pub async fn pdf_to_tei(
        &self,
        pdf: Bytes,
        options: StructuringOptions,
    ) -> Result<StructureOutput, Failure> {
        let url = format!("{}/api/processFulltextDocument", self.base_url);
        let timeout = self.timeout_for(pdf.len());

        let mut form = reqwest::multipart::Form::new()
            .part(
                "input",
                reqwest::multipart::Part::bytes(pdf.to_vec())
                    .file_name("input.pdf")
                    .mime_str("application/pdf")
                    .expect("static mime type parses"),
            )
            .text("consolidateHeader", "1");
        if options.consolidate_citations {
            form = form.text("consolidateCitations", "1");
        }
        if options.coordinates {
            form = form.text("teiCoordinates", "ref,biblStruct,figure,formula");
        }
        if options.segment_sentences {
            form = form.text("segmentSentences", "1");
        }

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| Failure::from_reqwest(err, &url))?;

        match response.status() {
            // The service answers 204 when it could not extract anything.
            reqwest::StatusCode::NO_CONTENT => Err(Failure::terminal(
                FailureReason::StructuringFailed,
                "structuring produced no content for this document",
            )),
            status if status.is_success() => {
                // 203 is the service's "completed with warnings" answer.
                let has_warnings =
                    status == reqwest::StatusCode::NON_AUTHORITATIVE_INFORMATION;
                let tei = response
                    .bytes()
                    .await
                    .map_err(|err| Failure::from_reqwest(err, &url))?;
                if tei.is_empty() {
                    return Err(Failure::terminal(
                        FailureReason::StructuringFailed,
                        "structuring returned an empty document",
                    ));
                }
                Ok(StructureOutput { tei, has_warnings })
            }
            // The service queues a bounded number of documents and sheds the
            // rest with 503.
            reqwest::StatusCode::SERVICE_UNAVAILABLE => Err(Failure::new(
                FailureReason::HttpError,
                "structuring service is saturated",
            )),
            status if status.is_server_error() => Err(Failure::new(
                FailureReason::HttpError,
                format!("{url}: {status}"),
            )),
            status => Err(Failure::terminal(
                FailureReason::StructuringFailed,
                format!("{url}: {status}"),
            )),
        }
    }

    /// Reference annotations from the service's alternate endpoint, as JSON.
    pub async fn reference_annotations(&self, pdf: Bytes) -> Result<Bytes, Failure> {
        let url = format!("{}/api/referenceAnnotations", self.base_url);
        let timeout = self.timeout_for(pdf.len());

        let form = reqwest::multipart::Form::new().part(
            "input",
            reqwest::multipart::Part::bytes(pdf.to_vec())
                .file_name("input.pdf")
                .mime_str("application/pdf")
                .expect("static mime type parses"),
        );

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| Failure::from_reqwest(err, &url))?;

        match response.status() {
            status if status.is_success() => response
                .bytes()
                .await
                .map_err(|err| Failure::from_reqwest(err, &url)),
            status if status.is_server_error() => Err(Failure::new(
                FailureReason::HttpError,
                format!("{url}: {status}"),
            )),
            status => Err(Failure::terminal(
                FailureReason::StructuringFailed,
                format!("{url}: {status}"),
            )),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_timeout_scales_with_size() {
        let client =
            StructuringClient::new("http://localhost:8070", Duration::from_secs(600)).unwrap();
        // Small documents keep the floor.
        assert_eq!(client.timeout_for(1024), Duration::from_secs(600));
        // A 100 MiB scan gets a proportionally longer deadline.
        assert_eq!(
            client.timeout_for(100 * 1024 * 1024),
            Duration::from_secs(1024)
        );
    }
}
