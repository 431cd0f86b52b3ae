use crate::Enrichment;
use models::{CandidateUrl, UrlSource};
use std::collections::HashSet;
use std::path::Path;

/// Assemble the ordered candidate-URL list for one Entry from an enrichment
/// result. The order is fixed: PMC OA archive, then the locator's best OA
/// URL, then the aggregator's link, then the DOI registry's publisher URL,
/// and last the local publisher mirror. Duplicates keep their first
/// occurrence, so the list is stable for a given metadata snapshot.
pub fn assemble_candidates(
    enrichment: &Enrichment,
    pmc_archive_url: Option<String>,
    publisher_mirror_path: Option<&Path>,
) -> Vec<CandidateUrl> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    let mut push = |url: Option<String>, source: UrlSource| {
        let Some(url) = url else { return };
        if url.is_empty() || !seen.insert(url.clone()) {
            return;
        }
        candidates.push(CandidateUrl { url, source });
    };

    push(pmc_archive_url, UrlSource::PmcOa);
    push(enrichment.metadata.oa_url.clone(), UrlSource::OaLocator);
    push(enrichment.aggregator_url.clone(), UrlSource::Aggregator);
    push(enrichment.registry_url.clone(), UrlSource::DoiRegistry);
    push(
        publisher_mirror_path.map(|p| p.display().to_string()),
        UrlSource::PublisherMirror,
    );

    candidates
}

#[cfg(test)]
mod test {
    use super::*;
    use models::BiblioMetadata;

    #[test]
    fn test_order_and_dedup() {
        let enrichment = Enrichment {
            metadata: BiblioMetadata {
                oa_url: Some("https://example.org/a.pdf".to_string()),
                ..Default::default()
            },
            aggregator_url: Some("https://example.org/a.pdf".to_string()),
            registry_url: Some("https://publisher.example.org/a".to_string()),
        };
        let candidates = assemble_candidates(
            &enrichment,
            Some("https://ftp.ncbi.nlm.nih.gov/pub/pmc/oa_package/b0/ac/PMC7266364.tar.gz".to_string()),
            Some(Path::new("/mirror/pdfs/x.pdf")),
        );

        let sources: Vec<_> = candidates.iter().map(|c| c.source).collect();
        assert_eq!(
            sources,
            vec![
                UrlSource::PmcOa,
                UrlSource::OaLocator,
                UrlSource::DoiRegistry,
                UrlSource::PublisherMirror,
            ]
        );
        // The aggregator URL duplicated the locator URL and was dropped.
        assert!(candidates.iter().all(|c| c.source != UrlSource::Aggregator));
    }

    #[test]
    fn test_empty_enrichment_yields_no_candidates() {
        let candidates = assemble_candidates(&Enrichment::default(), None, None);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let enrichment = Enrichment {
            metadata: BiblioMetadata {
                oa_url: Some("https://example.org/a.pdf".to_string()),
                ..Default::default()
            },
            aggregator_url: Some("https://example.org/b.pdf".to_string()),
            registry_url: None,
        };
        let first = assemble_candidates(&enrichment, None, None);
        let second = assemble_candidates(&enrichment, None, None);
        assert_eq!(first, second);
    }
}
