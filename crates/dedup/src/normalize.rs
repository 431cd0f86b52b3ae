use unicode_normalization::UnicodeNormalization;

/// Normalize a title for use as a dedup key: lowercase, decompose accents
/// and drop the combining marks, then strip everything that is not
/// alphanumeric. Returns None when nothing survives.
pub fn normalize_title(title: &str) -> Option<String> {
    let normalized: String = title
        .nfkd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// First author surname from a CORD-19 `authors` cell, which lists authors
/// as `Last, First; Last, First`. Some rows carry plain `First Last` names
/// instead; the last whitespace token covers those.
pub fn first_author_surname_from_csv(authors: &str) -> Option<String> {
    let first = authors.split(';').next()?.trim();
    if first.is_empty() {
        return None;
    }
    let surname = match first.split_once(',') {
        Some((last, _)) => last.trim(),
        None => first.split_whitespace().last()?,
    };
    if surname.is_empty() {
        None
    } else {
        Some(surname.to_lowercase())
    }
}

/// Publication year from a CORD-19 `publish_time` cell (`2020-03-11`,
/// `2020`, or empty).
pub fn year_from_publish_time(publish_time: &str) -> Option<i32> {
    let year = publish_time.trim().get(0..4)?;
    year.parse().ok()
}

/// Elsevier articles carry their PII inside S-style DOIs:
/// `10.1016/S0140-6736(20)30183-5` is PII `S0140673620301835` once the
/// separators are stripped. The PII is the key of the publisher PDF
/// mirror. DOIs in Elsevier's journal-code style (`10.1016/j.cell...`)
/// do not embed one.
pub fn pii_from_doi(doi: &str) -> Option<String> {
    let suffix = doi.trim().strip_prefix("10.1016/")?;
    if !suffix.starts_with('S') && !suffix.starts_with('s') {
        return None;
    }
    let pii: String = suffix
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    // A PII is `S` plus a 16-character body.
    (pii.len() == 17).then_some(pii)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_normalize_title() {
        for (raw, expect) in [
            ("Evaluating Potential  Recipients", Some("evaluatingpotentialrecipients")),
            ("SARS-CoV-2: a review", Some("sarscov2areview")),
            ("Étude des coronavirus", Some("etudedescoronavirus")),
            ("  ", None),
            ("!!!", None),
        ] {
            assert_eq!(normalize_title(raw).as_deref(), expect, "{raw:?}");
        }
    }

    #[test]
    fn test_title_case_and_punctuation_collapse() {
        assert_eq!(
            normalize_title("COVID-19, and beyond."),
            normalize_title("covid 19 and beyond")
        );
    }

    #[test]
    fn test_first_author_surname() {
        for (raw, expect) in [
            ("Ho, Quan; Nguyen, An", Some("ho")),
            ("Jane van Dyk", Some("dyk")),
            ("", None),
            ("; ;", None),
        ] {
            assert_eq!(first_author_surname_from_csv(raw).as_deref(), expect, "{raw:?}");
        }
    }

    #[test]
    fn test_year_from_publish_time() {
        for (raw, expect) in [
            ("2020-03-11", Some(2020)),
            ("2020", Some(2020)),
            ("", None),
            ("n/a", None),
        ] {
            assert_eq!(year_from_publish_time(raw), expect, "{raw:?}");
        }
    }

    #[test]
    fn test_pii_from_doi() {
        for (raw, expect) in [
            ("10.1016/S0140-6736(20)30183-5", Some("S0140673620301835")),
            ("10.1016/s0140-6736(20)30183-5", Some("S0140673620301835")),
            // Journal-code DOIs carry no PII.
            ("10.1016/j.cell.2020.04.011", None),
            // Truncated S-suffix is not a PII.
            ("10.1016/S0140-6736", None),
            ("10.1097/TXD.0000000000001010", None),
            ("", None),
        ] {
            assert_eq!(pii_from_doi(raw).as_deref(), expect, "{raw:?}");
        }
    }
}
