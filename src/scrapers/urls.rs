//! Keyword-based candidate URL lookup.
//!
//! A free-text query is lower-cased and every keyword that appears anywhere in
//! it contributes its URLs, in table order. Several keywords can match the
//! same query (`"sports betting on football"` hits both entries), and the
//! contributed lists are concatenated without deduplication.

use tracing::debug;

/// Keyword table, in match order.
pub const KEYWORD_URLS: &[(&str, &[&str])] = &[
    (
        "soccer",
        &[
            "https://www.espn.com/soccer/",
            "https://www.bbc.com/sport/football",
            "https://www.goal.com/",
        ],
    ),
    (
        "basketball",
        &[
            "https://www.espn.com/nba/",
            "https://www.nba.com/news",
            "https://bleacherreport.com/nba",
        ],
    ),
    (
        "tennis",
        &[
            "https://www.atptour.com/",
            "https://www.wtatennis.com/",
            "https://tennis.com/",
        ],
    ),
    (
        "sports betting",
        &[
            "https://www.sportsbettingdime.com/",
            "https://www.actionnetwork.com/",
            "https://www.oddschecker.com/",
        ],
    ),
    (
        "baseball",
        &[
            "https://www.mlb.com/",
            "https://www.espn.com/mlb/",
            "https://bleacherreport.com/mlb",
        ],
    ),
    (
        "football",
        &[
            "https://www.nfl.com/",
            "https://www.espn.com/nfl/",
            "https://www.profootballfocus.com/",
        ],
    ),
    (
        "hockey",
        &[
            "https://www.nhl.com/",
            "https://www.espn.com/nhl/",
            "https://www.hockeybuzz.com/",
        ],
    ),
    (
        "cricket",
        &[
            "https://www.espncricinfo.com/",
            "https://www.cricket.com/",
            "https://www.icc-cricket.com/",
        ],
    ),
    (
        "golf",
        &[
            "https://www.pgatour.com/",
            "https://www.golfchannel.com/",
            "https://www.espn.com/golf/",
        ],
    ),
    (
        "mma",
        &[
            "https://www.ufc.com/",
            "https://www.mmafighting.com/",
            "https://www.espn.com/mma/",
        ],
    ),
];

/// Returned when no keyword matches.
pub const DEFAULT_URLS: [&str; 2] = [
    "https://www.sportsbettingdime.com/",
    "https://www.actionnetwork.com/",
];

/// Map a query to the candidate URLs to scrape.
///
/// # Arguments
///
/// * `query` - Free text; matched case-insensitively against each keyword as a substring
///
/// # Returns
///
/// The URLs of every matching keyword, in table order and without
/// deduplication, or [`DEFAULT_URLS`] when nothing matches.
pub fn resolve(query: &str) -> Vec<String> {
    let query = query.to_lowercase();
    let urls: Vec<String> = KEYWORD_URLS
        .iter()
        .filter(|(keyword, _)| query.contains(keyword))
        .flat_map(|(_, urls)| urls.iter().map(|u| u.to_string()))
        .collect();

    if urls.is_empty() {
        debug!(%query, "No keyword matched; using default URLs");
        return DEFAULT_URLS.iter().map(|u| u.to_string()).collect();
    }
    debug!(%query, count = urls.len(), "Resolved candidate URLs");
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls_for(keyword: &str) -> Vec<String> {
        KEYWORD_URLS
            .iter()
            .find(|(k, _)| *k == keyword)
            .map(|(_, urls)| urls.iter().map(|u| u.to_string()).collect())
            .unwrap()
    }

    #[test]
    fn test_multiple_keywords_concatenate_in_table_order() {
        let urls = resolve("I like basketball and Soccer");
        let mut expected = urls_for("soccer");
        expected.extend(urls_for("basketball"));
        assert_eq!(urls, expected);
    }

    #[test]
    fn test_unmatched_query_falls_back_to_defaults() {
        let urls = resolve("zzz-unrelated");
        assert_eq!(urls, DEFAULT_URLS.to_vec());
        assert_eq!(urls.len(), 2);
    }

    #[test]
    fn test_empty_query_falls_back_to_defaults() {
        assert_eq!(resolve(""), DEFAULT_URLS.to_vec());
    }

    #[test]
    fn test_overlapping_keywords_are_not_deduplicated() {
        let urls = resolve("sports betting on FOOTBALL");
        assert_eq!(urls.len(), 6);
        assert_eq!(urls[0], "https://www.sportsbettingdime.com/");
        assert_eq!(urls[3], "https://www.nfl.com/");
    }

    #[test]
    fn test_substring_match() {
        // "mma" is contained in "dilemma"
        assert_eq!(resolve("a dilemma"), urls_for("mma"));
    }
}
