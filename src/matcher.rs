//! Name normalization and similarity scoring for entity reconciliation.
//!
//! Pure functions, no I/O. Scores are in `[0.0, 1.0]`:
//! - identical after normalization: 1.0
//! - one normalized name contains the other: 0.95
//! - otherwise Jaro-Winkler over the normalized names, with the prefix boost
//!   applied at every Jaro score

use std::sync::OnceLock;

use regex::Regex;

/// Score for a name that is a substring of the other. Kept below an exact
/// match so exact matches always rank first.
pub const CONTAINMENT_SCORE: f64 = 0.95;

/// Longest common prefix the Winkler boost rewards.
const WINKLER_PREFIX_LIMIT: usize = 4;
const WINKLER_SCALE: f64 = 0.1;

/// How a display name is normalized before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameStyle {
    /// Company names: corporate suffixes, country qualifiers and punctuation
    /// are dropped.
    Organization,
    /// People: case and whitespace only.
    Person,
}

/// Corporate suffixes and country qualifiers, anchored at the end of the
/// name. The leading group must be non-empty so a bare "Co" survives.
fn re_org_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(.+?)[\s,]+(?:pty\.?\s+ltd|pty\.?\s+limited|proprietary\s+limited|pty|ltd|limited|inc|incorporated|llc|l\.l\.c|llp|plc|corp|corporation|co|company|group|holdings|gmbh|ag|sa|bv|nv|australia|aust|au|nz|new\s+zealand|uk|us|usa|international|intl)\.?$",
        )
        .unwrap()
    })
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_punctuation(s: &str) -> String {
    s.chars()
        .filter_map(|c| match c {
            '\'' | '\u{2019}' => None,
            c if c.is_alphanumeric() || c.is_whitespace() => Some(c),
            _ => Some(' '),
        })
        .collect()
}

fn org_pass(s: &str) -> String {
    let mut current = collapse_whitespace(s);
    while let Some(caps) = re_org_suffix().captures(&current) {
        let stripped = caps[1].trim_end().to_string();
        if stripped == current {
            break;
        }
        current = stripped;
    }
    collapse_whitespace(&strip_punctuation(&current))
}

/// Normalize an organization name.
///
/// Runs to a fixed point, so suffixes exposed by punctuation removal
/// ("Acme (Australia) Pty. Ltd.") are stripped too and the result is
/// idempotent.
pub fn normalize_org(name: &str) -> String {
    let mut current = name.to_lowercase();
    loop {
        let next = org_pass(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

/// Normalize a person's name: lowercase and collapse whitespace.
pub fn normalize_person(name: &str) -> String {
    collapse_whitespace(&name.to_lowercase())
}

pub fn normalize(name: &str, style: NameStyle) -> String {
    match style {
        NameStyle::Organization => normalize_org(name),
        NameStyle::Person => normalize_person(name),
    }
}

/// Score two already-normalized names.
///
/// An empty name only matches another empty name; it never wins through
/// containment.
pub fn score_normalized(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a.contains(b) || b.contains(a) {
        return CONTAINMENT_SCORE;
    }
    jaro_winkler(a, b)
}

/// Jaro similarity raised by 0.1 per shared leading character (up to four),
/// scaled by the remaining distance. `strsim::jaro_winkler` skips the boost
/// below Jaro 0.7; this does not.
pub fn jaro_winkler(a: &str, b: &str) -> f64 {
    let jaro = strsim::jaro(a, b);
    let prefix = a
        .chars()
        .zip(b.chars())
        .take(WINKLER_PREFIX_LIMIT)
        .take_while(|(x, y)| x == y)
        .count();
    jaro + WINKLER_SCALE * prefix as f64 * (1.0 - jaro)
}

/// Similarity of two display names after normalization.
pub fn similarity(a: &str, b: &str, style: NameStyle) -> f64 {
    score_normalized(&normalize(a, style), &normalize(b, style))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixes_stripped_to_exact_match() {
        assert_eq!(normalize_org("Acme Pty Ltd"), "acme");
        assert_eq!(normalize_org("ACME"), "acme");
        assert_eq!(similarity("Acme Pty Ltd", "ACME", NameStyle::Organization), 1.0);
    }

    #[test]
    fn test_containment_scores_095() {
        assert_eq!(normalize_org("Northwind Trading Co"), "northwind trading");
        assert_eq!(
            similarity("Northwind Trading Co", "Northwind", NameStyle::Organization),
            CONTAINMENT_SCORE
        );
        assert_eq!(
            similarity("Northwind", "Northwind Trading Co", NameStyle::Organization),
            CONTAINMENT_SCORE
        );
    }

    #[test]
    fn test_stacked_suffixes_and_punctuation() {
        assert_eq!(normalize_org("Globex Holdings Pty. Ltd."), "globex");
        assert_eq!(normalize_org("Initech, Inc."), "initech");
        assert_eq!(normalize_org("Acme (Australia) Pty Ltd"), "acme");
        assert_eq!(normalize_org("O'Reilly   Media Group"), "oreilly media");
        assert_eq!(normalize_org("Smith & Co"), "smith");
    }

    #[test]
    fn test_bare_suffix_word_survives() {
        assert_eq!(normalize_org("Co"), "co");
        assert_eq!(normalize_org("  Group "), "group");
    }

    #[test]
    fn test_org_normalization_is_idempotent() {
        for name in [
            "Acme Pty Ltd",
            "Globex Holdings Pty. Ltd.",
            "Acme (Australia) Pty Ltd",
            "Foo, Inc. (USA)",
            "Bar Co Co",
            "Z-Corp International",
            "",
            "   ",
            "Ünïcode GmbH",
        ] {
            let once = normalize_org(name);
            assert_eq!(normalize_org(&once), once, "not idempotent for {:?}", name);
        }
    }

    #[test]
    fn test_person_normalization_keeps_punctuation() {
        assert_eq!(normalize_person("  Jane   O'Neil "), "jane o'neil");
        assert_eq!(normalize("Jane DOE", NameStyle::Person), "jane doe");
    }

    #[test]
    fn test_empty_never_matches_by_containment() {
        assert_eq!(score_normalized("", "acme"), 0.0);
        assert_eq!(score_normalized("acme", ""), 0.0);
        assert_eq!(score_normalized("", ""), 1.0);
    }

    #[test]
    fn test_jaro_winkler_branch_is_symmetric_and_deterministic() {
        let pairs = [
            ("martha", "marhta"),
            ("dwayne", "duane"),
            ("globex", "globx industries"),
            ("jane doe", "janet dow"),
        ];
        for (a, b) in pairs {
            let ab = similarity(a, b, NameStyle::Person);
            let ba = similarity(b, a, NameStyle::Person);
            assert_eq!(ab, ba, "asymmetric for {} / {}", a, b);
            assert_eq!(ab, similarity(a, b, NameStyle::Person));
            assert!((0.0..=1.0).contains(&ab));
        }
        assert!((similarity("martha", "marhta", NameStyle::Person) - 0.9611).abs() < 0.001);
    }

    #[test]
    fn test_prefix_boost_applies_below_jaro_07() {
        let jaro = strsim::jaro("initech", "initiative labs");
        assert!(jaro < 0.7, "jaro {}", jaro);
        let boosted = jaro_winkler("initech", "initiative labs");
        assert!((boosted - (jaro + 0.4 * (1.0 - jaro))).abs() < 1e-12);
        assert!((boosted - 0.8095).abs() < 0.001, "boosted {}", boosted);

        let score = similarity("Initech", "Initiative Labs", NameStyle::Organization);
        assert!(score >= crate::resolver::MATCH_THRESHOLD);
    }

    #[test]
    fn test_no_shared_prefix_means_plain_jaro() {
        assert_eq!(jaro_winkler("dwayne", "uwayne"), strsim::jaro("dwayne", "uwayne"));
        assert_eq!(jaro_winkler("abc", "xyz"), 0.0);
    }
}
