use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::config::PipelineConfig;
use crate::constants::NULL_SENTINELS;
use crate::domain::StandardizedRating;
use crate::error::Result;

/// One side of a (possibly split) rating after cleanup
#[derive(Debug, Clone, PartialEq)]
enum ParsedGrade {
    LongTerm(StandardizedRating),
    ShortTerm(String),
    Unrecognized,
}

/// Maps free-text agency ratings onto [`StandardizedRating`].
///
/// Never fails. Split ratings resolve to the lowest long-term grade;
/// short-term grades only count when nothing on the long-term scale is present.
pub struct RatingNormalizer {
    grades: HashMap<String, StandardizedRating>,
    short_term: HashSet<String>,
    short_term_equivalents: HashMap<String, StandardizedRating>,
    agency_prefixes: Vec<String>,
    ignored_tokens: HashSet<String>,
    parenthetical: Regex,
}

impl RatingNormalizer {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let mut grades = HashMap::new();
        for (rating, aliases) in config.rating_aliases()? {
            for alias in aliases {
                grades.insert(alias.trim().to_uppercase(), rating);
            }
        }

        let short_term = config
            .rating
            .short_term_grades
            .iter()
            .map(|g| g.trim().to_uppercase())
            .collect();

        let mut short_term_equivalents = HashMap::new();
        for (grade, equivalent) in &config.rating.short_term_equivalents {
            let rating = equivalent
                .parse::<StandardizedRating>()
                .map_err(crate::error::PipelineError::Config)?;
            short_term_equivalents.insert(grade.trim().to_uppercase(), rating);
        }

        // Longest first so "IND-RA" is tried before "IND"
        let mut agency_prefixes: Vec<String> = config
            .rating
            .agency_prefixes
            .iter()
            .map(|p| p.trim().to_uppercase())
            .collect();
        agency_prefixes.sort_by(|a, b| b.len().cmp(&a.len()));

        Ok(Self {
            grades,
            short_term,
            short_term_equivalents,
            agency_prefixes,
            ignored_tokens: config.rating.ignored_tokens.iter().map(|t| t.to_uppercase()).collect(),
            parenthetical: Regex::new(r"\([^)]*\)")?,
        })
    }

    pub fn normalize(&self, raw: &str) -> StandardizedRating {
        let upper = raw.trim().to_uppercase();
        if NULL_SENTINELS.contains(&upper.as_str()) {
            return StandardizedRating::Unrated;
        }

        let without_suffixes = self.parenthetical.replace_all(&upper, " ");
        let parsed: Vec<ParsedGrade> = without_suffixes
            .split(['/', '|', ',', '&'])
            .map(|part| self.parse_part(part))
            .collect();

        let long_term: Vec<StandardizedRating> = parsed
            .iter()
            .filter_map(|p| match p {
                ParsedGrade::LongTerm(r) => Some(*r),
                _ => None,
            })
            .collect();

        if let Some(lowest) = long_term
            .iter()
            .filter(|r| r.is_graded())
            .min_by_key(|r| r.rank())
        {
            return *lowest;
        }
        if let Some(first) = long_term.first() {
            return *first;
        }

        let short: Vec<&String> = parsed
            .iter()
            .filter_map(|p| match p {
                ParsedGrade::ShortTerm(g) => Some(g),
                _ => None,
            })
            .collect();
        if short.is_empty() {
            return StandardizedRating::Other;
        }

        // Every short-term grade needs an explicit equivalent to be comparable
        let equivalents: Option<Vec<StandardizedRating>> = short
            .iter()
            .map(|g| self.short_term_equivalents.get(g.as_str()).copied())
            .collect();
        equivalents
            .and_then(|eq| eq.into_iter().min_by_key(|r| r.rank()))
            .unwrap_or(StandardizedRating::Other)
    }

    fn parse_part(&self, part: &str) -> ParsedGrade {
        let spaced = part.replace(['[', ']'], " ");
        let tokens: Vec<&str> = spaced
            .split_whitespace()
            .filter_map(|token| self.strip_agency(token))
            .filter(|token| !self.ignored_tokens.contains(*token))
            .collect();
        if tokens.is_empty() {
            return ParsedGrade::Unrecognized;
        }

        let candidate = tokens.join(" ");
        if let Some(rating) = self.grades.get(&candidate) {
            return ParsedGrade::LongTerm(*rating);
        }
        if self.short_term.contains(&candidate) {
            return ParsedGrade::ShortTerm(candidate);
        }
        ParsedGrade::Unrecognized
    }

    /// Drops a bare agency token and strips an `AGENCY-` prefix glued to a grade.
    fn strip_agency<'t>(&self, token: &'t str) -> Option<&'t str> {
        for prefix in &self.agency_prefixes {
            if token == prefix {
                return None;
            }
            if let Some(rest) = token.strip_prefix(prefix.as_str()) {
                if let Some(grade) = rest.strip_prefix('-') {
                    return (!grade.is_empty()).then_some(grade);
                }
            }
        }
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;

    fn normalizer() -> RatingNormalizer {
        RatingNormalizer::from_config(&test_config()).unwrap()
    }

    #[test]
    fn test_split_rating_resolves_to_long_term_grade() {
        let n = normalizer();
        assert_eq!(n.normalize("AA/A1+"), StandardizedRating::Aa);
        assert_eq!(n.normalize("A1+ / AA"), StandardizedRating::Aa);
    }

    #[test]
    fn test_split_rating_takes_the_lower_grade() {
        let n = normalizer();
        assert_eq!(n.normalize("AAA/AA+"), StandardizedRating::Aa);
        assert_eq!(n.normalize("CRISIL AA+ | ICRA A+"), StandardizedRating::A);
    }

    #[test]
    fn test_agency_prefixes_and_suffixes_are_removed() {
        let n = normalizer();
        assert_eq!(n.normalize("CRISIL AAA"), StandardizedRating::Aaa);
        assert_eq!(n.normalize("[ICRA]AA+ (CE)"), StandardizedRating::Aa);
        assert_eq!(n.normalize("IND-RA AA-"), StandardizedRating::Aa);
        assert_eq!(n.normalize("CARE-A (SO)"), StandardizedRating::A);
        assert_eq!(n.normalize("care aa stable"), StandardizedRating::Aa);
    }

    #[test]
    fn test_sovereign_aliases() {
        let n = normalizer();
        assert_eq!(n.normalize("SOV"), StandardizedRating::Sovereign);
        assert_eq!(n.normalize("Sovereign"), StandardizedRating::Sovereign);
    }

    #[test]
    fn test_empty_and_unknown_ratings() {
        let n = normalizer();
        assert_eq!(n.normalize(""), StandardizedRating::Unrated);
        assert_eq!(n.normalize("  -  "), StandardizedRating::Unrated);
        assert_eq!(n.normalize("NOT RATED"), StandardizedRating::Unrated);
        assert_eq!(n.normalize("Reverse Repo"), StandardizedRating::Other);
    }

    #[test]
    fn test_standalone_short_term_grade_without_equivalent_is_other() {
        let n = normalizer();
        assert_eq!(n.normalize("CRISIL A1+"), StandardizedRating::Other);
    }

    #[test]
    fn test_standalone_short_term_grade_uses_configured_equivalent() {
        let mut config = test_config();
        config
            .rating
            .short_term_equivalents
            .insert("A1+".to_string(), "AAA".to_string());
        let n = RatingNormalizer::from_config(&config).unwrap();
        assert_eq!(n.normalize("ICRA A1+"), StandardizedRating::Aaa);
        assert_eq!(n.normalize("A1+/A1"), StandardizedRating::Other);
    }

    #[test]
    fn test_industry_prefix_in_combined_column() {
        let n = normalizer();
        assert_eq!(n.normalize("Banks / CRISIL AAA"), StandardizedRating::Aaa);
    }
}
