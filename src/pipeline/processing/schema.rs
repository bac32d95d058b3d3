use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::CanonicalField;
use crate::error::{PipelineError, Result};

/// Canonical field -> position and text of the matching raw header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    columns: BTreeMap<CanonicalField, (usize, String)>,
}

impl FieldMapping {
    pub fn column(&self, field: CanonicalField) -> Option<usize> {
        self.columns.get(&field).map(|(idx, _)| *idx)
    }

    pub fn header(&self, field: CanonicalField) -> Option<&str> {
        self.columns.get(&field).map(|(_, h)| h.as_str())
    }

    pub fn contains(&self, field: CanonicalField) -> bool {
        self.columns.contains_key(&field)
    }

    /// Canonical name -> raw header, for extraction reports
    pub fn describe(&self) -> BTreeMap<String, String> {
        self.columns
            .iter()
            .map(|(f, (_, h))| (f.to_string(), h.clone()))
            .collect()
    }
}

/// Normalize a header or alias for comparison: BOM and spreadsheet line-break
/// artifacts removed, whitespace collapsed, lower-cased.
pub fn normalize_header(name: &str) -> String {
    let cleaned = name
        .trim_start_matches('\u{feff}')
        .replace("_x000D_", " ")
        .replace(['\r', '\n'], " ");
    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Maps a source's raw headers onto canonical fields.
///
/// Matching is exact after [`normalize_header`]; there is no fuzzy matching and
/// no precedence between aliases. Two different raw columns matching the same
/// canonical field is an error.
pub struct SchemaResolver<'a> {
    source_id: &'a str,
    aliases: &'a BTreeMap<CanonicalField, Vec<String>>,
    required: &'a [CanonicalField],
}

impl<'a> SchemaResolver<'a> {
    pub fn new(
        source_id: &'a str,
        aliases: &'a BTreeMap<CanonicalField, Vec<String>>,
        required: &'a [CanonicalField],
    ) -> Self {
        Self {
            source_id,
            aliases,
            required,
        }
    }

    pub fn resolve<S: AsRef<str>>(&self, headers: &[S]) -> Result<FieldMapping> {
        let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h.as_ref())).collect();
        let mut mapping = FieldMapping::default();
        let mut unmapped = Vec::new();

        for field in CanonicalField::ALL {
            let mut accepted: Vec<String> = vec![normalize_header(field.as_str())];
            if let Some(list) = self.aliases.get(&field) {
                accepted.extend(list.iter().map(|a| normalize_header(a)));
            }

            let matches: Vec<usize> = normalized
                .iter()
                .enumerate()
                .filter(|(_, h)| !h.is_empty() && accepted.contains(h))
                .map(|(idx, _)| idx)
                .collect();

            match matches.as_slice() {
                [] => {
                    if self.required.contains(&field) {
                        unmapped.push(field.to_string());
                    }
                }
                [idx] => {
                    mapping
                        .columns
                        .insert(field, (*idx, headers[*idx].as_ref().to_string()));
                }
                many => {
                    return Err(PipelineError::AmbiguousAlias {
                        source_id: self.source_id.to_string(),
                        field: field.to_string(),
                        columns: many.iter().map(|i| headers[*i].as_ref().to_string()).collect(),
                    });
                }
            }
        }

        if !unmapped.is_empty() {
            return Err(PipelineError::UnmappedField {
                source_id: self.source_id.to_string(),
                fields: unmapped,
            });
        }

        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases() -> BTreeMap<CanonicalField, Vec<String>> {
        let mut map = BTreeMap::new();
        map.insert(CanonicalField::Isin, vec!["ISIN Code".to_string()]);
        map.insert(
            CanonicalField::InstrumentName,
            vec!["Name of the Instrument".to_string()],
        );
        map.insert(
            CanonicalField::MarketValue,
            vec!["Market/Fair Value (Rs. in Lacs)".to_string()],
        );
        map.insert(CanonicalField::PctToNav, vec!["% to NAV".to_string()]);
        map.insert(CanonicalField::Yield, vec!["YTM".to_string(), "Yield".to_string()]);
        map
    }

    const REQUIRED: [CanonicalField; 4] = [
        CanonicalField::Isin,
        CanonicalField::InstrumentName,
        CanonicalField::MarketValue,
        CanonicalField::PctToNav,
    ];

    #[test]
    fn test_resolves_case_and_whitespace_insensitively() {
        let aliases = aliases();
        let resolver = SchemaResolver::new("alpha", &aliases, &REQUIRED);
        let headers = [
            "  name of the   INSTRUMENT ",
            "\u{feff}isin code",
            "Market/Fair Value_x000D_(Rs. in Lacs)",
            "% TO NAV",
            "ytm",
        ];

        let mapping = resolver.resolve(&headers).unwrap();
        assert_eq!(mapping.column(CanonicalField::InstrumentName), Some(0));
        assert_eq!(mapping.column(CanonicalField::Isin), Some(1));
        assert_eq!(mapping.column(CanonicalField::MarketValue), Some(2));
        assert_eq!(mapping.column(CanonicalField::PctToNav), Some(3));
        assert_eq!(mapping.header(CanonicalField::Yield), Some("ytm"));
        assert!(!mapping.contains(CanonicalField::Rating));
    }

    #[test]
    fn test_canonical_name_is_implicit_alias() {
        let aliases = BTreeMap::new();
        let resolver = SchemaResolver::new("alpha", &aliases, &REQUIRED);
        let mapping = resolver
            .resolve(&["isin", "instrument_name", "market_value", "pct_to_nav"])
            .unwrap();
        assert_eq!(mapping.column(CanonicalField::PctToNav), Some(3));
    }

    #[test]
    fn test_lists_all_unmapped_required_fields() {
        let aliases = aliases();
        let resolver = SchemaResolver::new("gamma", &aliases, &REQUIRED);
        let err = resolver.resolve(&["Name of the Instrument", "Quantity"]).unwrap_err();

        match err {
            PipelineError::UnmappedField { source_id, fields } => {
                assert_eq!(source_id, "gamma");
                assert_eq!(fields, vec!["isin", "market_value", "pct_to_nav"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_two_matching_columns_is_ambiguous() {
        let aliases = aliases();
        let resolver = SchemaResolver::new("alpha", &aliases, &REQUIRED);
        let headers = [
            "ISIN Code",
            "Name of the Instrument",
            "Market/Fair Value (Rs. in Lacs)",
            "% to NAV",
            "YTM",
            "Yield",
        ];

        let err = resolver.resolve(&headers).unwrap_err();
        match err {
            PipelineError::AmbiguousAlias { field, columns, .. } => {
                assert_eq!(field, "yield");
                assert_eq!(columns, vec!["YTM", "Yield"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_substring_is_not_a_match() {
        let aliases = aliases();
        let resolver = SchemaResolver::new("alpha", &aliases, &REQUIRED);
        let headers = [
            "ISIN Code",
            "Name of the Instrument",
            "Market/Fair Value (Rs. in Lacs)",
            "% to NAV",
            "Yield to Call",
        ];

        let mapping = resolver.resolve(&headers).unwrap();
        assert!(!mapping.contains(CanonicalField::Yield));
    }
}
