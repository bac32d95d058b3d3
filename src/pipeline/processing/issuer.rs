use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::config::PipelineConfig;
use crate::domain::InstrumentType;
use crate::error::Result;

const GOVERNMENT_OF_INDIA: &str = "GOVERNMENT OF INDIA";

/// Derived identity of one instrument
#[derive(Debug, Clone, PartialEq)]
pub struct IssuerClassification {
    pub issuer_name: String,
    pub instrument_type: InstrumentType,
    pub is_sovereign: bool,
}

/// Instrument type, issuer key and sovereign flag from name and ISIN
pub struct IssuerClassifier {
    type_rules: Vec<(InstrumentType, Regex)>,
    govt_of_state: Regex,
    state_sdl: Regex,
    coupon: Regex,
    strip_tokens: HashSet<String>,
    stop_words: HashSet<String>,
    legal_suffixes: Vec<String>,
    aliases: HashMap<String, String>,
    sovereign_markers: Vec<Regex>,
    sovereign_prefixes: Vec<String>,
}

impl IssuerClassifier {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let issuer = &config.issuer;

        let type_rules = vec![
            (InstrumentType::Overnight, Regex::new(r"(?i)\b(treps|c?repo|reverse repo|tri-?party repo|cblo)\b")?),
            (InstrumentType::TBill, Regex::new(r"(?i)(\bt-?bills?\b|\btreasury bills?\b|\bdtb\b)")?),
            // "Govt of India" must not fall into the state rule below
            (InstrumentType::GSec, Regex::new(r"(?i)\b(govt\.?|government)\s+of\s+india\b")?),
            (
                InstrumentType::Sdl,
                Regex::new(r"(?i)(\bsdl\b|\bstate dev(elopment)? loan\b|\bgovt\.? of\b|\bstate of\b)")?,
            ),
            (
                InstrumentType::GSec,
                Regex::new(r"(?i)(\bg-?sec\b|\bgs\b|\bgoi\b|\bgovernment stock\b|\bgovernment of india\b|\bfrb\b)")?,
            ),
            (InstrumentType::Cp, Regex::new(r"(?i)\b(cp|commercial paper)\b")?),
            (InstrumentType::Cd, Regex::new(r"(?i)\b(cd|certificate of deposit)\b")?),
            (
                InstrumentType::At1Tier2,
                Regex::new(r"(?i)(\bperp|\bat1\b|\btier[\s-]*(ii|2)\b|\bsubordinated\b)")?,
            ),
        ];

        let legal_suffixes: Vec<String> = issuer.legal_suffixes.iter().map(|s| s.to_uppercase()).collect();
        let strip_tokens = issuer.strip_tokens.iter().map(|s| s.to_uppercase()).collect();
        let stop_words = issuer.stop_words.iter().map(|s| s.to_uppercase()).collect();

        let mut classifier = Self {
            type_rules,
            govt_of_state: Regex::new(r"(?i)\b(?:govt\.?|government|state)\s+of\s+([a-z][a-z .&]*?)\s*(?:\bsdl\b|\d|\(|$)")?,
            state_sdl: Regex::new(r"(?i)^\s*(?:[\d.]+\s*%\s*)?([a-z][a-z .&]*?)\s+sdl\b")?,
            coupon: Regex::new(r"\d+(?:\.\d+)?\s*%")?,
            strip_tokens,
            stop_words,
            legal_suffixes,
            aliases: HashMap::new(),
            sovereign_markers: Vec::new(),
            sovereign_prefixes: issuer.sovereign_isin_prefixes.iter().map(|p| p.to_uppercase()).collect(),
        };

        for marker in &issuer.sovereign_name_markers {
            let pattern = format!(r"(?i)(^|[^A-Z0-9]){}($|[^A-Z0-9])", regex::escape(marker.trim()));
            classifier.sovereign_markers.push(Regex::new(&pattern)?);
        }

        let mut aliases = HashMap::new();
        for (canonical, variants) in &issuer.aliases {
            let key = canonical.trim().to_uppercase();
            aliases.insert(classifier.drop_legal_suffixes(&key), key.clone());
            for variant in variants {
                aliases.insert(classifier.drop_legal_suffixes(&variant.to_uppercase()), key.clone());
            }
        }
        classifier.aliases = aliases;

        Ok(classifier)
    }

    pub fn instrument_type(&self, instrument_name: &str) -> InstrumentType {
        self.type_rules
            .iter()
            .find(|(_, re)| re.is_match(instrument_name))
            .map(|(t, _)| *t)
            .unwrap_or(InstrumentType::CorporateBond)
    }

    pub fn is_sovereign(&self, instrument_name: &str, isin: Option<&str>, instrument_type: InstrumentType) -> bool {
        if matches!(instrument_type, InstrumentType::GSec | InstrumentType::TBill | InstrumentType::Sdl) {
            return true;
        }
        if self.sovereign_markers.iter().any(|re| re.is_match(instrument_name)) {
            return true;
        }
        isin.map(|code| {
            let upper = code.trim().to_uppercase();
            self.sovereign_prefixes.iter().any(|p| upper.starts_with(p.as_str()))
        })
        .unwrap_or(false)
    }

    pub fn issuer_name(&self, instrument_name: &str, instrument_type: InstrumentType) -> String {
        let derived = match instrument_type {
            InstrumentType::GSec | InstrumentType::TBill => Some(GOVERNMENT_OF_INDIA.to_string()),
            InstrumentType::Sdl => self.state_issuer(instrument_name),
            _ => None,
        }
        .or_else(|| self.generic_issuer(instrument_name));

        match derived {
            Some(key) => self.aliases.get(&key).cloned().unwrap_or(key),
            None => instrument_name.trim().to_string(),
        }
    }

    pub fn classify(&self, instrument_name: &str, isin: Option<&str>) -> IssuerClassification {
        let instrument_type = self.instrument_type(instrument_name);
        IssuerClassification {
            issuer_name: self.issuer_name(instrument_name, instrument_type),
            is_sovereign: self.is_sovereign(instrument_name, isin, instrument_type),
            instrument_type,
        }
    }

    fn state_issuer(&self, instrument_name: &str) -> Option<String> {
        let caps = self
            .govt_of_state
            .captures(instrument_name)
            .or_else(|| self.state_sdl.captures(instrument_name))?;
        let state = collapse_whitespace(&caps[1].to_uppercase());
        if state.is_empty() {
            return None;
        }
        if state == "INDIA" {
            return Some(GOVERNMENT_OF_INDIA.to_string());
        }
        Some(format!("GOVERNMENT OF {} (SDL)", state))
    }

    fn generic_issuer(&self, instrument_name: &str) -> Option<String> {
        let without_coupon = self.coupon.replace_all(instrument_name, " ");
        let mut kept: Vec<String> = Vec::new();

        for token in without_coupon.split_whitespace() {
            let upper = token.to_uppercase();
            let bare = upper.trim_matches(|c: char| !c.is_ascii_alphanumeric());
            let starts_numeric = upper.starts_with(|c: char| c.is_ascii_digit());
            let is_stop = self.strip_tokens.contains(bare)
                || self.stop_words.contains(bare)
                || upper.starts_with('(')
                || (starts_numeric && !kept.is_empty());
            if is_stop {
                break;
            }
            kept.push(upper);
        }

        let key = self.drop_legal_suffixes(&kept.join(" "));
        let key = key.trim_matches(|c: char| c == '-' || c == ',' || c.is_whitespace()).to_string();
        (!key.is_empty()).then_some(key)
    }

    /// Removes trailing legal-form words (`LTD`, `LIMITED`, ...) until none remain.
    fn drop_legal_suffixes(&self, name: &str) -> String {
        let mut words: Vec<&str> = name.split_whitespace().collect();
        while let Some(last) = words.last() {
            let bare = last.trim_end_matches(',');
            if self.legal_suffixes.iter().any(|s| s == bare) {
                words.pop();
            } else {
                break;
            }
        }
        words.join(" ")
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
