use std::fmt;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductFilter { Health, Dental, Combined }

impl ProductFilter {
    /// Classifies a raw product cell. Free text naming neither token is `None`.
    pub fn classify(raw: &str) -> Option<ProductFilter> {
        let f = fold(raw);
        let health = health_re().is_match(&f);
        let dental = dental_re().is_match(&f);
        if ambos_re().is_match(&f) || (health && dental) { return Some(ProductFilter::Combined); }
        if dental { return Some(ProductFilter::Dental); }
        if health { return Some(ProductFilter::Health); }
        None
    }

    pub fn label(&self) -> &'static str {
        match self { ProductFilter::Health => "SAÚDE", ProductFilter::Dental => "ODONTO", ProductFilter::Combined => "AMBOS" }
    }
}

impl fmt::Display for ProductFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.label()) }
}

/// Structured form of one free-text lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Query {
    pub ticket_id: Option<String>,
    pub company: Option<String>,
    pub product: Option<ProductFilter>,
    pub history: bool,
    pub since: Option<NaiveDate>,
}

impl Query {
    /// True when nothing would narrow the record set.
    pub fn is_unbounded(&self) -> bool {
        self.ticket_id.is_none() && self.company.is_none() && self.product.is_none() && self.since.is_none()
    }
}

/// Lowercases and strips combining marks, so "Saúde" and "SAUDE" compare equal.
pub fn fold(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).collect::<String>().to_lowercase()
}

fn compile(pattern: &'static str, cell: &'static OnceLock<Regex>) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern"))
}

fn since_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compile(r"(?i)\bdesde\s+(\d{1,2}/\d{1,2}/\d{4})\b", &RE)
}

fn ticket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compile(r"\d{3,}", &RE)
}

fn history_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compile(r"(?i)\bhist(?:[oó]rico)?\b", &RE)
}

fn pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compile(r"(?i)\b(?:sa[uú]de\s*(?:[+/&]|\se\s)\s*odonto\w*|odonto\w*\s*(?:[+/&]|\se\s)\s*sa[uú]de)\b", &RE)
}

fn product_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compile(r"(?i)\b(?:ambos|sa[uú]de|odonto\w*)\b", &RE)
}

// The three below run against folded text.
fn health_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compile(r"\bsaude\b", &RE)
}

fn dental_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compile(r"\bodonto", &RE)
}

fn ambos_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compile(r"\bambos\b", &RE)
}

fn folded_history_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compile(r"\bhist(?:orico)?\b", &RE)
}

const SEPARATORS: &[char] = &['-', ',', ';', ':', '/', '|', '+', '.'];

pub fn parse(text: &str) -> Query {
    let folded = fold(text);
    let history = folded_history_re().is_match(&folded);
    let product = ProductFilter::classify(text);

    let mut since = None;
    if let Some(c) = since_re().captures(text) {
        let raw = &c[1];
        match NaiveDate::parse_from_str(raw, "%d/%m/%Y") {
            Ok(d) => since = Some(d),
            Err(e) => log::debug!("ignoring since-date {}: {}", raw, e),
        }
    }
    let rest = since_re().replace_all(text, " ");

    let ticket_id = ticket_re().find(&rest).map(|m| m.as_str().to_string());

    let company = if ticket_id.is_some() {
        None
    } else {
        let rest = history_re().replace_all(&rest, " ");
        let rest = pair_re().replace_all(&rest, " ");
        let rest = product_word_re().replace_all(&rest, " ");
        let collapsed = rest.split_whitespace().collect::<Vec<_>>().join(" ");
        let trimmed = collapsed.trim_matches(|c: char| c.is_whitespace() || SEPARATORS.contains(&c));
        if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
    };

    let q = Query { ticket_id, company, product, history, since };
    log::debug!("parsed {:?} -> {:?}", text, q);
    q
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_with_history_word() {
        let q = parse("6163 histórico");
        assert_eq!(q.ticket_id.as_deref(), Some("6163"));
        assert!(q.history);
        assert_eq!(q.company, None);
        assert_eq!(q.product, None);
    }

    #[test]
    fn company_with_product() {
        let q = parse("Leadec saúde");
        assert_eq!(q.company.as_deref(), Some("Leadec"));
        assert_eq!(q.product, Some(ProductFilter::Health));
        assert!(!q.history);
        assert_eq!(q.ticket_id, None);
    }

    #[test]
    fn company_with_since_date() {
        let q = parse("Leadec desde 10/01/2026");
        assert_eq!(q.company.as_deref(), Some("Leadec"));
        assert_eq!(q.since, NaiveDate::from_ymd_opt(2026, 1, 10));
        assert_eq!(q.ticket_id, None);
    }

    #[test]
    fn first_digit_run_is_ticket() {
        for (text, want) in [("abc 12 4567 890", "4567"), ("ticket #00123", "00123"), ("999-1000", "999"), ("x1234y5678", "1234")] {
            assert_eq!(parse(text).ticket_id.as_deref(), Some(want), "{}", text);
        }
        assert_eq!(parse("Leadec 12").ticket_id, None);
    }

    #[test]
    fn ticket_excludes_company() {
        let q = parse("Leadec 6163");
        assert_eq!(q.ticket_id.as_deref(), Some("6163"));
        assert_eq!(q.company, None);
    }

    #[test]
    fn invalid_since_is_dropped() {
        let q = parse("Leadec desde 31/02/2026");
        assert_eq!(q.since, None);
        assert_eq!(q.company.as_deref(), Some("Leadec"));
        assert_eq!(q.ticket_id, None);
    }

    #[test]
    fn hist_short_form_and_case() {
        assert!(parse("6163 HIST").history);
        assert!(parse("Leadec Historico").history);
        assert!(!parse("Leadec historia").history);
    }

    #[test]
    fn product_precedence() {
        assert_eq!(parse("Leadec ambos").product, Some(ProductFilter::Combined));
        assert_eq!(parse("Leadec saude + odonto").product, Some(ProductFilter::Combined));
        assert_eq!(parse("Leadec ODONTO").product, Some(ProductFilter::Dental));
        assert_eq!(parse("Leadec SAUDE").product, Some(ProductFilter::Health));
        assert_eq!(parse("Leadec").product, None);
    }

    #[test]
    fn combined_phrase_leaves_clean_company() {
        let q = parse("Grupo Acme - saúde e odonto histórico");
        assert_eq!(q.company.as_deref(), Some("Grupo Acme"));
        assert_eq!(q.product, Some(ProductFilter::Combined));
        assert!(q.history);
    }

    #[test]
    fn keywords_only_has_no_company() {
        let q = parse("odonto desde 01/12/2025");
        assert_eq!(q.company, None);
        assert_eq!(q.product, Some(ProductFilter::Dental));
        assert_eq!(q.since, NaiveDate::from_ymd_opt(2025, 12, 1));
        assert!(!q.is_unbounded());
        assert!(parse("  , histórico ").is_unbounded());
    }

    #[test]
    fn classify_is_exclusive() {
        assert_eq!(ProductFilter::classify("SAÚDE"), Some(ProductFilter::Health));
        assert_eq!(ProductFilter::classify("Odontológico"), Some(ProductFilter::Dental));
        assert_eq!(ProductFilter::classify("Saúde + Odonto"), Some(ProductFilter::Combined));
        assert_eq!(ProductFilter::classify("AMBOS"), Some(ProductFilter::Combined));
        assert_eq!(ProductFilter::classify("Vida"), None);
    }

    #[test]
    fn fold_strips_accents() {
        assert_eq!(fold("SAÚDE Histórico Ação"), "saude historico acao");
    }
}
