use std::io::Read;

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::query::fold;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DemandRecord {
    pub ticket_id: String,
    pub updated_at: Option<NaiveDateTime>,
    pub company: String,
    pub demand: String,
    pub product: String,
    pub author: String,
    pub status: String,
    pub note: String,
}

/// Header names of the sheet. Matched case- and accent-insensitively.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub id: String,
    pub date: String,
    pub company: String,
    pub demand: String,
    pub product: String,
    pub author: String,
    pub status: String,
    pub note: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            id: "ID".to_string(),
            date: "Data".to_string(),
            company: "Empresa".to_string(),
            demand: "Demanda".to_string(),
            product: "Produto".to_string(),
            author: "Autor".to_string(),
            status: "Status".to_string(),
            note: "Atualização".to_string(),
        }
    }
}

struct ColumnIndex {
    id: usize,
    date: usize,
    company: usize,
    demand: Option<usize>,
    product: Option<usize>,
    author: Option<usize>,
    status: Option<usize>,
    note: Option<usize>,
}

impl ColumnIndex {
    fn resolve(headers: &csv::StringRecord, names: &ColumnNames) -> Result<Self> {
        let folded: Vec<String> = headers.iter().map(|h| fold(h.trim())).collect();
        let find = |name: &str| { let n = fold(name.trim()); folded.iter().position(|h| *h == n) };
        let required = |name: &str| find(name).with_context(|| format!("missing required column '{}' (found: {})", name, headers.iter().collect::<Vec<_>>().join(", ")));
        Ok(Self {
            id: required(&names.id)?,
            date: required(&names.date)?,
            company: required(&names.company)?,
            demand: find(&names.demand),
            product: find(&names.product),
            author: find(&names.author),
            status: find(&names.status),
            note: find(&names.note),
        })
    }
}

#[derive(Clone, Debug)]
pub struct Snapshot {
    pub records: Vec<DemandRecord>,
    pub bad_dates: usize,
}

pub fn is_url(source: &str) -> bool {
    let s = source.trim_start().to_ascii_lowercase();
    s.starts_with("http://") || s.starts_with("https://")
}

/// Loads the whole sheet from a local path or an http(s) URL.
pub fn load(source: &str, names: &ColumnNames, progress: bool) -> Result<Snapshot> {
    let pb = if progress { Some(indicatif::ProgressBar::new_spinner()) } else { None };
    if let Some(ref pb) = pb { pb.set_message(format!("Loading {}", source)); pb.enable_steady_tick(std::time::Duration::from_millis(100)); }
    let res = if is_url(source) {
        fetch(source).and_then(|body| read_records(body.as_bytes(), names))
    } else {
        std::fs::File::open(source)
            .with_context(|| format!("cannot open {}", source))
            .and_then(|f| read_records(f, names))
    };
    if let Some(pb) = pb { pb.finish_and_clear(); }
    let snap = res.with_context(|| format!("failed to load records from {}", source))?;
    log::info!("loaded {} records from {}", snap.records.len(), source);
    if snap.bad_dates > 0 { log::warn!("{} records have an unreadable date and will sort last", snap.bad_dates); }
    Ok(snap)
}

fn fetch(url: &str) -> Result<String> {
    log::debug!("GET {}", url);
    let resp = reqwest::blocking::get(url).with_context(|| format!("request to {} failed", url))?;
    let status = resp.status();
    if !status.is_success() { bail!("GET {} returned {}", url, status); }
    resp.text().context("response body was not valid text")
}

pub fn read_records<R: Read>(rdr: R, names: &ColumnNames) -> Result<Snapshot> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(rdr);
    let headers = rdr.headers().context("CSV has no header row")?.clone();
    let idx = ColumnIndex::resolve(&headers, names)?;
    let mut records = Vec::new();
    let mut bad_dates = 0usize;
    for (n, row) in rdr.records().enumerate() {
        let row = row.with_context(|| format!("malformed CSV row {}", n + 2))?;
        let cell = |i: usize| row.get(i).unwrap_or("").trim().to_string();
        let opt = |i: Option<usize>| i.map(cell).unwrap_or_default();
        let ticket_id = normalize_ticket(&cell(idx.id));
        if ticket_id.is_empty() && cell(idx.company).is_empty() { continue; }
        let raw_date = cell(idx.date);
        let updated_at = parse_day_first(&raw_date);
        if updated_at.is_none() && !raw_date.is_empty() { bad_dates += 1; log::debug!("row {}: unreadable date {:?}", n + 2, raw_date); }
        records.push(DemandRecord {
            ticket_id,
            updated_at,
            company: cell(idx.company),
            demand: opt(idx.demand),
            product: opt(idx.product),
            author: opt(idx.author),
            status: opt(idx.status),
            note: opt(idx.note),
        });
    }
    Ok(Snapshot { records, bad_dates })
}

/// Spreadsheet exports sometimes turn integer IDs into floats ("6163.0").
pub fn normalize_ticket(raw: &str) -> String {
    let t = raw.trim();
    match t.strip_suffix(".0") {
        Some(head) if !head.is_empty() && head.chars().all(|c| c.is_ascii_digit()) => head.to_string(),
        _ => t.to_string(),
    }
}

pub fn parse_day_first(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() { return None; }
    for f in ["%d/%m/%Y %H:%M:%S", "%d/%m/%Y %H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, f) { return Some(dt); }
    }
    for f in ["%d/%m/%Y", "%Y-%m-%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, f) { return d.and_hms_opt(0, 0, 0); }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = "ID,Data,Empresa,Demanda,Produto,Autor,Status,Atualização
6163.0,10/01/2026 14:30:00,Leadec,Implantação,SAÚDE,Ana,Em andamento,Contrato enviado
6163,05/01/2026,Leadec,Implantação,SAÚDE,Ana,Aberto,Primeiro contato
7001,not a date,Acme,Cotação,ODONTO,Bruno,Aberto,
,,,,,,,
";

    #[test]
    fn reads_rows_by_header_name() {
        let snap = read_records(SHEET.as_bytes(), &ColumnNames::default()).unwrap();
        assert_eq!(snap.records.len(), 3);
        let r = &snap.records[0];
        assert_eq!(r.ticket_id, "6163");
        assert_eq!(r.company, "Leadec");
        assert_eq!(r.note, "Contrato enviado");
        assert_eq!(r.updated_at, NaiveDate::from_ymd_opt(2026, 1, 10).and_then(|d| d.and_hms_opt(14, 30, 0)));
        assert_eq!(snap.records[2].updated_at, None);
        assert_eq!(snap.bad_dates, 1);
    }

    #[test]
    fn header_match_ignores_case_and_accents() {
        let csv = "id,DATA,empresa,atualizacao\n42000,01/02/2026,Beta,ok\n";
        let snap = read_records(csv.as_bytes(), &ColumnNames::default()).unwrap();
        assert_eq!(snap.records[0].note, "ok");
        assert_eq!(snap.records[0].product, "");
    }

    #[test]
    fn missing_required_column_fails() {
        let csv = "ID,Data\n1,01/01/2026\n";
        let err = read_records(csv.as_bytes(), &ColumnNames::default()).unwrap_err();
        assert!(err.to_string().contains("Empresa"));
    }

    #[test]
    fn custom_column_names() {
        let names = ColumnNames { id: "Ticket".to_string(), date: "Quando".to_string(), company: "Cliente".to_string(), ..Default::default() };
        let csv = "Ticket,Quando,Cliente\n555,02/03/2026,Gamma\n";
        let snap = read_records(csv.as_bytes(), &names).unwrap();
        assert_eq!(snap.records[0].ticket_id, "555");
        assert_eq!(snap.records[0].company, "Gamma");
    }

    #[test]
    fn day_first_dates() {
        let d = parse_day_first("03/04/2026").unwrap();
        assert_eq!(d.date(), NaiveDate::from_ymd_opt(2026, 4, 3).unwrap());
        assert!(parse_day_first("2026-04-03 08:00:00").is_some());
        assert!(parse_day_first("32/01/2026").is_none());
        assert!(parse_day_first("").is_none());
    }

    #[test]
    fn ticket_normalization() {
        assert_eq!(normalize_ticket(" 6163.0 "), "6163");
        assert_eq!(normalize_ticket("6163"), "6163");
        assert_eq!(normalize_ticket("A.0"), "A.0");
    }

    #[test]
    fn loads_from_file_and_reports_missing() {
        let p = std::env::temp_dir().join("lara_source_test.csv");
        std::fs::write(&p, SHEET).unwrap();
        let snap = load(&p.to_string_lossy(), &ColumnNames::default(), false).unwrap();
        assert_eq!(snap.records.len(), 3);
        let _ = std::fs::remove_file(&p);
        assert!(load("/nonexistent/lara.csv", &ColumnNames::default(), false).is_err());
        assert!(is_url("https://docs.google.com/spreadsheets/d/e/x/pub?output=csv"));
        assert!(!is_url("data/sheet.csv"));
    }
}
