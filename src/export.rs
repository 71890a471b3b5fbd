use chrono::NaiveDateTime;
use chrono::format::{Item, StrftimeItems};
use serde::Serialize;

use crate::filter::Lookup;
use crate::query::Query;
use crate::source::DemandRecord;

pub const DEFAULT_TIME_FORMAT: &str = "%d/%m/%Y %H:%M";

pub fn fmt_time(t: Option<NaiveDateTime>, tfmt: Option<&str>) -> String {
    let f = match tfmt { Some(f) if !StrftimeItems::new(f).any(|i| matches!(i, Item::Error)) => f, _ => DEFAULT_TIME_FORMAT };
    match t { Some(t) => t.format(f).to_string(), None => "-".to_string() }
}

/// History tables carry ID and company only when more than one ticket is shown.
pub fn spans_tickets(rows: &[&DemandRecord]) -> bool {
    rows.first().is_some_and(|f| rows.iter().any(|r| r.ticket_id != f.ticket_id))
}

pub fn write_csv(path: &str, rows: &[&DemandRecord], tfmt: Option<&str>) -> Result<(), std::io::Error> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["id", "date", "company", "demand", "product", "author", "status", "note"])?;
    for r in rows {
        let ts = fmt_time(r.updated_at, tfmt);
        wtr.write_record([r.ticket_id.as_str(), ts.as_str(), r.company.as_str(), r.demand.as_str(), r.product.as_str(), r.author.as_str(), r.status.as_str(), r.note.as_str()])?;
    }
    wtr.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct JsonResult<'a> {
    query: &'a Query,
    found: bool,
    count: usize,
    records: Vec<&'a DemandRecord>,
}

pub fn to_json(q: &Query, res: &Lookup) -> serde_json::Result<String> {
    let records = match res { Lookup::NotFound => vec![], Lookup::Latest(r) => vec![*r], Lookup::History(v) => v.clone() };
    serde_json::to_string_pretty(&JsonResult { query: q, found: !res.is_empty(), count: records.len(), records })
}
