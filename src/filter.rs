use std::cmp::Ordering;

use crate::query::{ProductFilter, Query};
use crate::source::DemandRecord;

#[derive(Clone, Debug, PartialEq)]
pub enum Lookup<'a> {
    NotFound,
    Latest(&'a DemandRecord),
    History(Vec<&'a DemandRecord>),
}

impl Lookup<'_> {
    pub fn len(&self) -> usize {
        match self { Lookup::NotFound => 0, Lookup::Latest(_) => 1, Lookup::History(v) => v.len() }
    }

    pub fn is_empty(&self) -> bool { matches!(self, Lookup::NotFound) }
}

pub fn matches(r: &DemandRecord, q: &Query) -> bool {
    if let Some(id) = q.ticket_id.as_ref() {
        if r.ticket_id != *id { return false; }
    } else if let Some(c) = q.company.as_ref() && !r.company.to_lowercase().contains(&c.to_lowercase()) {
        return false;
    }
    if let Some(p) = q.product && ProductFilter::classify(&r.product) != Some(p) { return false; }
    if let Some(since) = q.since {
        match r.updated_at { Some(t) if t.date() >= since => {}, _ => return false }
    }
    true
}

/// Most recent first; undated rows last. Stable, so sheet order breaks ties.
fn newest_first(a: &DemandRecord, b: &DemandRecord) -> Ordering {
    match (a.updated_at, b.updated_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn filter<'a>(records: &'a [DemandRecord], q: &Query) -> Vec<&'a DemandRecord> {
    let mut out: Vec<&DemandRecord> = records.iter().filter(|r| matches(r, q)).collect();
    out.sort_by(|a, b| newest_first(a, b));
    log::debug!("{} of {} records match", out.len(), records.len());
    out
}

pub fn lookup<'a>(records: &'a [DemandRecord], q: &Query) -> Lookup<'a> {
    let rows = filter(records, q);
    if rows.is_empty() { Lookup::NotFound } else if q.history { Lookup::History(rows) } else { Lookup::Latest(rows[0]) }
}
