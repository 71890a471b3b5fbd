use crate::export::{fmt_time, spans_tickets};
use crate::filter::Lookup;
use crate::query::Query;
use crate::source::DemandRecord;

fn cell(s: &str) -> String {
    if s.is_empty() { return "-".to_string(); }
    s.replace('|', "\\|").replace('\n', "<br>")
}

pub fn describe_query(q: &Query) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(id) = q.ticket_id.as_ref() { parts.push(format!("ID {}", id)); }
    if let Some(c) = q.company.as_ref() { parts.push(format!("empresa \"{}\"", c)); }
    if let Some(p) = q.product { parts.push(format!("produto {}", p)); }
    if let Some(d) = q.since { parts.push(format!("desde {}", d.format("%d/%m/%Y"))); }
    if q.history { parts.push("histórico".to_string()); }
    if parts.is_empty() { "(vazia)".to_string() } else { parts.join(", ") }
}

pub fn summary_fields(r: &DemandRecord, tfmt: Option<&str>) -> Vec<(&'static str, String)> {
    vec![
        ("ID", r.ticket_id.clone()),
        ("Última atualização", fmt_time(r.updated_at, tfmt)),
        ("Empresa", r.company.clone()),
        ("Demanda", r.demand.clone()),
        ("Produto", r.product.clone()),
        ("Autor", r.author.clone()),
        ("Status", r.status.clone()),
        ("Atualização", r.note.clone()),
    ]
}

pub fn render_markdown(q: &Query, res: &Lookup, tfmt: Option<&str>) -> String {
    let mut s = String::new();
    s.push_str("# Consulta de demandas\n\n");
    s.push_str(&format!("Consulta: {}\n\n", describe_query(q)));
    match res {
        Lookup::NotFound => s.push_str("Nenhum registro encontrado.\n"),
        Lookup::Latest(r) => {
            s.push_str("## Último registro\n\n");
            for (k, v) in summary_fields(r, tfmt) { s.push_str(&format!("- **{}**: {}\n", k, cell(&v))); }
        }
        Lookup::History(rows) => {
            s.push_str(&format!("## Histórico ({} registros)\n\n", rows.len()));
            let wide = spans_tickets(rows);
            if wide { s.push_str("| ID | Empresa | Data | Status | Produto | Autor | Atualização |\n|---|---|---|---|---|---|---|\n"); } else { s.push_str("| Data | Status | Produto | Autor | Atualização |\n|---|---|---|---|---|\n"); }
            for r in rows {
                let tail = format!("{} | {} | {} | {} | {} |", fmt_time(r.updated_at, tfmt), cell(&r.status), cell(&r.product), cell(&r.author), cell(&r.note));
                if wide { s.push_str(&format!("| {} | {} | {}\n", cell(&r.ticket_id), cell(&r.company), tail)); } else { s.push_str(&format!("| {}\n", tail)); }
            }
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::lookup;
    use crate::query::parse;
    use crate::source::read_records;

    const SHEET: &str = "ID,Data,Empresa,Demanda,Produto,Autor,Status,Atualização
6163,10/01/2026 14:30,Leadec,Implantação,SAÚDE,Ana,Em andamento,Contrato | anexo
6163,05/01/2026,Leadec,Implantação,SAÚDE,Ana,Aberto,
6200,07/01/2026,Leadec Brasil,Cotação,ODONTO,Bruno,Aberto,Aguardando
";

    fn records() -> Vec<DemandRecord> { read_records(SHEET.as_bytes(), &Default::default()).unwrap().records }

    #[test]
    fn latest_renders_key_values() {
        let recs = records();
        let q = parse("6163");
        let md = render_markdown(&q, &lookup(&recs, &q), None);
        assert!(md.contains("Consulta: ID 6163"));
        assert!(md.contains("- **Status**: Em andamento"));
        assert!(md.contains("- **Última atualização**: 10/01/2026 14:30"));
        assert!(md.contains("Contrato \\| anexo"));
    }

    #[test]
    fn history_table_narrow_for_one_ticket() {
        let recs = records();
        let q = parse("6163 histórico");
        let md = render_markdown(&q, &lookup(&recs, &q), None);
        assert!(md.contains("## Histórico (2 registros)"));
        assert!(md.contains("| Data | Status | Produto | Autor | Atualização |"));
        assert!(md.contains("| 05/01/2026 00:00 | Aberto | SAÚDE | Ana | - |"));
    }

    #[test]
    fn history_table_wide_across_tickets() {
        let recs = records();
        let q = parse("leadec hist");
        let md = render_markdown(&q, &lookup(&recs, &q), Some("%Y-%m-%d"));
        assert!(md.contains("| ID | Empresa |"));
        assert!(md.contains("| 6200 | Leadec Brasil | 2026-01-07 |"));
    }

    #[test]
    fn not_found_message() {
        let q = parse("Ninguém odonto");
        let md = render_markdown(&q, &Lookup::NotFound, None);
        assert!(md.contains("empresa \"Ninguém\", produto ODONTO"));
        assert!(md.contains("Nenhum registro encontrado."));
    }
}
