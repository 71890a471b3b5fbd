use std::io::{BufRead, Write};
use std::sync::OnceLock;
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum, ColorChoice, ArgAction, CommandFactory};
use clap_complete::Shell;
use comfy_table::{Table, ContentArrangement};
use serde::{Deserialize, Serialize};
use is_terminal::IsTerminal;
mod query;
mod source;
mod filter;
mod export;
mod markdown;

use crate::filter::Lookup;
use crate::query::Query;
use crate::source::{ColumnNames, Snapshot};

static ENABLE_COLOR: OnceLock<bool> = OnceLock::new();

const DEFAULT_CONFIG: &str = "lara.toml";

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OutputFmt { Text, Json, Markdown }

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TextFormat { Lines, Table }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
enum LogLevel { Error, Warn, Info, Debug, Trace }

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LogFormat { Text, Json }

#[derive(Parser, Debug)]
#[command(
    name = "lara",
    about = "Placement demand lookup over a spreadsheet log",
    long_about = "Looks up placement demands in a CSV-published spreadsheet by ticket ID, company name, product (saúde/odonto/ambos) or date, showing the latest record or the full history.",
    after_long_help = "Examples:\n  lara --source demandas.csv 6163\n  lara --source demandas.csv \"6163 histórico\"\n  lara \"Leadec saúde\"\n  lara \"Leadec desde 10/01/2026\" --output markdown\n  lara --interactive",
    color = ColorChoice::Auto
)]
struct Args {
    /// Free-text query, e.g. "6163 histórico" or "Leadec desde 10/01/2026"
    #[arg(num_args = 0..)]
    query: Vec<String>,
    /// CSV path or http(s) URL of the published sheet (env LARA_SOURCE)
    #[arg(long, short = 's')]
    source: Option<String>,
    #[arg(long, short = 'i', default_value_t = false)]
    interactive: bool,
    #[arg(long, short = 'o', value_enum, default_value = "text")]
    output: OutputFmt,
    #[arg(long, value_enum, default_value = "lines")]
    text_format: TextFormat,
    #[arg(long)]
    time_format: Option<String>,
    /// Export every matched row (not just the latest) as CSV
    #[arg(long)]
    csv_path: Option<String>,
    #[arg(long)]
    md_path: Option<String>,
    #[arg(long, short = 'C', default_value_t = false)]
    no_color: bool,
    #[arg(long, default_value_t = false)]
    force_color: bool,
    #[arg(long)]
    log_level: Option<LogLevel>,
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
    #[arg(long)]
    log_path: Option<String>,
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
    #[arg(short = 'q', long, default_value_t = false)]
    quiet: bool,
    #[arg(long, default_value_t = false)]
    progress: bool,
    #[arg(long, value_enum)]
    completions: Option<Shell>,
    #[arg(long)]
    completions_out: Option<String>,
    #[arg(long)]
    config: Option<String>,
    #[arg(skip)]
    columns: ColumnNames,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            query: vec![],
            source: None,
            interactive: false,
            output: OutputFmt::Text,
            text_format: TextFormat::Lines,
            time_format: None,
            csv_path: None,
            md_path: None,
            no_color: false,
            force_color: false,
            log_level: None,
            log_format: None,
            log_path: None,
            verbose: 0,
            quiet: false,
            progress: false,
            completions: None,
            completions_out: None,
            config: None,
            columns: ColumnNames::default(),
        }
    }
}

#[derive(Deserialize, Default)]
struct AppConfig {
    source: Option<String>,
    output: Option<OutputFmt>,
    text_format: Option<TextFormat>,
    time_format: Option<String>,
    no_color: Option<bool>,
    force_color: Option<bool>,
    log_format: Option<LogFormat>,
    log_path: Option<String>,
    csv_path: Option<String>,
    md_path: Option<String>,
    progress: Option<bool>,
    columns: Option<ColumnNames>,
}

fn main() {
    let mut args = Args::parse();
    if let Some(sh) = args.completions {
        let mut cmd = Args::command();
        if let Some(path) = args.completions_out.as_ref() {
            if let Ok(mut f) = std::fs::File::create(path) { clap_complete::generate(sh, &mut cmd, "lara", &mut f); } else { clap_complete::generate(sh, &mut cmd, "lara", &mut std::io::stdout()); }
        } else {
            clap_complete::generate(sh, &mut cmd, "lara", &mut std::io::stdout());
        }
        return;
    }
    // Explicit --config must parse; the default file is best-effort.
    let cfg = match args.config.as_ref() {
        Some(p) => load_config(p).map(Some),
        None if std::path::Path::new(DEFAULT_CONFIG).exists() => load_config(DEFAULT_CONFIG).map(Some),
        None => Ok(None),
    };
    let cfg_err = match cfg { Ok(Some(c)) => { apply_config(&mut args, c); None } Ok(None) => None, Err(e) => Some(e) };
    init_logging(&args);
    if let Some(e) = cfg_err {
        if args.config.is_some() { log::error!("{:#}", e); std::process::exit(2); }
        log::warn!("ignoring {}: {:#}", DEFAULT_CONFIG, e);
    }
    let term = std::env::var("TERM").unwrap_or_default();
    let no_color_env = std::env::var_os("NO_COLOR").is_some();
    let color_default = std::io::stdout().is_terminal() && !no_color_env && term != "dumb";
    let enable_color = if args.force_color { true } else { color_default && !args.no_color };
    let _ = ENABLE_COLOR.set(enable_color);
    if let Err(e) = run(&args) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn load_config(path: &str) -> Result<AppConfig> {
    let s = std::fs::read_to_string(path).with_context(|| format!("cannot read config {}", path))?;
    toml::from_str::<AppConfig>(&s).with_context(|| format!("invalid config {}", path))
}

fn apply_config(args: &mut Args, cfg: AppConfig) {
    if args.source.is_none() && let Some(v) = cfg.source { args.source = Some(v); }
    if args.output == OutputFmt::Text && let Some(v) = cfg.output { args.output = v; }
    if args.text_format == TextFormat::Lines && let Some(v) = cfg.text_format { args.text_format = v; }
    if args.time_format.is_none() && let Some(v) = cfg.time_format { args.time_format = Some(v); }
    if !args.no_color && let Some(v) = cfg.no_color { args.no_color = v; }
    if !args.force_color && let Some(v) = cfg.force_color { args.force_color = v; }
    if args.log_format.is_none() && let Some(v) = cfg.log_format { args.log_format = Some(v); }
    if args.log_path.is_none() && let Some(v) = cfg.log_path { args.log_path = Some(v); }
    if args.csv_path.is_none() && let Some(v) = cfg.csv_path { args.csv_path = Some(v); }
    if args.md_path.is_none() && let Some(v) = cfg.md_path { args.md_path = Some(v); }
    if !args.progress && let Some(v) = cfg.progress { args.progress = v; }
    if let Some(v) = cfg.columns { args.columns = v; }
}

fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
    if args.quiet {
        builder.filter_level(log::LevelFilter::Error);
    } else if let Some(lvl) = args.log_level {
        let f = match lvl { LogLevel::Error => log::LevelFilter::Error, LogLevel::Warn => log::LevelFilter::Warn, LogLevel::Info => log::LevelFilter::Info, LogLevel::Debug => log::LevelFilter::Debug, LogLevel::Trace => log::LevelFilter::Trace };
        builder.filter_level(f);
    } else if args.verbose > 0 {
        let f = if args.verbose >= 3 { log::LevelFilter::Trace } else if args.verbose == 2 { log::LevelFilter::Debug } else { log::LevelFilter::Info };
        builder.filter_level(f);
    }
    if let Some(fmt) = args.log_format {
        match fmt {
            LogFormat::Json => {
                builder.format(|buf, record| {
                    let ts = chrono::Local::now().to_rfc3339();
                    let obj = serde_json::json!({
                        "ts": ts,
                        "level": record.level().to_string(),
                        "target": record.target(),
                        "msg": record.args().to_string(),
                    });
                    writeln!(buf, "{}", obj)
                });
            }
            LogFormat::Text => {
                builder.format(|buf, record| {
                    let ts = chrono::Local::now().format("%H:%M:%S");
                    writeln!(buf, "[{:<5} {}] {}", record.level(), ts, record.args())
                });
            }
        }
    }
    if let Some(path) = args.log_path.as_ref() {
        match std::fs::File::create(path) {
            Ok(f) => { builder.target(env_logger::Target::Pipe(Box::new(f))); }
            Err(e) => { eprintln!("Failed to open log file {}: {}", path, e); }
        }
    }
    builder.init();
}

fn resolve_source(args: &Args) -> Result<String> {
    args.source.clone()
        .or_else(|| std::env::var("LARA_SOURCE").ok().filter(|s| !s.trim().is_empty()))
        .context("no data source: pass --source <path|url>, set LARA_SOURCE, or add `source` to lara.toml")
}

fn run(args: &Args) -> Result<()> {
    let src = resolve_source(args)?;
    let mut snap = source::load(&src, &args.columns, args.progress)?;
    let text = args.query.join(" ");
    let interactive = args.interactive || (text.trim().is_empty() && std::io::stdin().is_terminal());
    if !interactive {
        answer(&snap, &text, args);
        return Ok(());
    }
    if !args.quiet { println!("{}", paint("Consulta por ID, empresa, produto (saúde/odonto/ambos), \"desde DD/MM/AAAA\" ou \"histórico\". :reload recarrega, :q sai.", "1;36")); }
    let stdin = std::io::stdin();
    loop {
        print!("{} ", paint("lara>", "1"));
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).context("failed to read from stdin")? == 0 { break; }
        let line = line.trim();
        match line {
            "" => continue,
            ":q" | ":quit" | ":exit" => break,
            ":reload" => match source::load(&src, &args.columns, args.progress) {
                Ok(s) => { snap = s; println!("{}", paint(&format!("{} registros carregados.", snap.records.len()), "1;36")); }
                Err(e) => log::warn!("reload failed, keeping previous data: {:#}", e),
            },
            q => answer(&snap, q, args),
        }
    }
    Ok(())
}

fn answer(snap: &Snapshot, text: &str, args: &Args) {
    let q = query::parse(text);
    if q.is_unbounded() {
        println!("{}", paint("Informe um ID (3+ dígitos), parte do nome da empresa, um produto ou \"desde DD/MM/AAAA\".", "33"));
        return;
    }
    let res = filter::lookup(&snap.records, &q);
    log::info!("query {:?}: {} result(s)", text, res.len());
    let tfmt = args.time_format.as_deref();
    match args.output {
        OutputFmt::Text => match args.text_format {
            TextFormat::Lines => print!("{}", render_lines(&q, &res, tfmt)),
            TextFormat::Table => print!("{}", render_table(&q, &res, tfmt)),
        },
        OutputFmt::Json => match export::to_json(&q, &res) {
            Ok(s) => println!("{}", s),
            Err(e) => log::error!("JSON encoding failed: {}", e),
        },
        OutputFmt::Markdown => print!("{}", markdown::render_markdown(&q, &res, tfmt)),
    }
    if let Some(p) = args.csv_path.as_ref() {
        let rows = filter::filter(&snap.records, &q);
        if let Err(e) = export::write_csv(p, &rows, tfmt) { log::error!("CSV write failed for {}: {}", p, e); } else if !args.quiet { eprintln!("{}", paint(&format!("CSV written: {} ({} rows)", p, rows.len()), "1;36")); }
    }
    if let Some(p) = args.md_path.as_ref() {
        let md = markdown::render_markdown(&q, &res, tfmt);
        match std::fs::write(p, md) {
            Ok(_) => { if !args.quiet { eprintln!("{}", paint(&format!("Markdown written: {}", p), "1;36")); } }
            Err(e) => { log::error!("Markdown write failed for {}: {}", p, e); }
        }
    }
}

const NOT_FOUND: &str = "Nenhum registro encontrado para essa consulta.";

fn render_lines(q: &Query, res: &Lookup, tfmt: Option<&str>) -> String {
    let mut s = String::new();
    match res {
        Lookup::NotFound => {
            s.push_str(&paint(NOT_FOUND, "33"));
            s.push('\n');
            s.push_str(&paint(&format!("Consulta: {}", markdown::describe_query(q)), "2"));
            s.push('\n');
        }
        Lookup::Latest(r) => {
            for (k, v) in markdown::summary_fields(r, tfmt) {
                s.push_str(&format!("{} {}\n", paint(&format!("{:<19}", format!("{}:", k)), "1"), if v.is_empty() { "-".to_string() } else { v.replace('\n', " ") }));
            }
        }
        Lookup::History(rows) => {
            s.push_str(&paint(&format!("Histórico: {} registros", rows.len()), "1;36"));
            s.push('\n');
            let wide = export::spans_tickets(rows);
            for r in rows {
                let when = export::fmt_time(r.updated_at, tfmt);
                let head = if wide { format!("{} {} {} ", when, r.ticket_id, truncate(&r.company, 24)) } else { format!("{} ", when) };
                s.push_str(&format!("{}{} [{}] {}: {}\n", head, paint(&r.status, status_code(&r.status)), r.product, r.author, r.note.replace('\n', " ")));
            }
        }
    }
    s
}

fn render_table(q: &Query, res: &Lookup, tfmt: Option<&str>) -> String {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    match res {
        Lookup::NotFound => return render_lines(q, res, tfmt),
        Lookup::Latest(r) => {
            table.set_header(vec![paint("Campo", "1"), paint("Valor", "1")]);
            for (k, v) in markdown::summary_fields(r, tfmt) { table.add_row(vec![k.to_string(), v]); }
        }
        Lookup::History(rows) => {
            let wide = export::spans_tickets(rows);
            let mut hdr: Vec<String> = Vec::new();
            if wide { hdr.push(paint("ID", "1")); hdr.push(paint("Empresa", "1")); }
            for h in ["Data", "Status", "Produto", "Autor", "Atualização"] { hdr.push(paint(h, "1")); }
            table.set_header(hdr);
            for r in rows {
                let mut row: Vec<String> = Vec::new();
                if wide { row.push(r.ticket_id.clone()); row.push(r.company.clone()); }
                row.push(export::fmt_time(r.updated_at, tfmt));
                row.push(paint(&r.status, status_code(&r.status)));
                row.push(r.product.clone());
                row.push(r.author.clone());
                row.push(r.note.clone());
                table.add_row(row);
            }
        }
    }
    format!("{}\n", table)
}

fn status_code(status: &str) -> &'static str {
    let f = query::fold(status);
    if f.contains("conclu") || f.contains("fechad") || f.contains("implantad") { "32" }
    else if f.contains("cancel") || f.contains("perdid") { "31" }
    else { "33" }
}

fn truncate(s: &str, n: usize) -> String {
    let mut out: String = s.chars().take(n).collect();
    if s.chars().count() > n { out.push_str("..."); }
    out
}

fn paint(s: &str, code: &str) -> String {
    if *ENABLE_COLOR.get().unwrap_or(&false) { format!("\x1b[{}m{}\x1b[0m", code, s) } else { s.to_string() }
}
