// Reporting and output for Aperture
// Supports the HTTP-exchange text log, JSON Lines and CSV, plus a console summary

use crate::error::ReportError;
use crate::models::Exchange;
use crate::runner::{ResultRecord, ScanReport};
use crate::verdict::Verdict;
use reqwest::StatusCode;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use url::Url;

const SEPARATOR: &str = "==============================";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    Jsonl,
    Csv,
}

impl ReportFormat {
    pub fn parse(name: &str) -> Option<ReportFormat> {
        match name.to_ascii_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "jsonl" => Some(ReportFormat::Jsonl),
            "csv" => Some(ReportFormat::Csv),
            _ => None,
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::Text => write!(f, "text"),
            ReportFormat::Jsonl => write!(f, "jsonl"),
            ReportFormat::Csv => write!(f, "csv"),
        }
    }
}

/// Escape CSV field to prevent formula injection attacks
/// Cells starting with =, +, -, @, or tab are prefixed with single quote.
/// The lone `-` placeholder is left as is.
pub fn escape_csv_field(field: &str) -> String {
    let Some(first_char) = field.chars().next() else {
        return String::new();
    };
    let needs_escaping = field != "-" && matches!(first_char, '=' | '+' | '-' | '@' | '\t');

    if needs_escaping {
        format!("\"'{}\"", field.replace('"', "\"\""))
    } else if field.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Write records in the chosen format to `path`.
pub fn write_report(
    path: &Path,
    format: ReportFormat,
    records: &[ResultRecord],
    base_url: &str,
) -> Result<(), ReportError> {
    let mut out = BufWriter::new(File::create(path)?);
    match format {
        ReportFormat::Text => write_text(&mut out, records, base_url)?,
        ReportFormat::Jsonl => write_jsonl(&mut out, records)?,
        ReportFormat::Csv => write_csv(&mut out, records)?,
    }
    out.flush()?;
    Ok(())
}

/// Human-readable log of raw HTTP exchanges.
pub fn write_text<W: Write>(
    w: &mut W,
    records: &[ResultRecord],
    base_url: &str,
) -> Result<(), ReportError> {
    let base = base_url.trim_end_matches('/');
    for record in records {
        if record.verdict == Verdict::Skipped {
            let reason = record
                .skipped_reason
                .as_deref()
                .or(record.notes.first().map(String::as_str))
                .unwrap_or_default()
                .trim();
            writeln!(w, "{}", SEPARATOR)?;
            writeln!(w, "Request:\n--\n")?;
            writeln!(w, "{}{} - skipped - {}\n", base, record.endpoint, reason)?;
            writeln!(w, "{}", SEPARATOR)?;
            continue;
        }

        for exchange in [&record.control, &record.test].into_iter().flatten() {
            writeln!(w, "{}", SEPARATOR)?;
            write_exchange(w, exchange)?;
            writeln!(w, "{}", SEPARATOR)?;
        }
        write!(w, "Result: {} {} {}", record.verdict, record.method, record.endpoint)?;
        if let (Some(creds), Some(object)) = (&record.attacker, &record.owner) {
            write!(w, " (creds={}, object={})", creds, object)?;
        }
        writeln!(w)?;
        for note in &record.notes {
            writeln!(w, "Note: {}", note)?;
        }
        writeln!(w)?;
    }
    Ok(())
}

fn write_exchange<W: Write>(w: &mut W, exchange: &Exchange) -> Result<(), ReportError> {
    let request = &exchange.request;
    writeln!(w, "Request:\n--\n")?;

    let (target, host) = match Url::parse(&request.url) {
        Ok(url) => {
            let mut target = url.path().to_string();
            if let Some(query) = url.query() {
                target.push('?');
                target.push_str(query);
            }
            let host = match (url.host_str(), url.port()) {
                (Some(h), Some(p)) => format!("{}:{}", h, p),
                (Some(h), None) => h.to_string(),
                _ => String::new(),
            };
            (target, host)
        }
        Err(_) => (request.url.clone(), String::new()),
    };
    writeln!(w, "{} {} HTTP/1.1", request.method.to_uppercase(), target)?;
    writeln!(w, "Host: {}", host)?;
    for (name, value) in &request.headers {
        writeln!(w, "{}: {}", name, value)?;
    }
    let content_length = match &request.body {
        Some(body) => serde_json::to_vec(body)?.len(),
        None => 0,
    };
    writeln!(w, "Content-Length: {}\n", content_length)?;
    if let Some(body) = &request.body {
        writeln!(w, "{}\n", serde_json::to_string_pretty(body)?)?;
    }

    let response = &exchange.response;
    writeln!(w, "Response:\n--")?;
    let reason = StatusCode::from_u16(response.status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("");
    writeln!(w, "HTTP/1.1 {} {}", response.status, reason)?;
    for (name, value) in &response.headers {
        writeln!(w, "{}: {}", name, value)?;
    }
    writeln!(w)?;
    let body = response.body.trim();
    if !body.is_empty() {
        writeln!(w, "{}", body)?;
    }
    writeln!(w)?;
    Ok(())
}

/// One JSON object per record.
pub fn write_jsonl<W: Write>(w: &mut W, records: &[ResultRecord]) -> Result<(), ReportError> {
    for record in records {
        serde_json::to_writer(&mut *w, record)?;
        writeln!(w)?;
    }
    Ok(())
}

pub fn write_csv<W: Write>(w: &mut W, records: &[ResultRecord]) -> Result<(), ReportError> {
    writeln!(w, "Endpoint,Method,Result,Creds,Object,Notes")?;
    for record in records {
        let notes = match &record.skipped_reason {
            Some(reason) => std::iter::once(reason.as_str())
                .chain(record.notes.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join("; "),
            None => record.notes.join("; "),
        };
        writeln!(
            w,
            "{},{},{},{},{},{}",
            escape_csv_field(&record.endpoint),
            escape_csv_field(&record.method),
            escape_csv_field(&record.verdict.to_string()),
            escape_csv_field(record.attacker.as_deref().unwrap_or_default()),
            escape_csv_field(record.owner.as_deref().unwrap_or_default()),
            escape_csv_field(&notes)
        )?;
    }
    Ok(())
}

/// Console summary: every finding, then counts per verdict.
pub fn render_summary(report: &ScanReport) -> String {
    let mut out = String::new();
    for record in report.findings() {
        out.push_str(&format!("[IDOR FOUND] {} {}\n", record.method, record.endpoint));
        out.push_str(&format!(
            "  creds={}, object={}\n",
            record.attacker.as_deref().unwrap_or("-"),
            record.owner.as_deref().unwrap_or("-")
        ));
    }
    let counts: Vec<String> = Verdict::ALL
        .iter()
        .map(|v| format!("{}={}", v, report.count(*v)))
        .collect();
    out.push_str(&format!("Results: {}\n", counts.join(" ")));
    if report.cancelled {
        out.push_str("Scan interrupted; results are partial.\n");
    }
    out.push_str(&format!(
        "Completed. {} pairs tested, {} potential IDOR findings.\n",
        report.tested_pairs,
        report.count(Verdict::IdorFound)
    ));
    out
}
