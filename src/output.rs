//! Human-readable and JSON output for the CLI: sizes, speeds, record tables.

use comfy_table::{presets, Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use console::style;
use serde::Serialize;

use depot_core_manifest::ContentRecord;

/// Output mode for CLI results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

/// One record as printed by `list` and `diff`
#[derive(Debug, Serialize)]
pub struct RecordLine<'a> {
    pub name: &'a str,
    pub length: u64,
    pub hash: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

/// Output writer that supports both human-readable and JSON Lines output
#[derive(Debug, Clone)]
pub struct OutputWriter {
    pub mode: OutputMode,
}

impl OutputWriter {
    pub fn new(json: bool) -> Self {
        Self {
            mode: if json { OutputMode::Json } else { OutputMode::Human },
        }
    }

    pub fn is_json(&self) -> bool {
        self.mode == OutputMode::Json
    }

    /// Print records, with offsets when known
    pub fn records<'a, I>(&self, rows: I)
    where
        I: IntoIterator<Item = (&'a ContentRecord, Option<u64>)>,
    {
        let lines: Vec<RecordLine<'a>> = rows
            .into_iter()
            .map(|(record, offset)| RecordLine {
                name: &record.name,
                length: record.length,
                hash: &record.hash,
                offset,
            })
            .collect();

        match self.mode {
            OutputMode::Json => {
                for line in &lines {
                    if let Ok(json) = serde_json::to_string(line) {
                        println!("{}", json);
                    }
                }
            }
            OutputMode::Human => println!("{}", record_table(&lines)),
        }
    }

    pub fn success(&self, msg: &str) {
        if !self.is_json() {
            println!("{} {}", style("✓").green(), style(msg).green());
        }
    }

    pub fn info(&self, msg: &str) {
        if !self.is_json() {
            println!("{} {}", style("ℹ").cyan(), msg);
        }
    }

    pub fn warning(&self, msg: &str) {
        if !self.is_json() {
            eprintln!("{} {}", style("⚠").yellow(), style(msg).yellow());
        }
    }

    pub fn error(&self, msg: &str) {
        match self.mode {
            OutputMode::Json => {
                let line = serde_json::json!({ "error": sanitize_error(msg) });
                eprintln!("{}", line);
            }
            OutputMode::Human => {
                eprintln!("{} {}", style("✗").red(), style(sanitize_error(msg)).red());
            }
        }
    }
}

/// Table with name, length, hash and (when any row has one) offset columns
pub fn record_table(lines: &[RecordLine<'_>]) -> Table {
    let with_offsets = lines.iter().any(|l| l.offset.is_some());

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let mut header = vec![
        Cell::new("Name").add_attribute(Attribute::Bold).fg(Color::Cyan),
        Cell::new("Length").add_attribute(Attribute::Bold).fg(Color::Cyan),
        Cell::new("Hash").add_attribute(Attribute::Bold).fg(Color::Cyan),
    ];
    if with_offsets {
        header.push(Cell::new("Offset").add_attribute(Attribute::Bold).fg(Color::Cyan));
    }
    table.set_header(header);

    for line in lines {
        let mut row = vec![
            Cell::new(line.name),
            Cell::new(format_bytes(line.length)).set_alignment(CellAlignment::Right),
            Cell::new(line.hash).fg(Color::DarkGrey),
        ];
        if with_offsets {
            row.push(
                Cell::new(line.offset.map(|o| o.to_string()).unwrap_or_default())
                    .set_alignment(CellAlignment::Right),
            );
        }
        table.add_row(row);
    }
    table
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f = bytes as f64;
    let base = 1024.0_f64;
    let exp = (bytes_f.ln() / base.ln()).floor() as usize;
    let exp = exp.min(UNITS.len() - 1);

    let value = bytes_f / base.powi(exp as i32);

    if exp == 0 {
        format!("{} {}", bytes, UNITS[exp])
    } else {
        format!("{:.2} {}", value, UNITS[exp])
    }
}

/// Format a transfer rate in bytes per second
pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

/// Sanitize error messages by collapsing whitespace
pub fn sanitize_error(msg: &str) -> String {
    msg.split_whitespace().collect::<Vec<&str>>().join(" ")
}
