//! CLI Output Formatting.
//!
//! Handles output formatting for different formats (text, JSON, minimal).

use console::style;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT FORMAT
// ═══════════════════════════════════════════════════════════════════════════════

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format
    Json,
    /// Pretty JSON format
    JsonPretty,
    /// Minimal format (values only)
    Minimal,
}

impl OutputFormat {
    /// Check if this is a JSON format
    pub fn is_json(&self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::JsonPretty)
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Ok(OutputFormat::JsonPretty),
            "minimal" | "min" => Ok(OutputFormat::Minimal),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTPUT FORMATTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Output formatter for CLI
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    /// Output format
    format: OutputFormat,
    /// Color enabled
    color: bool,
}

impl Default for OutputFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::default())
    }
}

impl OutputFormatter {
    /// Create new formatter, colored when the terminal supports it
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            color: console::colors_enabled(),
        }
    }

    /// Disable color
    pub fn without_color(mut self) -> Self {
        self.color = false;
        self
    }

    /// Get format
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Print success message
    pub fn success(&self, message: &str) {
        if self.format.is_json() {
            self.status("success", message);
        } else if self.color {
            println!("{} {}", style("✓").green(), message);
        } else {
            println!("OK: {}", message);
        }
    }

    /// Print error message
    pub fn error(&self, message: &str) {
        if self.format.is_json() {
            self.status("error", message);
        } else if self.color {
            eprintln!("{} {}", style("✗").red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
    }

    /// Print warning message
    pub fn warning(&self, message: &str) {
        if self.format.is_json() {
            self.status("warning", message);
        } else if self.color {
            println!("{} {}", style("⚠").yellow(), message);
        } else {
            println!("WARNING: {}", message);
        }
    }

    /// Print info message
    pub fn info(&self, message: &str) {
        if self.format.is_json() {
            self.status("info", message);
        } else if self.color {
            println!("{} {}", style("ℹ").blue(), message);
        } else {
            println!("INFO: {}", message);
        }
    }

    /// Print serializable data.
    ///
    /// Text mode walks the JSON tree. Values that do not fit a JSON number
    /// (amounts above `u64::MAX`) fall back to pretty JSON.
    pub fn data<T: Serialize>(&self, data: &T) {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.print_json(data),
            OutputFormat::Minimal => match serde_json::to_value(data) {
                Ok(json) => self.print_minimal(&json),
                Err(_) => self.print_json(data),
            },
            OutputFormat::Text => match serde_json::to_value(data) {
                Ok(json) => self.print_text(&json, 0),
                Err(_) => {
                    if let Ok(json) = serde_json::to_string_pretty(data) {
                        println!("{}", json);
                    }
                }
            },
        }
    }

    /// Print table
    pub fn table(&self, headers: &[&str], rows: &[Vec<String>]) {
        if self.format.is_json() {
            let data: Vec<BTreeMap<&str, &str>> = rows
                .iter()
                .map(|row| {
                    headers
                        .iter()
                        .zip(row.iter())
                        .map(|(h, v)| (*h, v.as_str()))
                        .collect()
                })
                .collect();
            self.print_json(&data);
        } else {
            for line in render_table(headers, rows) {
                println!("{}", line);
            }
        }
    }

    /// Print key-value pairs as one record
    pub fn record(&self, pairs: &[(&str, String)]) {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => {
                let map: BTreeMap<&str, &str> = pairs.iter().map(|(k, v)| (*k, v.as_str())).collect();
                self.print_json(&map);
            }
            OutputFormat::Minimal => {
                for (_, value) in pairs {
                    println!("{}", value);
                }
            }
            OutputFormat::Text => {
                let width = pairs.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
                for (key, value) in pairs {
                    let padded = format!("{:width$}", key, width = width);
                    if self.color {
                        println!("  {}  {}", style(padded).bold(), value);
                    } else {
                        println!("  {}  {}", padded, value);
                    }
                }
            }
        }
    }

    /// Print section header
    pub fn section(&self, title: &str) {
        if self.format == OutputFormat::Text {
            println!();
            if self.color {
                println!("{}", style(format!("=== {} ===", title)).cyan().bold());
            } else {
                println!("=== {} ===", title);
            }
        }
    }

    fn status(&self, status: &str, message: &str) {
        self.print_json(&serde_json::json!({
            "status": status,
            "message": message
        }));
    }

    /// Print JSON data
    fn print_json<T: Serialize + ?Sized>(&self, data: &T) {
        let output = if matches!(self.format, OutputFormat::JsonPretty) {
            serde_json::to_string_pretty(data)
        } else {
            serde_json::to_string(data)
        };

        if let Ok(json) = output {
            println!("{}", json);
        }
    }

    /// Print text formatted data
    fn print_text(&self, json: &serde_json::Value, indent: usize) {
        let prefix = "  ".repeat(indent);

        match json {
            serde_json::Value::Object(map) => {
                for (key, value) in map {
                    let key = if self.color {
                        style(key).bold().to_string()
                    } else {
                        key.clone()
                    };
                    match value {
                        serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                            println!("{}{}:", prefix, key);
                            self.print_text(value, indent + 1);
                        }
                        _ => println!("{}{}: {}", prefix, key, format_value(value)),
                    }
                }
            }
            serde_json::Value::Array(arr) => {
                for (i, item) in arr.iter().enumerate() {
                    println!("{}[{}]:", prefix, i);
                    self.print_text(item, indent + 1);
                }
            }
            _ => println!("{}{}", prefix, format_value(json)),
        }
    }

    /// Print minimal output
    fn print_minimal(&self, json: &serde_json::Value) {
        match json {
            serde_json::Value::Object(map) => {
                for value in map.values() {
                    self.print_minimal(value);
                }
            }
            serde_json::Value::Array(arr) => {
                for item in arr {
                    self.print_minimal(item);
                }
            }
            _ => println!("{}", format_value(json)),
        }
    }
}

/// Lay out a plain-text table
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> Vec<String> {
    if headers.is_empty() {
        return Vec::new();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let pad = |cells: Vec<String>| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let width = widths.get(i).copied().unwrap_or(cell.len());
                format!("{:width$}", cell, width = width)
            })
            .collect::<Vec<_>>()
            .join(" | ")
    };

    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(pad(headers.iter().map(|h| h.to_string()).collect()));
    lines.push(widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-"));
    for row in rows {
        lines.push(pad(row.clone()));
    }
    lines
}

/// Format a JSON value for text output
fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "null".into(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.clone(),
        _ => value.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
