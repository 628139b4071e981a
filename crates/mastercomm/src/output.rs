use std::io::IsTerminal;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use mastercomm_link::{CommandHistograms, CommunicationStats};
use mastercomm_protocol::{FieldValue, Fields};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ResponseOutput<'a> {
    action: &'a str,
    fields: &'a Fields,
}

/// Print the decoded fields of one response or event.
pub fn print_fields(action: &str, fields: &Fields, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ResponseOutput { action, fields };
            println!("{}", to_json(&out));
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "TYPE", "VALUE"]);
            for (name, value) in fields.iter() {
                table.add_row(vec![
                    name.to_string(),
                    value.kind().to_string(),
                    value_text(value),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let rendered: Vec<String> = fields
                .iter()
                .map(|(name, value)| format!("{name}={}", value_text(value)))
                .collect();
            println!("{action} {}", rendered.join(" "));
        }
    }
}

#[derive(Serialize)]
struct StatsOutput<'a> {
    statistics: &'a CommunicationStats,
    histograms: &'a CommandHistograms,
}

pub fn print_stats(stats: &CommunicationStats, histograms: &CommandHistograms, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = StatsOutput {
                statistics: stats,
                histograms,
            };
            println!("{}", to_json(&out));
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ACTION", "TOTAL", "SUCCESS", "TIMEOUT"]);
            for (action, total) in &histograms.total {
                table.add_row(vec![
                    action.clone(),
                    total.to_string(),
                    histograms.success.get(action).copied().unwrap_or(0).to_string(),
                    histograms.timeout.get(action).copied().unwrap_or(0).to_string(),
                ]);
            }
            println!("{table}");
            println!(
                "bytes written: {}, bytes read: {}",
                stats.bytes_written, stats.bytes_read
            );
        }
        OutputFormat::Pretty => {
            println!(
                "succeeded={} timedout={} written={} read={}",
                stats.calls_succeeded.len(),
                stats.calls_timedout.len(),
                stats.bytes_written,
                stats.bytes_read
            );
        }
    }
}

fn value_text(value: &FieldValue) -> String {
    match value {
        FieldValue::Str(text) => text.clone(),
        FieldValue::Int(n) => n.to_string(),
        other => to_json(other),
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use mastercomm_protocol::OutputState;

    use super::*;

    #[test]
    fn value_text_renders_scalars_plainly() {
        assert_eq!(value_text(&FieldValue::Int(42)), "42");
        assert_eq!(value_text(&FieldValue::from("OK")), "OK");
    }

    #[test]
    fn value_text_renders_lists_as_json() {
        let outputs = FieldValue::Outputs(vec![OutputState { id: 3, dimmer: 20 }]);
        assert_eq!(value_text(&outputs), r#"[{"id":3,"dimmer":20}]"#);
    }
}
