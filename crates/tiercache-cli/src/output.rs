use crate::cli::OutputFormat;
use colored::Colorize;
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;
use tiercache::HealthSnapshot;

pub fn print_value(value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{text}"),
            Err(e) => print_error(&format!("failed to render value: {e}")),
        },
        OutputFormat::Table => print_as_table(value),
    }
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "!".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

pub fn print_health(health: &HealthSnapshot, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_value(health) {
            Ok(value) => print_value(&value, format),
            Err(e) => print_error(&format!("failed to render health: {e}")),
        },
        OutputFormat::Table => {
            let yes_no = |b: bool| if b { "yes".green() } else { "no".red() };
            let mut builder = Builder::default();
            builder.push_record(["Check", "Value"]);
            builder.push_record(["Local tier".to_string(), yes_no(health.local_available).to_string()]);
            builder.push_record(["Remote healthy".to_string(), yes_no(health.remote_healthy).to_string()]);
            builder.push_record([
                "Remote connected".to_string(),
                yes_no(health.remote_connected).to_string(),
            ]);
            builder.push_record(["Breaker".to_string(), health.breaker_state.to_string()]);
            builder.push_record([
                "Consecutive failures".to_string(),
                health.consecutive_failures.to_string(),
            ]);
            builder.push_record(["Local entries".to_string(), health.local_entries.to_string()]);
            println!("{}", builder.build().with(Style::rounded()));
        }
    }
}

fn print_as_table(value: &Value) {
    let mut builder = Builder::default();
    match value {
        Value::Object(map) => {
            builder.push_record(["Field", "Value"]);
            for (k, v) in map {
                builder.push_record([k.clone(), render_cell(v)]);
            }
        }
        other => {
            builder.push_record(["Value"]);
            builder.push_record([render_cell(other)]);
        }
    }
    println!("{}", builder.build().with(Style::rounded()));
}

fn render_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}
