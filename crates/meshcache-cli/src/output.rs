use crate::cli::OutputFormat;
use colored::Colorize;
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

pub fn print_value(value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!("{value}"),
        OutputFormat::Text => match serde_json::to_string_pretty(value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{value}"),
        },
    }
}

/// Prints `(name, value)` rows as a two-column table, or as one JSON object.
pub fn print_fields(rows: &[(&str, String)], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let object: serde_json::Map<String, Value> = rows
                .iter()
                .map(|(name, value)| (name.to_string(), Value::String(value.clone())))
                .collect();
            println!("{}", Value::Object(object));
        }
        OutputFormat::Text => {
            let mut builder = Builder::default();
            for (name, value) in rows {
                builder.push_record([name.to_string(), value.clone()]);
            }
            println!("{}", builder.build().with(Style::rounded()));
        }
    }
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}
