//! Output formatting: table, JSON, plain.
//!
//! Table uses `tabled`, structured formats use serde, plain emits one
//! identifier per line.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use ambientled_core::LightEntity;

use crate::cli::{ColorChoice, OutputFormat};

/// Whether color output should be enabled.
pub fn should_color(choice: ColorChoice) -> bool {
    match choice {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> String
where
    T: serde::Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            Table::new(rows).with(Style::rounded()).to_string()
        }
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Plain => data.iter().map(&id_fn).collect::<Vec<_>>().join("\n"),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

fn render_json<T: serde::Serialize + ?Sized>(data: &T, compact: bool) -> String {
    let rendered = if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    rendered.expect("serialization should not fail")
}

// ── Light rows ───────────────────────────────────────────────────────

#[derive(Tabled)]
pub struct LightRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "State")]
    pub state: String,
    #[tabled(rename = "Brightness")]
    pub brightness: String,
    #[tabled(rename = "Color")]
    pub color: String,
    #[tabled(rename = "Effect")]
    pub effect: String,
}

impl LightRow {
    pub fn new(entity: &LightEntity, color: bool) -> Self {
        Self {
            id: entity.unique_id.clone(),
            name: entity.name.clone(),
            state: state_label(entity, color),
            brightness: entity
                .brightness
                .map(|b| format!("{}%", brightness_percent(b)))
                .unwrap_or_default(),
            color: entity.hs_color.map(|c| c.to_hex()).unwrap_or_default(),
            effect: entity.effect.clone().unwrap_or_default(),
        }
    }
}

/// "on", "off" or "unavailable", colored when enabled.
pub fn state_label(entity: &LightEntity, color: bool) -> String {
    let label = match (entity.available, entity.is_on) {
        (false, _) => "unavailable",
        (true, true) => "on",
        (true, false) => "off",
    };
    if !color {
        return label.to_owned();
    }
    match label {
        "on" => label.green().to_string(),
        "off" => label.dimmed().to_string(),
        _ => label.red().to_string(),
    }
}

/// Host brightness (0-255) as a rounded percentage.
pub fn brightness_percent(brightness: u8) -> u8 {
    let pct = (u16::from(brightness) * 100 + 127) / 255;
    u8::try_from(pct).unwrap_or(100)
}

/// One-line summary used by `watch` and after service calls.
pub fn describe(entity: &LightEntity, color: bool) -> String {
    let mut line = format!(
        "{} ({}): {}",
        entity.name,
        entity.unique_id,
        state_label(entity, color)
    );
    if entity.is_on {
        if let Some(b) = entity.brightness {
            line.push_str(&format!(" {}%", brightness_percent(b)));
        }
        if let Some(c) = entity.hs_color {
            line.push_str(&format!(" {}", c.to_hex()));
        }
        if let Some(effect) = &entity.effect {
            line.push_str(&format!(" [{effect}]"));
        }
    }
    line
}
