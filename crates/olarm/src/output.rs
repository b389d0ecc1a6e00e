//! Output formatting: table, JSON, YAML, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one identifier per line.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use olarm_core::{
    AreaState, ChangeKind, IoState, PowerState, StateChangeEvent, StateValue, ZoneStatus,
};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
    R: Tabled,
{
    Ok(match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            render_table(&rows)
        }
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Yaml => serde_yaml::to_string(data)?,
        OutputFormat::Plain => data.iter().map(&id_fn).collect::<Vec<_>>().join("\n"),
    })
}

/// Table rendering uses `detail_fn`, since single-item views aren't tabular.
pub fn render_single<T>(
    format: OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
{
    Ok(match format {
        OutputFormat::Table => detail_fn(data),
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::JsonCompact => serde_json::to_string(data)?,
        OutputFormat::Yaml => serde_yaml::to_string(data)?,
        OutputFormat::Plain => id_fn(data),
    })
}

pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

// ── Event lines (watch) ──────────────────────────────────────────────

/// One line per change. JSON formats emit a compact object per line so the
/// stream stays parseable line by line.
pub fn render_event(
    format: OutputFormat,
    event: &StateChangeEvent,
    color: bool,
) -> Result<String, CliError> {
    Ok(match format {
        OutputFormat::Json | OutputFormat::JsonCompact => serde_json::to_string(event)?,
        OutputFormat::Yaml => format!("---\n{}", serde_yaml::to_string(event)?),
        OutputFormat::Plain => event.to_string(),
        OutputFormat::Table => {
            let target = match (event.kind, &event.link_id) {
                (ChangeKind::Power, _) => "power".to_owned(),
                (kind, Some(link_id)) => format!("{kind} {link_id}/{}", event.index),
                (kind, None) => format!("{kind} {}", event.index),
            };
            format!(
                "{}  {}  {:<10} {} -> {}",
                event.at.format("%Y-%m-%d %H:%M:%S"),
                event.device_id,
                target,
                paint(event.old_value, false),
                paint(event.new_value, color),
            )
        }
    })
}

// ── Palette ──────────────────────────────────────────────────────────

enum Tone {
    Calm,
    Armed,
    Alert,
    Muted,
}

fn tone(value: StateValue) -> Tone {
    match value {
        StateValue::Area(AreaState::Disarmed)
        | StateValue::Zone(ZoneStatus::Closed)
        | StateValue::Power(PowerState::Ok)
        | StateValue::Io(IoState::Low | IoState::Open | IoState::Unlatched) => Tone::Calm,
        StateValue::Area(AreaState::Alarm)
        | StateValue::Zone(ZoneStatus::Alarm)
        | StateValue::Power(PowerState::Fault) => Tone::Alert,
        StateValue::Area(AreaState::Armed | AreaState::ArmedStay | AreaState::ArmedSleep)
        | StateValue::Zone(ZoneStatus::Open | ZoneStatus::Bypassed)
        | StateValue::Io(IoState::High | IoState::Closed | IoState::Latched) => Tone::Armed,
        StateValue::Area(AreaState::Unknown)
        | StateValue::Zone(ZoneStatus::Unknown)
        | StateValue::Power(PowerState::Unknown)
        | StateValue::Io(IoState::Unknown) => Tone::Muted,
    }
}

/// State value text, colored by severity when `color` is set.
pub fn paint(value: StateValue, color: bool) -> String {
    let text = value.to_string();
    if !color {
        return text;
    }
    match tone(value) {
        Tone::Calm => text.green().to_string(),
        Tone::Armed => text.yellow().to_string(),
        Tone::Alert => text.red().bold().to_string(),
        Tone::Muted => text.dimmed().to_string(),
    }
}
