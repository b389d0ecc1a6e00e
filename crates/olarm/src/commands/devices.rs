//! Device command handlers. Read-only views over the published snapshot.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tabled::Tabled;

use olarm_core::{Device, Session, StateValue, ZoneStatus};

use crate::cli::{DevicesArgs, DevicesCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Areas")]
    areas: String,
    #[tabled(rename = "Zones")]
    zones: String,
    #[tabled(rename = "Power")]
    power: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl From<&Arc<Device>> for DeviceRow {
    fn from(d: &Arc<Device>) -> Self {
        Self {
            id: d.id.to_string(),
            name: d.name.clone(),
            model: d.model.to_string(),
            areas: d
                .areas
                .iter()
                .map(|a| a.state.to_string())
                .collect::<Vec<_>>()
                .join(", "),
            zones: zone_summary(d),
            power: d.power.to_string(),
            updated: updated(d),
        }
    }
}

#[derive(Serialize)]
struct ZoneView {
    index: u32,
    label: String,
    status: ZoneStatus,
    zone_type: Option<i64>,
    areas: Vec<u32>,
}

#[derive(Tabled)]
struct ZoneRow {
    #[tabled(rename = "#")]
    index: u32,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Areas")]
    areas: String,
}

impl From<&ZoneView> for ZoneRow {
    fn from(z: &ZoneView) -> Self {
        Self {
            index: z.index,
            label: z.label.clone(),
            status: z.status.to_string(),
            areas: z
                .areas
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

// ── Formatting helpers ──────────────────────────────────────────────

fn updated(d: &Device) -> String {
    d.updated_at
        .map_or_else(|| "-".into(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

fn zone_summary(d: &Device) -> String {
    let open = d
        .zones
        .iter()
        .filter(|z| z.status != ZoneStatus::Closed)
        .count();
    if open == 0 {
        format!("{} closed", d.zones.len())
    } else {
        format!("{} ({open} not closed)", d.zones.len())
    }
}

fn zone_views(d: &Device) -> Vec<ZoneView> {
    d.zones
        .iter()
        .map(|z| ZoneView {
            index: z.index,
            label: z.label.clone(),
            status: z.status,
            zone_type: z.zone_type,
            areas: d
                .zone_areas
                .iter()
                .filter(|link| link.zone == z.index)
                .map(|link| link.area)
                .collect(),
        })
        .collect()
}

fn detail(d: &Arc<Device>, color: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "ID:       {}", d.id);
    let _ = writeln!(out, "Name:     {}", d.name);
    let _ = writeln!(out, "Model:    {}", d.model);
    let _ = writeln!(
        out,
        "Power:    {}",
        output::paint(StateValue::Power(d.power), color)
    );
    let _ = writeln!(out, "Zones:    {}", zone_summary(d));
    if !d.capabilities.is_empty() {
        let caps: Vec<_> = d.capabilities.iter().map(ToString::to_string).collect();
        let _ = writeln!(out, "Extras:   {}", caps.join(", "));
    }
    let _ = writeln!(out, "Updated:  {}", updated(d));
    let _ = writeln!(out, "Areas:");
    for area in &d.areas {
        let _ = writeln!(
            out,
            "  {:>2}  {:<20} {}",
            area.index,
            area.label,
            output::paint(StateValue::Area(area.state), color)
        );
    }
    if !d.io.is_empty() {
        let _ = writeln!(out, "I/O:");
        for point in &d.io {
            let target = match &point.link_id {
                Some(link_id) => format!("{} {link_id}/{}", point.kind, point.index),
                None => format!("{} {}", point.kind, point.index),
            };
            let _ = writeln!(
                out,
                "  {:<18} {:<20} {}",
                target,
                point.label,
                output::paint(StateValue::Io(point.state), color)
            );
        }
    }
    out.trim_end().to_owned()
}

// ── Handler ─────────────────────────────────────────────────────────

/// Every device in the current snapshot, in the selected format.
pub fn render_snapshot(session: &Session, global: &GlobalOpts) -> Result<String, CliError> {
    let snapshot = session.snapshot();
    output::render_list(
        global.output,
        snapshot.as_slice(),
        |d| DeviceRow::from(d),
        |d| d.id.to_string(),
    )
}

pub fn handle(session: &Session, args: DevicesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(global.color);
    let rendered = match args.command {
        DevicesCommand::List => render_snapshot(session, global)?,
        DevicesCommand::Get { device } => {
            let device = util::find_device(session, &device)?;
            output::render_single(
                global.output,
                &device,
                |d| detail(d, color),
                |d| d.id.to_string(),
            )?
        }
        DevicesCommand::Zones { device } => {
            let device = util::find_device(session, &device)?;
            let zones = zone_views(&device);
            output::render_list(
                global.output,
                &zones,
                |z| ZoneRow::from(z),
                |z| z.index.to_string(),
            )?
        }
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}
