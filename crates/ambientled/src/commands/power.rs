//! `on` / `off`: one service call against a ready bridge.

use ambientled_core::{EntityBridge, HsColor, Rgb, TurnOnParams, convert};

use crate::cli::{GlobalOpts, OffArgs, OnArgs};
use crate::error::CliError;
use crate::output;

pub async fn turn_on(args: OnArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let params = TurnOnParams {
        brightness: args.brightness.map(|pct| convert::host_brightness(f64::from(pct))),
        hs_color: args.rgb.as_deref().map(parse_color).transpose()?,
        effect: args.effect,
    };

    let connected = super::connect(global, false).await?;
    let result = async {
        let id = resolve_device(&connected.bridge, &args.device)?;
        connected.bridge.turn_on(&id, params).await?;
        Ok::<_, CliError>(id)
    }
    .await;
    finish(connected, result, global).await
}

pub async fn turn_off(args: OffArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let connected = super::connect(global, false).await?;
    let result = async {
        let id = resolve_device(&connected.bridge, &args.device)?;
        connected.bridge.turn_off(&id).await?;
        Ok::<_, CliError>(id)
    }
    .await;
    finish(connected, result, global).await
}

/// Match `device` against ids first, then names.
fn resolve_device(bridge: &EntityBridge, device: &str) -> Result<String, CliError> {
    bridge
        .session()
        .registry()
        .find(device)
        .map(|d| d.id.to_string())
        .ok_or_else(|| CliError::NotFound {
            identifier: device.to_owned(),
        })
}

async fn finish(
    connected: super::Connected,
    result: Result<String, CliError>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let line = result
        .as_ref()
        .ok()
        .and_then(|id| connected.bridge.entity(id))
        .map(|entity| output::describe(&entity, connected.color));
    connected.bridge.unload().await;
    result?;

    if let Some(line) = line {
        output::print_output(&line, global.quiet);
    }
    Ok(())
}

fn parse_color(raw: &str) -> Result<HsColor, CliError> {
    Rgb::from_hex(raw)
        .map(HsColor::from)
        .ok_or_else(|| CliError::Validation {
            field: "color".into(),
            reason: format!("expected #rrggbb, got '{raw}'"),
        })
}
