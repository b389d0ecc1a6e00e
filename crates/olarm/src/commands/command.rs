//! `olarm command`: validate and publish one device command.

use serde::Serialize;

use olarm_core::{Command, Session};

use crate::cli::{ActionCommand, CommandArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

fn to_core(action: ActionCommand) -> Command {
    match action {
        ActionCommand::Disarm { area } => Command::AreaDisarm { area },
        ActionCommand::Arm { area } => Command::AreaArm { area },
        ActionCommand::Stay { area } => Command::AreaStay { area },
        ActionCommand::Sleep { area } => Command::AreaSleep { area },
        ActionCommand::Bypass { zone } => Command::ZoneBypass { zone },
        ActionCommand::Unbypass { zone } => Command::ZoneUnbypass { zone },
        ActionCommand::Pgm { pgm, action } => Command::Pgm {
            pgm,
            action: action.into(),
        },
        ActionCommand::Ukey { key } => Command::UtilityKey { key },
        ActionCommand::LinkOutput {
            link,
            output,
            action,
        } => Command::LinkOutput {
            link_id: link,
            output,
            action: action.into(),
        },
        ActionCommand::LinkRelay {
            link,
            relay,
            action,
        } => Command::LinkRelay {
            link_id: link,
            relay,
            action: action.into(),
        },
        ActionCommand::MaxOutput { output, action } => Command::MaxOutput {
            output,
            action: action.into(),
        },
    }
}

/// Commands that lower protection ask first.
fn needs_confirmation(command: &Command) -> bool {
    matches!(
        command,
        Command::AreaDisarm { .. } | Command::ZoneBypass { .. }
    )
}

#[derive(Serialize)]
struct Sent {
    device: String,
    action: String,
    index: u32,
    status: &'static str,
}

pub async fn handle(session: &Session, args: CommandArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let command = to_core(args.action);
    util::find_device(session, &args.device)?;

    if needs_confirmation(&command)
        && !util::confirm(&format!("Send {command} to {}?", args.device), global.yes)?
    {
        return Ok(());
    }

    util::wait_live(session, args.wait).await?;
    session.send_command(args.device.as_str(), command.clone()).await?;
    tracing::info!(device_id = %args.device, action = %command.action(), "command sent");

    let sent = Sent {
        device: args.device,
        action: command.action(),
        index: command.index(),
        status: "sent",
    };
    let rendered = output::render_single(
        global.output,
        &sent,
        |s| format!("✓ {} {} sent to {}", s.action, s.index, s.device),
        |s| s.status.to_owned(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
