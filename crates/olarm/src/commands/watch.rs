//! `olarm watch`: print state changes as they are committed.

use std::collections::BTreeSet;

use tokio::sync::broadcast::error::RecvError;

use olarm_core::{ConnectionState, Session, StateChangeEvent};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::{devices, util};

fn wanted(filter: &BTreeSet<String>, event: &StateChangeEvent) -> bool {
    filter.is_empty() || filter.contains(event.device_id.as_str())
}

pub async fn handle(session: &Session, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    for id in &args.devices {
        util::find_device(session, id)?;
    }
    let filter: BTreeSet<String> = args.devices.into_iter().collect();
    let color = output::should_color(global.color);
    let human = matches!(global.output, OutputFormat::Table | OutputFormat::Plain);

    // Subscribe before printing the snapshot so nothing falls in between.
    let mut events = session.events();
    let mut state = session.connection_state();

    if !args.no_snapshot {
        output::print_output(&devices::render_snapshot(session, global)?, global.quiet);
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut printed = 0_usize;

    loop {
        tokio::select! {
            biased;

            _ = &mut ctrl_c => break,

            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                if human && !global.quiet {
                    eprintln!("-- connection {current}");
                }
                if current == ConnectionState::Unauthenticated {
                    return Err(CliError::AuthFailed {
                        reason: "the refresh token was revoked".into(),
                    });
                }
            }

            received = events.recv() => match received {
                Ok(event) if wanted(&filter, &event) => {
                    output::print_output(
                        &output::render_event(global.output, &event, color)?,
                        global.quiet,
                    );
                    printed += 1;
                    if args.count.is_some_and(|n| printed >= n) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream lagged, some changes were not printed");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}
