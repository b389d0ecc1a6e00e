//! Config subcommand handlers.

use dialoguer::{Input, Select};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::config::{self, Config, CredentialBackend, Profile};
use crate::error::CliError;
use crate::output;

fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn parse_devices(raw: &str) -> Option<Vec<String>> {
    let ids: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    (!ids.is_empty()).then_some(ids)
}

fn init(cfg: &mut Config, global: &GlobalOpts) -> Result<String, CliError> {
    let default_name = config::active_profile_name(global, cfg);
    let name: String = Input::new()
        .with_prompt("Profile name")
        .default(default_name)
        .interact_text()
        .map_err(prompt_err)?;

    let existing = cfg.profiles.get(&name).cloned().unwrap_or_default();
    let user_id: String = Input::new()
        .with_prompt("Olarm user id")
        .with_initial_text(existing.user_id.clone())
        .interact_text()
        .map_err(prompt_err)?;

    let devices: String = Input::new()
        .with_prompt("Device ids to track (comma separated, empty for all)")
        .allow_empty(true)
        .interact_text()
        .map_err(prompt_err)?;

    let backends = ["System keyring (recommended)", "JSON file in the data directory"];
    let backend = match Select::new()
        .with_prompt("Where should the credential be stored?")
        .items(&backends)
        .default(0)
        .interact()
        .map_err(prompt_err)?
    {
        0 => CredentialBackend::Keyring,
        _ => CredentialBackend::File,
    };

    let profile = Profile {
        user_id: user_id.trim().to_owned(),
        devices: parse_devices(&devices),
        credential_store: Some(backend),
        ..existing
    };
    // Reject the profile now rather than on first use.
    olarm_config::profile_to_session_config(&profile, &cfg.defaults)?;

    cfg.profiles.insert(name.clone(), profile);
    if cfg.profiles.len() == 1 {
        cfg.default_profile = Some(name.clone());
    }
    Ok(name)
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => {
            let mut cfg = config::load()?;
            let name = init(&mut cfg, global)?;
            config::save_config(&cfg)?;
            output::print_output(
                &format!(
                    "✓ Profile '{name}' saved to {}\n  Next: olarm login --profile {name}",
                    config::config_path().display()
                ),
                global.quiet,
            );
        }
        ConfigCommand::Show => {
            let cfg = config::load()?;
            let rendered = match global.output {
                OutputFormat::Table | OutputFormat::Plain => toml::to_string_pretty(&cfg)
                    .map_err(|e| CliError::ConfigLoad {
                        message: e.to_string(),
                    })?,
                format => output::render_single(format, &cfg, |_| String::new(), |_| String::new())?,
            };
            output::print_output(rendered.trim_end(), global.quiet);
        }
        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
        }
        ConfigCommand::Profiles => {
            let cfg = config::load()?;
            let active = config::active_profile_name(global, &cfg);
            let mut names: Vec<_> = cfg.profiles.keys().cloned().collect();
            names.sort();
            let lines: Vec<String> = names
                .iter()
                .map(|n| {
                    if *n == active {
                        format!("* {n}")
                    } else {
                        format!("  {n}")
                    }
                })
                .collect();
            output::print_output(&lines.join("\n"), global.quiet);
        }
        ConfigCommand::Use { name } => {
            let mut cfg = config::load()?;
            if !cfg.profiles.contains_key(&name) {
                return Err(CliError::ProfileNotFound {
                    available: config::available_profiles(&cfg),
                    name,
                });
            }
            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            output::print_output(&format!("✓ Default profile is now '{name}'"), global.quiet);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_list_parsing() {
        assert_eq!(parse_devices("  "), None);
        assert_eq!(
            parse_devices("gen1-001, pro-7,,"),
            Some(vec!["gen1-001".to_owned(), "pro-7".to_owned()])
        );
    }
}
