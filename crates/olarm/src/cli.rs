//! Clap derive structures for the `olarm` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

use olarm_core::{OutputAction, RelayAction};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// olarm -- watch and control Olarm alarm communicators
#[derive(Debug, Parser)]
#[command(
    name = "olarm",
    version,
    about = "Watch and control Olarm alarm communicators from the command line",
    long_about = "Keeps a live view of an Olarm account's devices over the cloud push\n\
        channel, and sends area, zone and output commands.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Account profile to use
    #[arg(long, short = 'p', env = "OLARM_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "OLARM_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// HTTP request timeout in seconds (overrides the profile)
    #[arg(long, env = "OLARM_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream live state changes until interrupted
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Show devices and their current state
    #[command(alias = "dev", alias = "d")]
    Devices(DevicesArgs),

    /// Show connection, credential and reconcile status
    Status(StatusArgs),

    /// Send a command to a device
    #[command(alias = "cmd")]
    Command(CommandArgs),

    /// Store a refresh token for the active profile
    Login(LoginArgs),

    /// Forget the stored credential for the active profile
    Logout,

    /// Manage configuration profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only show events for this device (repeatable)
    #[arg(long = "device", short = 'd')]
    pub devices: Vec<String>,

    /// Exit after this many events
    #[arg(long, short = 'n')]
    pub count: Option<usize>,

    /// Do not print the initial device snapshot
    #[arg(long)]
    pub no_snapshot: bool,
}

// ── Devices ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DevicesArgs {
    #[command(subcommand)]
    pub command: DevicesCommand,
}

#[derive(Debug, Subcommand)]
pub enum DevicesCommand {
    /// List all devices
    #[command(alias = "ls")]
    List,

    /// Show one device with its areas
    Get {
        /// Device id
        device: String,
    },

    /// List a device's zones with their area membership
    Zones {
        /// Device id
        device: String,
    },
}

// ── Status ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Seconds to wait for the live channel before reporting
    #[arg(long, default_value = "15")]
    pub wait: u64,
}

// ── Command ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CommandArgs {
    /// Target device id
    pub device: String,

    /// Seconds to wait for the live channel before giving up
    #[arg(long, default_value = "15")]
    pub wait: u64,

    #[command(subcommand)]
    pub action: ActionCommand,
}

#[derive(Debug, Subcommand)]
pub enum ActionCommand {
    /// Disarm an area
    Disarm { area: u32 },
    /// Arm an area (away)
    Arm { area: u32 },
    /// Arm an area in stay mode
    Stay { area: u32 },
    /// Arm an area in sleep mode
    Sleep { area: u32 },
    /// Bypass a zone
    Bypass { zone: u32 },
    /// Remove a zone bypass
    Unbypass { zone: u32 },
    /// Drive a PGM output
    Pgm { pgm: u32, action: OutputArg },
    /// Activate a utility key
    Ukey { key: u32 },
    /// Drive an output on an attached LINK
    LinkOutput {
        link: String,
        output: u32,
        action: OutputArg,
    },
    /// Drive a relay on an attached LINK
    LinkRelay {
        link: String,
        relay: u32,
        action: RelayArg,
    },
    /// Drive an output on a MAX device
    MaxOutput { output: u32, action: OutputArg },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputArg {
    Open,
    Close,
    Pulse,
}

impl From<OutputArg> for OutputAction {
    fn from(arg: OutputArg) -> Self {
        match arg {
            OutputArg::Open => Self::Open,
            OutputArg::Close => Self::Close,
            OutputArg::Pulse => Self::Pulse,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum RelayArg {
    Latch,
    Unlatch,
    Pulse,
}

impl From<RelayArg> for RelayAction {
    fn from(arg: RelayArg) -> Self {
        match arg {
            RelayArg::Latch => Self::Latch,
            RelayArg::Unlatch => Self::Unlatch,
            RelayArg::Pulse => Self::Pulse,
        }
    }
}

// ── Login ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Account user id to record in the profile
    #[arg(long)]
    pub user_id: Option<String>,

    /// Read the refresh token from stdin instead of prompting
    #[arg(long)]
    pub stdin: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or update a profile interactively
    Init,
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// List profile names
    Profiles,
    /// Set the default profile
    Use {
        /// Profile name
        name: String,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: clap_complete::Shell,
}
