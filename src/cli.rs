use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "camdeck",
    version,
    about = "Terminal dashboard for a camera-management backend with live WHEP video tiles"
)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Args)]
pub struct ConnectionArgs {
    /// Base URL of the camera-management backend.
    #[arg(
        long,
        env = "CAMDECK_API_BASE",
        default_value = "http://127.0.0.1:8080"
    )]
    pub api_base: String,

    /// Bearer token sent with every backend and gateway request.
    #[arg(long, env = "CAMDECK_TOKEN")]
    pub token: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Open the interactive dashboard.
    Tui(TuiArgs),
    /// List cameras known to the backend.
    Cameras(CamerasArgs),
    /// List recent motion events.
    Motion(MotionArgs),
    /// Capture a snapshot for one camera.
    Snapshot(SnapshotArgs),
}

#[derive(Debug, Args)]
pub struct TuiArgs {
    /// Camera list refresh interval in seconds.
    #[arg(long, default_value_t = 5)]
    pub camera_poll_secs: u64,

    /// Motion event refresh interval in seconds.
    #[arg(long, default_value_t = 20)]
    pub motion_poll_secs: u64,

    /// Maximum number of motion events fetched per refresh.
    #[arg(long, default_value_t = 50)]
    pub motion_limit: usize,

    /// Scale factor for vertical sampling of decoded frames (helps
    /// character aspect ratio).
    #[arg(long, default_value_t = 2)]
    pub vertical_scale: u16,
}

impl Default for TuiArgs {
    fn default() -> Self {
        Self {
            camera_poll_secs: 5,
            motion_poll_secs: 20,
            motion_limit: 50,
            vertical_scale: 2,
        }
    }
}

#[derive(Debug, Args)]
pub struct CamerasArgs {
    /// Print machine-readable JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct MotionArgs {
    /// Maximum number of events to fetch.
    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Print machine-readable JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    /// Camera identifier to capture from.
    pub camera_id: String,
}
