mod api;
mod cache;
mod cli;
mod live;
mod session;
mod theme;
mod tui;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = api::ApiClient::new(&cli.connection.api_base, cli.connection.token.clone())?;

    match cli.command {
        None => {
            tui::run_dashboard(api, &cli::TuiArgs::default()).await?;
        }
        Some(Command::Tui(args)) => {
            tui::run_dashboard(api, &args).await?;
        }
        Some(Command::Cameras(args)) => {
            let cameras = api.list_cameras().await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&cameras)?);
                return Ok(());
            }

            if cameras.is_empty() {
                println!("No cameras reported by the backend.");
                return Ok(());
            }

            println!("{:<20}  {:<20}  {:<8}  STREAM", "ID", "NAME", "STATUS");
            for camera in &cameras {
                println!(
                    "{:<20}  {:<20}  {:<8}  {}",
                    camera.id,
                    camera.display_name(),
                    camera.status,
                    camera.stream_slug()
                );
            }
        }
        Some(Command::Motion(args)) => {
            let events = api.recent_motion(args.limit).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&events)?);
                return Ok(());
            }

            if events.is_empty() {
                println!("No motion events reported by the backend.");
                return Ok(());
            }

            println!("{:<12}  {:<20}  SNAPSHOT", "TS", "CAMERA");
            for event in &events {
                println!(
                    "{:<12}  {:<20}  {}",
                    event.ts,
                    event.camera_id,
                    event.snapshot_path.as_deref().unwrap_or("-")
                );
            }
        }
        Some(Command::Snapshot(args)) => {
            let outcome = api.capture_snapshot(&args.camera_id).await?;
            if outcome.ok {
                match outcome.path.as_deref() {
                    Some(path) => println!(
                        "Snapshot captured: {}",
                        api::snapshot_url(api.base(), path)
                    ),
                    None => println!("Snapshot captured."),
                }
            } else {
                println!("Snapshot declined by the backend.");
            }
        }
    }

    Ok(())
}
