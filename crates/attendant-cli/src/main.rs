use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "attendant", about = "Attendant face attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status (camera, model, history size)
    Status,
    /// Show the current attendance state
    State,
    /// List confirmed attendance records
    History,
    /// Confirm the currently detected person
    Submit,
    /// Dismiss the confirmation and return to idle
    Close,
    /// List V4L2 capture devices (bypasses the daemon)
    Devices,
}

#[zbus::proxy(
    interface = "org.freedesktop.Attendant1",
    default_service = "org.freedesktop.Attendant1",
    default_path = "/org/freedesktop/Attendant1"
)]
trait Attendant {
    async fn state(&self) -> zbus::Result<String>;
    async fn history(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn submit_attendance(&self) -> zbus::Result<String>;
    async fn close_confirmation(&self) -> zbus::Result<bool>;
}

/// Re-indent a JSON payload from the daemon; fall back to the raw text.
fn pretty(json: &str) -> String {
    serde_json::from_str::<serde_json::Value>(json)
        .and_then(|v| serde_json::to_string_pretty(&v))
        .unwrap_or_else(|_| json.to_string())
}

async fn connect() -> Result<AttendantProxy<'static>> {
    let conn = zbus::Connection::session().await?;
    Ok(AttendantProxy::new(&conn).await?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let proxy = connect().await?;
            println!("{}", pretty(&proxy.status().await?));
        }
        Commands::State => {
            let proxy = connect().await?;
            println!("{}", pretty(&proxy.state().await?));
        }
        Commands::History => {
            let proxy = connect().await?;
            println!("{}", pretty(&proxy.history().await?));
        }
        Commands::Submit => {
            let proxy = connect().await?;
            let record = proxy.submit_attendance().await?;
            println!("Attendance confirmed:");
            println!("{}", pretty(&record));
        }
        Commands::Close => {
            let proxy = connect().await?;
            proxy.close_confirmation().await?;
            println!("Confirmation closed");
        }
        Commands::Devices => {
            let devices = attendant_hw::V4lCamera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}
