use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "meshid", about = "meshid face verification CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire the camera and start live detection
    Start,
    /// Stop live detection and release the camera
    Stop,
    /// Enroll the face currently in view (replaces any previous enrollment)
    Enroll,
    /// Compare the face currently in view against the enrolled face
    #[command(alias = "verify")]
    Authenticate,
    /// Show daemon status
    Status,
    /// Remove the enrolled face
    Clear,
}

#[zbus::proxy(
    interface = "org.freedesktop.MeshId1",
    default_service = "org.freedesktop.MeshId1",
    default_path = "/org/freedesktop/MeshId1"
)]
trait MeshId {
    async fn start_session(&self) -> zbus::Result<String>;
    async fn stop_session(&self) -> zbus::Result<String>;
    async fn enroll(&self) -> zbus::Result<String>;
    async fn authenticate(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
    async fn clear_template(&self) -> zbus::Result<bool>;
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let connection = zbus::Connection::session()
        .await
        .context("cannot connect to the session bus")?;
    let proxy = MeshIdProxy::new(&connection)
        .await
        .context("cannot reach meshidd")?;

    match cli.command {
        Commands::Start => {
            let state = proxy.start_session().await?;
            println!("Session started ({state})");
        }
        Commands::Stop => {
            let state = proxy.stop_session().await?;
            println!("Session stopped ({state})");
        }
        Commands::Enroll => {
            let reply = proxy.enroll().await?;
            tracing::debug!(%reply, "enroll reply");
            println!("Face enrolled");
        }
        Commands::Authenticate => {
            let reply = proxy.authenticate().await?;
            let (line, accepted) = describe_authentication(&reply)?;
            println!("{line}");
            if !accepted {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Status => {
            let reply = proxy.status().await?;
            let value: serde_json::Value = serde_json::from_str(&reply)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Clear => {
            if proxy.clear_template().await? {
                println!("Enrolled face removed");
            } else {
                println!("No face enrolled");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Render an `Authenticate` reply as a human-readable line.
fn describe_authentication(reply: &str) -> Result<(String, bool)> {
    let value: serde_json::Value =
        serde_json::from_str(reply).context("malformed authenticate reply")?;
    let score = value["score"].as_f64().context("reply has no score")?;
    let threshold = value["threshold"].as_f64().context("reply has no threshold")?;
    let accepted = value["verdict"].as_str() == Some("accept");

    let line = format!(
        "{} (similarity {score:.4}, threshold {threshold:.2})",
        if accepted { "Match accepted" } else { "Match rejected" }
    );
    Ok((line, accepted))
}
