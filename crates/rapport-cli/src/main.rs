use anyhow::Result;
use clap::{Parser, Subcommand};

#[zbus::proxy(
    interface = "org.rapport.Rapport1",
    default_service = "org.rapport.Rapport1",
    default_path = "/org/rapport/Rapport1"
)]
trait Rapport {
    async fn set_owner(&self, id: &str) -> zbus::Result<bool>;
    async fn clear_owner(&self) -> zbus::Result<()>;
    async fn get_owner(&self) -> zbus::Result<String>;
    async fn snapshot(&self) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "rapport", about = "Rapport interaction-tracking CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Select the owner identity (takes effect on the next tick)
    SetOwner {
        /// Enrolled identity id
        id: String,
    },
    /// Unset the owner; sampling continues but no ticks qualify
    ClearOwner,
    /// Show the current owner
    Owner,
    /// Dump the aggregate interaction edges
    Snapshot,
    /// List enrolled identities
    Identities,
    /// Show daemon status
    Status,
}

fn print_pretty_json(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default()),
        Err(_) => println!("{raw}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session().await?;
    let proxy = RapportProxy::new(&conn).await?;

    match cli.command {
        Commands::SetOwner { id } => {
            if proxy.set_owner(&id).await? {
                println!("owner set to {id}");
            } else {
                anyhow::bail!("identity not enrolled: {id}");
            }
        }
        Commands::ClearOwner => {
            proxy.clear_owner().await?;
            println!("owner cleared");
        }
        Commands::Owner => {
            let owner = proxy.get_owner().await?;
            if owner.is_empty() {
                println!("no owner selected");
            } else {
                println!("{owner}");
            }
        }
        Commands::Snapshot => print_pretty_json(&proxy.snapshot().await?),
        Commands::Identities => print_pretty_json(&proxy.list_identities().await?),
        Commands::Status => print_pretty_json(&proxy.status().await?),
    }

    Ok(())
}
