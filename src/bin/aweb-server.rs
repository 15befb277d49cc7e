//! Thin binary wrapper: `serve` launches the Rocket server, `seed` inserts
//! deterministic fixtures (one tenant, two agents) and exits. `serve` is the
//! default when no subcommand is given, matching a bare `cargo run`.

use aweb::config::Config;
use aweb::db::Db;
use aweb::identity::lifecycle::{bootstrap_identity, ensure_tenant};
use aweb::models::AgentKind;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aweb-server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Insert one fixture tenant with two fixture agents, then exit.
    Seed,
}

#[rocket::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let config = match Config::from_env() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("invalid configuration: {e}");
                    std::process::exit(1);
                }
            };
            if let Err(e) = aweb::rocket_with_config(config).launch().await {
                eprintln!("server error: {e}");
                std::process::exit(1);
            }
        }
        Command::Seed => {
            let config = match Config::from_env() {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("invalid configuration: {e}");
                    std::process::exit(1);
                }
            };
            if let Err(e) = seed(&config.database_path) {
                eprintln!("seed failed: {e}");
                std::process::exit(1);
            }
            println!("seeded fixture tenant 'demo' with agents 'atlas' and 'bramble'");
        }
    }
}

fn seed(database_path: &str) -> Result<(), String> {
    if let Some(parent) = std::path::Path::new(database_path).parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let db = Db::new(database_path);
    let conn = db.conn.lock().unwrap();

    let tenant = ensure_tenant(&conn, "demo", "Demo Project").map_err(|e| e.to_string())?;

    bootstrap_identity(&conn, &tenant.project_id, Some("atlas"), "", AgentKind::Agent, None, None)
        .map_err(|e| e.to_string())?;
    bootstrap_identity(&conn, &tenant.project_id, Some("bramble"), "", AgentKind::Agent, None, None)
        .map_err(|e| e.to_string())?;

    Ok(())
}
