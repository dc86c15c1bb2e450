use clap::{Parser, Subcommand};
use warden_core::auth::LOGIN_ATTEMPT;
use warden_core::controllers::stats::DashboardStats;
use warden_core::logging::{LogFormat, init_logging};
use warden_core::migrations::{Migrator, MigratorTrait};
use warden_core::{App, Config, Outcome};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Session, login throttle and audit service")]
#[command(version)]
struct Cli {
    /// Log output: compact, pretty or json
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve,
    /// Database operations
    Db {
        #[command(subcommand)]
        action: DbCommands,
    },
    /// Session maintenance
    Sessions {
        #[command(subcommand)]
        action: SessionCommands,
    },
    /// Lift the login block on an address
    Unblock {
        /// Client address as recorded by the throttle
        ip: String,
    },
    /// Print the security overview as JSON
    Stats,
    /// OpenAPI documentation operations
    Docs {
        #[command(subcommand)]
        action: DocsCommands,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Run pending migrations
    Migrate,
    /// Revert applied migrations
    Rollback {
        /// Number of migrations to revert
        #[arg(default_value_t = 1)]
        steps: u32,
    },
    /// Insert the demo account if it is missing
    Seed,
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List active sessions
    List {
        /// Only sessions of this user id
        #[arg(long)]
        user: Option<i32>,
    },
    /// Deactivate every expired session
    Clean,
}

#[derive(Subcommand)]
enum DocsCommands {
    /// Export the OpenAPI document to a file
    Export {
        /// Output format: json or yaml
        #[arg(long, default_value = "json")]
        format: String,
        /// Output file path
        #[arg(long, default_value = "openapi.json")]
        output: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, "info");

    if let Err(e) = run(cli.command).await {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> CliResult {
    match command {
        Commands::Serve => App::new().await?.run().await,
        Commands::Db { action } => db(action).await,
        Commands::Sessions { action } => sessions(action).await,
        Commands::Unblock { ip } => {
            let state = App::new().await?.state()?;
            match state.rate_limiter.clear(&ip, LOGIN_ATTEMPT).await {
                Outcome::Ok(()) => {
                    println!("Cleared login attempts for {}", ip);
                    Ok(())
                }
                Outcome::Degraded { reason, .. } => Err(reason.into()),
                Outcome::Fatal(e) => Err(e.into()),
            }
        }
        Commands::Stats => {
            let state = App::new().await?.state()?;
            let stats = DashboardStats::collect(&state).await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Commands::Docs { action } => match action {
            DocsCommands::Export { format, output } => export_openapi(&format, &output),
        },
    }
}

async fn db(action: DbCommands) -> CliResult {
    let config = Config::from_env()?;
    let conn = warden_core::db::connect(&config).await?;

    match action {
        DbCommands::Migrate => {
            println!("Running pending migrations...");
            Migrator::up(&conn, None).await?;
            println!("Migrations complete.");
        }
        DbCommands::Rollback { steps } => {
            println!("Reverting {} migration(s)...", steps);
            Migrator::down(&conn, Some(steps)).await?;
            println!("Rollback complete.");
        }
        DbCommands::Seed => {
            if warden_core::db::seed_demo_user(&conn).await? {
                println!("Demo user '{}' created.", warden_core::db::DEMO_USERNAME);
            } else {
                println!("Demo user already present.");
            }
        }
    }
    Ok(())
}

async fn sessions(action: SessionCommands) -> CliResult {
    let state = App::new().await?.state()?;

    match action {
        SessionCommands::List { user } => {
            let sessions = state.sessions.get_active_sessions(user).await?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        SessionCommands::Clean => {
            let cleaned = state.sessions.clean_expired_sessions().await?;
            println!("Deactivated {} expired session(s).", cleaned);
        }
    }
    Ok(())
}

fn export_openapi(format: &str, output: &str) -> CliResult {
    use utoipa::OpenApi;
    use warden_core::openapi::ApiDoc;

    let spec = match format {
        "json" => ApiDoc::openapi().to_pretty_json()?,
        "yaml" => ApiDoc::openapi().to_yaml()?,
        other => return Err(format!("Unsupported format: {}. Use 'json' or 'yaml'.", other).into()),
    };

    std::fs::write(output, spec)?;
    println!("OpenAPI spec exported to: {}", output);
    Ok(())
}
