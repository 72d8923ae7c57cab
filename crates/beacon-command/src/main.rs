use std::sync::Arc;
use std::time::Duration;

use beacon_core::{Claims, Clock, HealthStatus, ServiceRecord, SystemClock};
use beacon_db::SqliteStore;
use beacon_server::{
    config::{RegistryConfig, SessionConfig, TokenConfig},
    HttpProber, Registry, SessionStore, TokenAuthority,
};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Beacon local administrative CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, env = "DATABASE_URL", default_value = "beacon.db")]
    db: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Token issuance and inspection
    Token {
        #[command(subcommand)]
        sub: TokenCommands,
    },
    /// Service registry management
    Service {
        #[command(subcommand)]
        sub: ServiceCommands,
    },
    /// Session maintenance
    Session {
        #[command(subcommand)]
        sub: SessionCommands,
    },
    /// Show registry status overview
    Status,
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Mint an access token
    Issue {
        #[arg(long)]
        subject: String,
        #[arg(long = "role")]
        roles: Vec<String>,
        #[arg(long)]
        audience: Option<String>,
        #[arg(long, default_value_t = 15 * 60)]
        ttl_secs: u64,
        #[arg(long, env = "BEACON_JWT_SECRET", hide_env_values = true)]
        secret: String,
    },
    /// Validate a token and print its claims
    Inspect {
        token: String,
        #[arg(long, env = "BEACON_JWT_SECRET", hide_env_values = true)]
        secret: String,
    },
}

#[derive(Subcommand)]
enum ServiceCommands {
    /// Register (or replace) a service
    Register {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        version: String,
        #[arg(long = "endpoint")]
        endpoints: Vec<String>,
        #[arg(long = "capability")]
        capabilities: Vec<String>,
        #[arg(long)]
        health_check_url: Option<String>,
    },
    /// Remove a service
    Deregister {
        #[arg(long)]
        id: String,
    },
    /// List all registered services
    List,
    /// List healthy services, optionally filtered by capability
    Discover {
        #[arg(long, default_value = "")]
        capability: String,
    },
    /// Record a heartbeat for a service
    Heartbeat {
        #[arg(long)]
        id: String,
    },
    /// Run one health sweep now
    Check {
        #[arg(long, default_value_t = 2)]
        timeout_secs: u64,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Delete expired sessions
    Purge,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Commands::Token { sub } => match sub {
            TokenCommands::Issue {
                subject,
                roles,
                audience,
                ttl_secs,
                secret,
            } => {
                let config = TokenConfig {
                    secret,
                    access_token_ttl_secs: ttl_secs,
                    ..TokenConfig::default()
                };
                let authority = TokenAuthority::new(&config, clock)?;

                let mut claims = Claims::new(subject);
                for role in roles {
                    claims = claims.with_role(role);
                }
                if let Some(audience) = audience {
                    claims = claims.with_audience(audience);
                }
                let token = authority.generate(claims)?;
                println!("{}", token.value);
            }
            TokenCommands::Inspect { token, secret } => {
                let config = TokenConfig {
                    secret,
                    ..TokenConfig::default()
                };
                let authority = TokenAuthority::new(&config, clock)?;
                let claims = authority.validate(&token)?;
                println!("{}", serde_json::to_string_pretty(&claims)?);
            }
        },
        Commands::Service { sub } => {
            let store = Arc::new(SqliteStore::new(&cli.db)?);
            let timeout = match &sub {
                ServiceCommands::Check { timeout_secs } => *timeout_secs,
                _ => RegistryConfig::default().health_check_timeout_secs,
            };
            let config = RegistryConfig {
                health_check_timeout_secs: timeout,
                ..RegistryConfig::default()
            };
            let prober = Arc::new(HttpProber::new(config.health_check_timeout())?);
            let registry = Registry::new(store, clock, prober, &config);

            match sub {
                ServiceCommands::Register {
                    id,
                    name,
                    version,
                    endpoints,
                    capabilities,
                    health_check_url,
                } => {
                    let mut record = ServiceRecord::new(id, name, version);
                    for endpoint in endpoints {
                        record = record.with_endpoint(endpoint);
                    }
                    for capability in capabilities {
                        record = record.with_capability(capability);
                    }
                    if let Some(url) = health_check_url {
                        record = record.with_health_check(url);
                    }
                    let record = registry.register(record).await?;
                    println!("Service registered successfully: {}", record.id);
                }
                ServiceCommands::Deregister { id } => {
                    registry.deregister(&id).await?;
                    println!("Service deregistered: {}", id);
                }
                ServiceCommands::List => print_services(&registry.list().await?),
                ServiceCommands::Discover { capability } => {
                    print_services(&registry.discover(&capability).await?)
                }
                ServiceCommands::Heartbeat { id } => {
                    let record = registry.heartbeat(&id).await?;
                    println!("Heartbeat recorded for {} ({})", record.id, record.status);
                }
                ServiceCommands::Check { .. } => {
                    let summary = registry.run_health_sweep().await?;
                    println!("Checked:   {}", summary.checked);
                    println!("Probed:    {}", summary.probed);
                    println!("Unhealthy: {}", summary.marked_unhealthy);
                    println!("Recovered: {}", summary.recovered);
                }
            }
        }
        Commands::Session { sub } => match sub {
            SessionCommands::Purge => {
                let store = Arc::new(SqliteStore::new(&cli.db)?);
                let sessions = SessionStore::new(store, clock, &SessionConfig::default());
                let removed = sessions.sweep_expired().await?;
                println!("Expired sessions removed: {}", removed);
            }
        },
        Commands::Status => {
            let store = Arc::new(SqliteStore::new(&cli.db)?);
            let prober = Arc::new(HttpProber::new(Duration::from_secs(2))?);
            let registry = Registry::new(store, clock, prober, &RegistryConfig::default());
            let services = registry.list().await?;

            let count = |status: HealthStatus| services.iter().filter(|s| s.status == status).count();

            println!("Beacon Registry Status Overview");
            println!("{}", "=".repeat(35));
            println!("Total Services: {}", services.len());
            println!("Healthy:        {}", count(HealthStatus::Healthy));
            println!("Unhealthy:      {}", count(HealthStatus::Unhealthy));
            println!("Unknown:        {}", count(HealthStatus::Unknown));
        }
    }

    Ok(())
}

fn print_services(services: &[ServiceRecord]) {
    println!("{:<24} {:<20} {:<10} {:<10} {:<30}", "ID", "Name", "Version", "Status", "Capabilities");
    println!("{}", "-".repeat(96));
    for svc in services {
        let capabilities: Vec<&str> = svc.capabilities.iter().map(String::as_str).collect();
        println!(
            "{:<24} {:<20} {:<10} {:<10} {:<30}",
            svc.id,
            svc.name,
            svc.version,
            svc.status.as_str(),
            capabilities.join(",")
        );
    }
}
