use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use courtik::auth::AuthBackend;
use courtik::auth::gotrue::GoTrueBackend;
use courtik::auth::memory::MemoryAuthBackend;
use courtik::config::{BackendConfig, ConfigError, StoreConfig};
use courtik::courts::{Court, CourtsClient, CourtsError, MapsPlatform, fallback_courts};
use courtik::guard::RouteGuard;
use courtik::nav::{Location, MemoryNavigator, Navigator};
use courtik::session::{AuthError, SessionState};
use courtik::store::SessionStore;

/// How long `login` waits for the signed-in state to reach the store.
const SIGN_IN_SETTLE: Duration = Duration::from_secs(5);
const AUTO_REFRESH_TICK: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Auth(#[from] AuthError),
    #[error("courts error: {0}")]
    Courts(#[from] CourtsError),
    #[error("no court with id {0}")]
    CourtNotFound(i64),
    #[error("sign-in accepted but the session never arrived")]
    SessionNotApplied,
}

#[derive(Parser, Debug)]
#[command(name = "courtik", about = "Court booking session and catalog CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the persisted session.
    Session,
    Login {
        email: String,
        #[arg(long, env = "COURTIK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register {
        email: String,
        #[arg(long, env = "COURTIK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Logout,
    /// List courts, falling back to the built-in list when offline.
    Courts,
    Court {
        id: i64,
        #[arg(long, value_enum, default_value_t = Platform::Google)]
        platform: Platform,
    },
    /// Where the route guard would send the current session from `path`.
    Guard { path: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Platform {
    Apple,
    Google,
}

impl From<Platform> for MapsPlatform {
    fn from(p: Platform) -> Self {
        match p {
            Platform::Apple => Self::Apple,
            Platform::Google => Self::Google,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let backend_config = match BackendConfig::from_env() {
        Ok(config) => Some(config),
        Err(e @ ConfigError::Missing { .. }) => {
            tracing::warn!(error = %e, "backend not configured; using offline auth and built-in courts");
            None
        }
        Err(e) => return Err(e.into()),
    };

    match cli.command {
        Command::Courts => run_courts(backend_config.as_ref()).await,
        Command::Court { id, platform } => run_court(backend_config.as_ref(), id, platform.into()).await,
        command => {
            let store = open_store(backend_config.as_ref())?;
            store.initialize().await;
            run_session_command(&store, command).await
        }
    }
}

fn open_store(config: Option<&BackendConfig>) -> Result<SessionStore, CliError> {
    let backend: Arc<dyn AuthBackend> = match config {
        Some(config) => {
            let backend = Arc::new(GoTrueBackend::new(config)?);
            // Detached; stops on its own once the backend is dropped.
            drop(backend.spawn_auto_refresh(AUTO_REFRESH_TICK));
            backend
        }
        None => Arc::new(MemoryAuthBackend::new()),
    };
    Ok(SessionStore::new(backend, StoreConfig::from_env()))
}

async fn run_session_command(store: &SessionStore, command: Command) -> Result<(), CliError> {
    match command {
        Command::Session => {
            print_state(&store.state());
            Ok(())
        }
        Command::Login { email, password } => {
            store.sign_in(&email, &password).await?;
            let mut rx = store.watch();
            let applied = matches!(
                tokio::time::timeout(SIGN_IN_SETTLE, rx.wait_for(|snap| snap.state.is_present())).await,
                Ok(Ok(_))
            );
            if !applied {
                return Err(CliError::SessionNotApplied);
            }
            print_state(&store.state());
            Ok(())
        }
        Command::Register { email, password } => {
            let receipt = store.sign_up(&email, &password).await?;
            println!("{}", receipt.message());
            Ok(())
        }
        Command::Logout => {
            store.sign_out().await?;
            println!("signed out");
            Ok(())
        }
        Command::Guard { path } => {
            let navigator = Arc::new(MemoryNavigator::at(&path));
            let guard = RouteGuard::new(navigator.clone());
            match guard.check(&store.snapshot()) {
                Some(route) => println!("{} -> {}", Location::parse(&path), route.path()),
                None => println!("{} (stay)", navigator.location()),
            }
            Ok(())
        }
        Command::Courts | Command::Court { .. } => Ok(()),
    }
}

fn print_state(state: &SessionState) {
    match state {
        SessionState::Present(session) => {
            let email = session.user.email.as_deref().unwrap_or("-");
            println!("signed in as {email} ({})", session.user.id);
        }
        SessionState::Absent => println!("signed out"),
        SessionState::Unknown => println!("unknown"),
    }
}

async fn run_courts(config: Option<&BackendConfig>) -> Result<(), CliError> {
    let courts = match config {
        Some(config) => CourtsClient::new(config)?.list_or_fallback().await,
        None => fallback_courts(),
    };
    for court in &courts {
        let price = court.price.map_or_else(|| "-".to_owned(), |p| format!("${p}"));
        println!("{:>3}  {:<28} {:<8} {price}", court.id, court.name, court.venue());
    }
    Ok(())
}

async fn run_court(config: Option<&BackendConfig>, id: i64, platform: MapsPlatform) -> Result<(), CliError> {
    let court = match config {
        Some(config) => CourtsClient::new(config)?.get(id).await?,
        None => fallback_courts().into_iter().find(|c| c.id == id),
    };
    let court = court.ok_or(CliError::CourtNotFound(id))?;
    print_court(&court, platform);
    Ok(())
}

fn print_court(court: &Court, platform: MapsPlatform) {
    let stars: String = court.stars().iter().map(|s| s.glyph()).collect();
    let rating = court.rating.map_or_else(|| "-".to_owned(), |r| r.to_string());
    println!("{}", court.name);
    println!("  address: {}", court.address.as_deref().unwrap_or("-"));
    println!("  venue:   {}", court.venue());
    println!("  rating:  {stars} {rating} ({})", court.reviews.unwrap_or(0));
    println!("  about:   {}", court.description.as_deref().unwrap_or("Descripción no disponible."));
    match court.maps_url(platform) {
        Some(url) => println!("  maps:    {url}"),
        None => println!("  maps:    no coordinates available"),
    }
}
