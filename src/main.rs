use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use galleria::gallery::{
    AccessControl, AlbumAccessPolicy, Gallery, PhotoAccessPolicy, SharedGallery,
};
use galleria::Config;
use galleria::storage::StorageSet;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Global options that apply to all commands
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the web server (default if no command specified)
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        #[arg(long)]
        host: Option<String>,

        /// Automatically quit after specified number of seconds (useful for testing)
        #[arg(long)]
        quit_after: Option<u64>,
    },

    /// Reconcile the catalog with the photo store
    Scan {
        /// Also correct album dates and photo timestamps
        #[arg(long)]
        full: bool,

        /// Pre-generate derivatives for new photos, per named preset
        #[arg(long = "resize", value_name = "PRESET")]
        resize: Vec<String>,
    },

    /// Edit access policies on albums and photos
    #[command(subcommand)]
    Policy(PolicyCommands),
}

#[derive(Subcommand, Debug)]
enum PolicyCommands {
    /// Set or clear an album's policy
    Album {
        category: String,
        dirpath: String,

        #[arg(long)]
        public: bool,

        /// Whether photos without their own policy borrow this one
        #[arg(long, default_value_t = true)]
        inherit: bool,

        #[arg(long = "group", value_name = "GROUP")]
        groups: Vec<String>,

        #[arg(long = "user", value_name = "USER")]
        users: Vec<String>,

        /// Remove the policy entirely
        #[arg(long)]
        clear: bool,
    },
    /// Set or clear a photo's policy
    Photo {
        category: String,
        dirpath: String,
        filename: String,

        #[arg(long)]
        public: bool,

        #[arg(long = "group", value_name = "GROUP")]
        groups: Vec<String>,

        #[arg(long = "user", value_name = "USER")]
        users: Vec<String>,

        /// Remove the policy entirely
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Some(Commands::Scan { full, resize }) => run_scan(cli.config, full, resize).await,
        Some(Commands::Policy(policy_cmd)) => run_policy(cli.config, policy_cmd).await,
        Some(Commands::Serve {
            port,
            host,
            quit_after,
        }) => run_server(cli.config, port, host, quit_after).await,
        None => run_server(cli.config, None, None, None).await,
    }
}

fn load_config(config_path: &PathBuf) -> Result<Config, Box<dyn std::error::Error>> {
    if config_path.exists() {
        let config_content = std::fs::read_to_string(config_path)?;
        Ok(toml_edit::de::from_str::<Config>(&config_content)?)
    } else {
        info!("Config file not found at {:?}, using defaults", config_path);
        Ok(Config::default())
    }
}

fn open_gallery(config: &Config) -> Result<SharedGallery, Box<dyn std::error::Error>> {
    let storage = StorageSet::from_config(&config.storage.photo, &config.storage.cache);
    Ok(Arc::new(Gallery::new(config.gallery.clone(), storage)?))
}

async fn run_server(
    config_path: PathBuf,
    port: Option<u16>,
    host: Option<String>,
    quit_after: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&config_path)?;

    let host = host.unwrap_or(config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    info!("Configuration loaded from: {:?}", config_path);
    info!("Photo store: {:?}", config.storage.photo.root);
    info!("Cache store: {:?}", config.storage.cache.root);

    let (app, gallery) = galleria::create_app(config)?;

    let addr = SocketAddr::from((host.parse::<std::net::IpAddr>()?, port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(listener, app);
    let graceful = server.with_graceful_shutdown(shutdown_signal(quit_after));

    if let Err(e) = graceful.await {
        tracing::error!("Server error: {}", e);
    }

    info!("Shutting down - saving catalog");
    gallery.save_catalog().await?;

    Ok(())
}

async fn run_scan(
    config_path: PathBuf,
    full: bool,
    resize: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&config_path)?;
    let gallery = open_gallery(&config)?;

    let stats = gallery.scan_and_resize(full, &resize).await?;
    println!(
        "Albums: +{} -{}  Photos: +{} -{}  Dates fixed: {}  Unmatched files: {}",
        stats.albums_added,
        stats.albums_removed,
        stats.photos_added,
        stats.photos_removed,
        stats.dates_fixed,
        stats.unmatched
    );

    let unprotected = gallery.albums_without_policy().await;
    if !unprotected.is_empty() {
        println!("Albums without an access policy (invisible to everyone):");
        for (id, dirpath) in unprotected {
            println!("  {} {}", id, dirpath);
        }
    }

    Ok(())
}

async fn run_policy(
    config_path: PathBuf,
    cmd: PolicyCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&config_path)?;
    let gallery = open_gallery(&config)?;

    match cmd {
        PolicyCommands::Album {
            category,
            dirpath,
            public,
            inherit,
            groups,
            users,
            clear,
        } => {
            let policy = (!clear).then(|| AlbumAccessPolicy {
                access: AccessControl {
                    public,
                    groups: groups.into_iter().collect(),
                    users: users.into_iter().collect(),
                },
                inherit,
            });
            let updated = gallery
                .with_catalog_mut(|catalog| {
                    let id = catalog.find_album(&category, &dirpath).map(|album| album.id)?;
                    catalog.set_album_policy(id, policy);
                    Some(id)
                })
                .await;
            let Some(id) = updated else {
                eprintln!("Error: No album {} in category {}", dirpath, category);
                std::process::exit(1);
            };
            gallery.save_catalog().await?;
            if clear {
                println!("Cleared policy of album {} ({})", dirpath, id);
            } else {
                println!("Updated policy of album {} ({})", dirpath, id);
            }
        }
        PolicyCommands::Photo {
            category,
            dirpath,
            filename,
            public,
            groups,
            users,
            clear,
        } => {
            let policy = (!clear).then(|| PhotoAccessPolicy {
                access: AccessControl {
                    public,
                    groups: groups.into_iter().collect(),
                    users: users.into_iter().collect(),
                },
            });
            let updated = gallery
                .with_catalog_mut(|catalog| {
                    let album = catalog.find_album(&category, &dirpath).map(|album| album.id)?;
                    let id = catalog.find_photo(album, &filename).map(|photo| photo.id)?;
                    catalog.set_photo_policy(id, policy);
                    Some(id)
                })
                .await;
            let Some(id) = updated else {
                eprintln!(
                    "Error: No photo {} in album {} ({})",
                    filename, dirpath, category
                );
                std::process::exit(1);
            };
            gallery.save_catalog().await?;
            if clear {
                println!("Cleared policy of photo {} ({})", filename, id);
            } else {
                println!("Updated policy of photo {} ({})", filename, id);
            }
        }
    }

    Ok(())
}

async fn shutdown_signal(quit_after: Option<u64>) {
    use tokio::signal;
    use tokio::time::{Duration, sleep};

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let quit_timer = async {
        if let Some(seconds) = quit_after {
            info!(
                "Server will automatically shut down after {} seconds",
                seconds
            );
            sleep(Duration::from_secs(seconds)).await;
            info!("Quit timer expired, shutting down");
        } else {
            std::future::pending::<()>().await
        }
    };

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        },
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        },
        _ = quit_timer => {},
    }
}
