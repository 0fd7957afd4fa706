use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use axum::Router;
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use portico::{
    adapters::{
        FileDefinitionSource, HttpClientAdapter, HttpDefinitionSource, HttpHandler,
        MetricsStatsClient, builtin_plugins,
    },
    config::{ApiDefinition, ServerConfig, ServerConfigValidator, loader::load_config},
    core::{GatewayService, ProxyContext},
    metrics,
    ports::definition_source::DefinitionSource,
    tracing_setup,
};
use tokio::signal;
use tower_http::trace::TraceLayer;

const DEFAULT_CONFIG: &str = "portico.yaml";
const RELOAD_DEBOUNCE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = DEFAULT_CONFIG)]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = DEFAULT_CONFIG)]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = DEFAULT_CONFIG)]
        config: String,
    },
    /// Start the gateway server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = DEFAULT_CONFIG)]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

fn create_definition_source(
    config_path: &str,
    config: &ServerConfig,
) -> Result<Arc<dyn DefinitionSource>> {
    match &config.source {
        Some(remote) => {
            let interval = remote
                .poll_interval()
                .wrap_err("Invalid source.poll_interval")?;
            tracing::info!(url = %remote.url, ?interval, "Polling definitions from remote source");
            Ok(Arc::new(HttpDefinitionSource::new(
                remote.url.clone(),
                interval,
            )))
        }
        None => {
            tracing::info!(path = %config_path, "Watching definitions in configuration file");
            Ok(Arc::new(FileDefinitionSource::new(config_path)?))
        }
    }
}

/// Load, validate and activate the current definition set.
async fn reload(source: &dyn DefinitionSource, gateway: &GatewayService) -> Result<usize> {
    let apis: Vec<ApiDefinition> = source
        .load_definitions()
        .await
        .wrap_err("Failed to load definitions")?;
    ServerConfigValidator::validate_apis(&apis).wrap_err("Invalid definitions")?;
    let routes = gateway.reload(&apis).wrap_err("Failed to build route table")?;
    Ok(routes)
}

async fn serve(config_path: &str) -> Result<()> {
    let config = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    tracing_setup::init_tracing(&config.log)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    metrics::init_metrics();

    ServerConfigValidator::validate(&config).wrap_err("Invalid configuration")?;

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;

    let context = ProxyContext::new(
        Arc::new(
            HttpClientAdapter::new(&config.proxy)
                .context("Failed to create HTTP client adapter")?,
        ),
        Arc::new(MetricsStatsClient::new()),
    );
    let gateway = Arc::new(GatewayService::new(context, builtin_plugins()));

    let source = create_definition_source(config_path, &config)?;
    let routes = reload(source.as_ref(), &gateway)
        .await
        .wrap_err("Failed to load initial definitions")?;
    tracing::info!(routes, "Initial route table active");

    // Definition watcher task
    let mut notify_rx = source.watch();
    let watcher_source = source.clone();
    let watcher_gateway = gateway.clone();
    tokio::spawn(async move {
        tracing::info!("Definition watcher task started.");

        while notify_rx.recv().await.is_some() {
            // let bursts of change events settle before reloading once
            tokio::time::sleep(RELOAD_DEBOUNCE).await;
            while notify_rx.try_recv().is_ok() {}

            match reload(watcher_source.as_ref(), &watcher_gateway).await {
                Ok(routes) => tracing::info!(routes, "Definitions reloaded"),
                Err(e) => tracing::error!(
                    "Failed to reload definitions: {:#}. Keeping the active route table.",
                    e
                ),
            }
        }
        tracing::info!("Definition watcher task is shutting down.");
    });

    let app = Router::new()
        .fallback_service(HttpHandler::new(gateway.clone()))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!("Portico API gateway listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown..."),
        _ = terminate => tracing::info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!(
                "   • APIs: {} ({} active)",
                config.apis.len(),
                config.active_apis().count()
            );
            match &config.source {
                Some(remote) => println!("   • Definitions: polled from {}", remote.url),
                None => println!("   • Definitions: this file (watched)"),
            }
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure all target URLs start with http:// or https://");
            println!("   • Listen paths must start with '/' and be unique");
            println!("   • Verify listen address format (e.g., '127.0.0.1:3000')");
            println!("   • Durations use units such as 500ms, 30s or 1m");
            std::process::exit(1);
        }
    }
}

const DEFAULT_YAML: &str = r#"# Portico API gateway configuration

# The address to listen on
listen_addr: "127.0.0.1:8080"

log:
  level: info
  format: pretty

proxy:
  upstream_timeout: 30s
  pool_idle_timeout: 90s

# Uncomment to poll definitions from a remote endpoint instead of this file
# source:
#   url: "http://localhost:9000/apis"
#   poll_interval: 10s

apis:
  # Everything under /posts goes to the posts service with the prefix removed
  - name: posts
    proxy:
      listen_path: "/posts/*"
      strip_path: true
      upstreams:
        balancing: roundrobin
        targets:
          - target: "http://localhost:3000"
    plugins:
      - name: request_id

  # Path parameters are substituted into the target path
  - name: users
    proxy:
      listen_path: "/users/{id}/*"
      methods: ["GET", "POST"]
      enable_load_balancing: true
      upstreams:
        balancing: weight
        targets:
          - target: "http://localhost:3001/accounts/{id}"
            weight: 80
          - target: "http://localhost:3002/accounts/{id}"
            weight: 20
"#;

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let content = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml" | "yml") | None => DEFAULT_YAML.to_string(),
        Some("json") => {
            let config = ServerConfig::builder()
                .listen_addr("127.0.0.1:8080")
                .api(ApiDefinition::new(
                    "posts",
                    portico::config::Definition::new("/posts/*")
                        .with_target(portico::config::Target::new("http://localhost:3000")),
                ))
                .build();
            serde_json::to_string_pretty(&config).context("Failed to render config")?
        }
        Some(other) => {
            return Err(eyre!(
                "Cannot generate a '.{other}' config; use a .yaml or .json path"
            ));
        }
    };

    tokio::fs::write(path, content)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'portico serve --config {config_path}' to start the server");
    Ok(())
}
