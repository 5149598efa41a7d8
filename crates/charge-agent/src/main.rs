use charge_agent::agent::processor::RequestPipeline;
use charge_agent::agent::radius::RadiusAgent;
use charge_agent::config::Config;
use charge_agent::dm::MemoryDataManager;
use charge_agent::loader::{LoadOption, Loader};
use charge_agent::rpc::{JsonRpcClient, RpcClient};
use charge_agent::sessions::SessionsFacade;
use clap::Parser;
use std::process;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// AAA charging agent: RADIUS front-end and tariff-plan loader
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "charge_agent")]
struct Cli {
    /// Path to configuration file
    #[arg(value_name = "CONFIG", default_value = "config.json")]
    config_path: String,

    /// Validate configuration and exit (doesn't start the agent)
    #[arg(short, long)]
    validate: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing_subscriber::registry()
                .with(EnvFilter::new("info"))
                .with(tracing_subscriber::fmt::layer())
                .init();

            if cli.validate {
                eprintln!("configuration validation failed: {err}");
                process::exit(1);
            }

            warn!("could not load config file from: {}", cli.config_path);
            info!("creating example configuration at: {}", cli.config_path);
            if let Err(err) = Config::example().to_file(&cli.config_path) {
                error!("error creating example config: {err}");
                process::exit(1);
            }
            info!("please edit {} and restart the agent", cli.config_path);
            process::exit(0);
        }
    };

    if cli.validate {
        println!("configuration validated successfully");
        println!();
        println!("Summary:");
        println!("  RADIUS agent enabled: {}", config.radius_agent.enabled);
        if config.radius_agent.enabled {
            println!("  Auth listener: {}", config.radius_agent.listen_auth);
            println!("  Acct listener: {}", config.radius_agent.listen_acct);
            println!(
                "  Request processors: {}",
                config.radius_agent.request_processors.len()
            );
            println!(
                "  Session connections: {}",
                config.radius_agent.sessions_conns.join(", ")
            );
        }
        println!("  Loaders: {}", config.loaders.len());
        process::exit(0);
    }

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.general.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("charge agent v{}", env!("CARGO_PKG_VERSION"));
    info!("loaded configuration from: {}", cli.config_path);

    // one startup pass per enabled loader
    let dm = Arc::new(MemoryDataManager::new());
    for loader_cfg in config.loaders.iter().filter(|l| l.enabled) {
        let cache_conns = (!loader_cfg.cache_conns.is_empty()).then(|| {
            Arc::new(JsonRpcClient::new(loader_cfg.cache_conns.clone())) as Arc<dyn RpcClient>
        });
        let loader = match Loader::new(loader_cfg, dm.clone(), cache_conns) {
            Ok(loader) => loader,
            Err(err) => {
                error!(loader_id = %loader_cfg.id, error = %err, "invalid loader configuration");
                process::exit(1);
            }
        };
        match loader
            .process_folder(loader.caching(), LoadOption::Store)
            .await
        {
            Ok(()) => info!(loader_id = %loader_cfg.id, "folder pass completed"),
            Err(err) => error!(loader_id = %loader_cfg.id, error = %err, "folder pass failed"),
        }
    }

    if !config.radius_agent.enabled {
        info!("RADIUS agent disabled, exiting");
        return;
    }

    let sessions_client: Arc<dyn RpcClient> = Arc::new(JsonRpcClient::new(
        config.radius_agent.sessions_conns.clone(),
    ));
    let pipeline = Arc::new(RequestPipeline {
        processors: config.radius_agent.request_processors.clone(),
        templates: config.templates.clone(),
        sessions: SessionsFacade::new(sessions_client),
        default_tenant: config.general.default_tenant.clone(),
        default_timezone: config.general.default_timezone.clone(),
    });
    let agent = match RadiusAgent::new(config.radius_agent.clone(), pipeline) {
        Ok(agent) => Arc::new(agent),
        Err(err) => {
            error!("cannot start RADIUS agent: {err}");
            process::exit(1);
        }
    };

    let (shutdown, _) = broadcast::channel(1);
    let mut server = tokio::spawn(Arc::clone(&agent).listen_and_serve(shutdown.clone()));

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            let _ = shutdown.send(());
            None
        }
        result = &mut server => Some(result),
    };
    let result = match result {
        Some(result) => result,
        // signalled: let the listeners wind down before exiting
        None => server.await,
    };
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!("listener error: {err}");
            process::exit(1);
        }
        Err(err) => {
            error!("listener task failed: {err}");
            process::exit(1);
        }
    }
}
