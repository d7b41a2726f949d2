use clap::Parser;
use radrelay_server::lifecycle::{
    graceful_shutdown, spawn_lifespan_monitor, spawn_threshold_monitor,
};
use radrelay_server::{
    create_module, AuthorizationPipeline, Config, ConnectionTable, Counters, LogBuffer,
    ModuleContext, RelayService, SecretResolver, Termination,
};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Protocol-aware RADIUS relay worker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "radrelayd")]
struct Cli {
    /// Path to configuration file
    #[arg(value_name = "CONFIG", default_value = "config.json")]
    config_path: String,

    /// Instance name for log attribution
    #[arg(short, long, default_value = "default")]
    instance: String,

    /// Validate configuration and exit (doesn't start the relay)
    #[arg(short, long)]
    validate: bool,

    /// Enable debug logging (overrides configured log level)
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing_subscriber::registry()
                .with(EnvFilter::new("info"))
                .with(tracing_subscriber::fmt::layer())
                .init();

            if cli.validate {
                eprintln!("Configuration validation failed: {}", e);
                process::exit(1);
            }

            warn!("Could not load config file from: {}", cli.config_path);
            info!("Creating example configuration at: {}", cli.config_path);
            if let Err(e) = Config::example().to_file(&cli.config_path) {
                error!("Error creating example config: {}", e);
                process::exit(1);
            }
            info!("Please edit {} and restart", cli.config_path);
            process::exit(0);
        }
    };

    if cli.validate {
        println!("Configuration validated successfully");
        println!();
        println!("  Bind: {}:{}", config.bind_address, config.bind_port);
        println!(
            "  Backend: {}:{}",
            config.backend_address, config.backend_port
        );
        println!(
            "  Mode: {}",
            if config.accounting {
                "accounting"
            } else {
                "proxy"
            }
        );
        println!("  Lib dir: {}", config.lib_dir.display());
        println!("  Modules: {}", config.modules.join(", "));
        process::exit(0);
    }

    let log_level = if cli.debug {
        "debug"
    } else {
        config.log_level.as_deref().unwrap_or("info")
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("radrelay worker v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from: {}", cli.config_path);
    if cli.debug {
        warn!("==============WARNING=================");
        warn!("debugging is enabled!");
        warn!("dumps from debugging may contain secrets");
        warn!("do NOT share debugging dumps");
        warn!("==============WARNING=================");
    }

    let resolver = match SecretResolver::from_lib_dir(&config.lib_dir) {
        Ok(resolver) => resolver,
        Err(e) => {
            error!(error = %e, "unable to load secrets");
            process::exit(1);
        }
    };

    // module configuration rides in the same JSON file
    let backing = std::fs::read(&cli.config_path).unwrap_or_default();
    let logbuf = Arc::new(LogBuffer::new());
    let module_ctx = ModuleContext {
        lib_dir: config.lib_dir.clone(),
        log_dir: config.log_dir.clone(),
        instance: cli.instance.clone(),
        logbuf: Arc::clone(&logbuf),
        backing,
    };
    let mut pipeline = AuthorizationPipeline::new(resolver);
    for name in &config.modules {
        let mut module = match create_module(name) {
            Ok(module) => module,
            Err(e) => {
                error!(module = name.as_str(), error = %e, "unknown module");
                process::exit(1);
            }
        };
        if let Err(e) = module.setup(&module_ctx) {
            error!(module = name.as_str(), error = %e, "module setup failed");
            process::exit(1);
        }
        info!(module = name.as_str(), "module registered");
        pipeline.register(Arc::from(module));
    }
    let pipeline = Arc::new(pipeline);

    let bind_addr = match config.bind_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "invalid bind address");
            process::exit(1);
        }
    };
    let backend_addr = match config.backend_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "invalid backend address");
            process::exit(1);
        }
    };
    let socket = match UdpSocket::bind(bind_addr).await {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            error!(addr = %bind_addr, error = %e, "unable to bind");
            process::exit(1);
        }
    };

    let counters = Arc::new(Counters::new());
    let table = Arc::new(ConnectionTable::new(backend_addr, Arc::clone(&counters)));
    let service = RelayService::new(
        Arc::clone(&socket),
        Arc::clone(&table),
        Arc::clone(&pipeline),
        config.no_reject,
    );

    {
        let logbuf = Arc::clone(&logbuf);
        let log_dir = config.log_dir.clone();
        let instance = cli.instance.clone();
        let every = Duration::from_secs(config.internals.log_flush_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                logbuf.flush(&log_dir, &instance);
            }
        });
    }

    let (tx, mut rx) = mpsc::channel::<Termination>(4);
    {
        let table = Arc::clone(&table);
        spawn_threshold_monitor(
            Termination::Connections,
            Duration::from_secs(config.internals.max_connections.check_secs),
            config.internals.max_connections.count,
            move || {
                let table = Arc::clone(&table);
                async move { table.len().await as u64 }
            },
            tx.clone(),
        );
    }
    {
        let counters = Arc::clone(&counters);
        spawn_threshold_monitor(
            Termination::ClientFailures,
            Duration::from_secs(config.internals.client_failures.check_secs),
            config.internals.client_failures.count,
            move || {
                let counters = Arc::clone(&counters);
                async move { counters.client_failures() }
            },
            tx.clone(),
        );
    }
    spawn_lifespan_monitor(
        chrono::Duration::hours(config.internals.lifespan_hours),
        Duration::from_secs(config.internals.life_check_hours * 3600),
        config.internals.life_hours.clone(),
        tx.clone(),
    );
    if !config.internals.no_interrupt {
        let tx = tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(Termination::Interrupt).await;
            }
        });
    }

    #[cfg(unix)]
    {
        let table = Arc::clone(&table);
        let counters = Arc::clone(&counters);
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            let mut hangup = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::hangup(),
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(error = %e, "unable to install reload handler");
                    return;
                }
            };
            while hangup.recv().await.is_some() {
                info!("reloading");
                table.clear().await;
                counters.reset();
                pipeline.reload();
            }
        });
    }

    if config.accounting {
        info!(addr = %bind_addr, "accounting mode");
        tokio::spawn(async move { service.run_accounting().await });
    } else {
        info!(addr = %bind_addr, backend = %backend_addr, "proxy mode");
        tokio::spawn(async move { service.run_proxy().await });
    }

    let reason = rx.recv().await.unwrap_or(Termination::Interrupt);
    if config.quit.wait {
        graceful_shutdown(
            reason,
            pipeline,
            logbuf,
            &config.log_dir,
            &cli.instance,
            Duration::from_secs(config.quit.timeout_secs),
        )
        .await;
    } else {
        info!(%reason, "shutting down immediately");
    }
    process::exit(0);
}
