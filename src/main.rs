use std::process;
use std::sync::Arc;

use kasmq::config::AppConfig;
use kasmq::janitor::Janitor;
use kasmq::logging::{LogLevel, Logger, LoggerConfig};
use kasmq::pools::ConnectionRegistry;
use kasmq::queues::QueueRepository;
use kasmq::security::{AccessControl, ConfigSecurityStore};
use kasmq::server::{self, ServerContext, TcpServer};
use kasmq::shutdown::{ShutdownHooks, ShutdownSignal};
use kasmq::storage::StorageFacade;
use kasmq::utils::startup_banner::print_startup_banner;
use kasmq::wire::codec::WireCodec;
use serde_json::json;

fn main() {
    ensure_posix_or_exit();
    print_startup_banner();

    let app_config = Arc::new(load_config_or_exit());
    let logger_config = LoggerConfig::from_logging_config(&app_config.logging).unwrap_or_else(|| {
        eprintln!(
            "invalid logging.level '{}'. Allowed values: error, warn, info, debug, verbose",
            app_config.logging.level
        );
        process::exit(2);
    });
    let logger = Arc::new(Logger::new(logger_config));

    let storage = StorageFacade::initialize(&app_config, &logger).unwrap_or_else(|error| {
        eprintln!("storage initialization error: {error}");
        process::exit(2);
    });
    let storage = Arc::new(storage);
    let repository = Arc::new(QueueRepository::new(
        Arc::clone(&logger),
        Some(Arc::clone(&storage)),
    ));
    if let Err(error) = repository.restore_from_storage() {
        eprintln!("queue restore error: {error}");
        process::exit(2);
    }

    let access = ConfigSecurityStore::from_config(&app_config.security).unwrap_or_else(|error| {
        eprintln!("security configuration error: {error}");
        process::exit(2);
    });
    if !access.is_enabled() {
        logger.warn(
            Some("main::security"),
            "Security is disabled; every non-empty user may log in with full access",
        );
    }
    let access: Arc<dyn AccessControl> = Arc::new(access);

    let registry = Arc::new(ConnectionRegistry::new(
        app_config.server.max_connections,
        Arc::clone(&logger),
    ));
    let codec = Arc::new(WireCodec::standard());
    logger.log(
        LogLevel::Debug,
        Some("main::wire"),
        "Wire codec initialized",
        Some(json!({"registered_classes": codec.registry().class_ids()})),
    );

    let server = TcpServer::bind(&app_config.server).unwrap_or_else(|error| {
        eprintln!("server startup error: {error}");
        process::exit(2);
    });
    let bound_addr = server.local_addr().unwrap_or_else(|error| {
        eprintln!("server startup error: failed to read local address: {error}");
        process::exit(2);
    });

    let shutdown_hooks = ShutdownHooks::install(ShutdownSignal::new()).unwrap_or_else(|error| {
        eprintln!("failed to install shutdown hooks: {error}");
        process::exit(2);
    });
    logger.info(
        Some("main::shutdown"),
        "Shutdown hooks installed for SIGINT/SIGTERM",
    );

    let mut janitor = Janitor::new(
        app_config.queues.janitor_interval_ms,
        Arc::clone(&repository),
        Arc::clone(&registry),
        Arc::clone(&logger),
    )
    .unwrap_or_else(|error| {
        eprintln!("janitor configuration error: {error}");
        process::exit(2);
    });
    if let Err(error) = janitor.start() {
        eprintln!("janitor startup error: {error}");
        process::exit(2);
    }

    let context = Arc::new(ServerContext::new(
        Arc::clone(&app_config),
        Arc::clone(&logger),
        codec,
        Arc::clone(&repository),
        Arc::clone(&registry),
        access,
        shutdown_hooks.signal().clone(),
    ));

    logger.log(
        LogLevel::Info,
        Some("main::server"),
        &format!(
            "{} v{} accepting connections",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        ),
        Some(json!({
            "bind_address": bound_addr.to_string(),
            "enabled": app_config.server.enabled,
            "max_connections": app_config.server.max_connections,
            "queues": repository.len(),
            "storage_engine": storage.engine().as_str(),
            "storage_path": storage.data_path().map(|path| path.display().to_string()),
        })),
    );

    server::serve(&server, Arc::clone(&context));

    logger.info(
        Some("main::shutdown"),
        "Shutdown signal received, starting graceful shutdown",
    );
    if let Err(error) = janitor.stop() {
        logger.warn(Some("main::shutdown"), &error.to_string());
    }
    repository.close_all();

    let mut exit_code = 0;
    if let Err(error) = repository.persist_to_storage() {
        logger.error(
            Some("main::shutdown"),
            &format!("queue persistence error during shutdown: {error}"),
        );
        exit_code = 2;
    }

    drop(server);
    logger.info(
        Some("main::shutdown"),
        "TCP server stopped and shutdown completed",
    );
    process::exit(exit_code);
}

fn load_config_or_exit() -> AppConfig {
    match AppConfig::load_with_discovery(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            process::exit(2);
        }
    }
}

fn ensure_posix_or_exit() {
    if !cfg!(unix) {
        eprintln!("unsupported platform: kasmq is intended for POSIX systems");
        process::exit(2);
    }
}
