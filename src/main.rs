use std::process::ExitCode;

use sensorbee::{
    config::Config,
    core::{context::RunContext, lifecycle::ReportingLifecycle, publisher::MqttConnector},
    logger::LoggerManager,
    print_error,
    sensors::build_service,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span};

#[tokio::main]
async fn main() -> ExitCode {
    let cfg = match Config::new() {
        Ok(cfg) => cfg,
        Err(e) => {
            print_error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut logger_manager = match LoggerManager::new(cfg.logger.clone()) {
        Ok(manager) => manager,
        Err(e) => {
            print_error!("Failed to setup Log Manager: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logger_manager.init() {
        print_error!("Failed to init Log Manager: {}", e);
        return ExitCode::FAILURE;
    }
    info!("Starting sensorbee version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", cfg.logger.level);
    debug!("{:#?}", cfg.transport);

    let service = match build_service(&cfg) {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to set up {} sensor: {}", cfg.sensor.kind, e);
            return ExitCode::FAILURE;
        }
    };

    let lifecycle = ReportingLifecycle::new(
        service,
        Box::new(MqttConnector::new(cfg.transport.clone())),
    )
    .with_read_failure_budget(cfg.reporting.max_consecutive_read_failures);

    let ctx = RunContext::new(info_span!(
        "sensor",
        name = %cfg.sensor_name(),
        kind = %cfg.sensor.kind
    ));
    tokio::spawn(cancel_on_signal(ctx.cancel_token()));

    match lifecycle.run(&ctx).await {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(_) => {
            if let Some(reason) = ctx.shutdown().reason().await {
                error!("Stopped: {reason}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn cancel_on_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
                    _ = terminate.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl+C, shutting down...");
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
        }
    }
    token.cancel();
}
