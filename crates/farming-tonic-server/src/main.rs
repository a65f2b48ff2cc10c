use clap::Parser;
use farming_tonic_server::server::{
    config::{CliArgs, ServerConfig},
    service::FarmingService,
    telemetry::init_telemetry,
    transport::{Listener, serve, termination_signal},
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = ServerConfig::try_from(CliArgs::parse())?;
    let providers = init_telemetry()?;

    let listener = Listener::bind(&config).await?;
    log_startup_info(&config);

    let service = FarmingService::new(config);
    let served = serve(listener, service, termination_signal()).await;

    #[cfg(feature = "tracing")]
    if served.is_ok() {
        tracing::info!("farming service stopped");
    }

    providers.shutdown();
    served
}

fn log_startup_info(_config: &ServerConfig) {
    #[cfg(feature = "tracing")]
    if cfg!(debug_assertions) {
        tracing::info!("listening on {} with {:#?}", _config.server_addr, _config);
    } else {
        tracing::info!(
            addr = %_config.server_addr,
            uds = _config.uds,
            readings = _config.readings_per_stream,
            interval = ?_config.reading_interval,
            "listening"
        );
    }
}
