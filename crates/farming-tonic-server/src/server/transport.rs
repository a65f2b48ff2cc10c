//! Listener binding and the tonic router the binary serves.
//!
//! [`serve`] mounts the farming service next to gRPC health and reflection,
//! behind CORS and gRPC-web so browsers can call it directly. When the
//! `shutdown` future resolves, health flips to `NOT_SERVING`, live sessions are
//! drained through [`FarmingService::shutdown`], and only then does the server
//! stop accepting connections.

use crate::server::{config::ServerConfig, service::FarmingService};
use anyhow::Context;
use farming_tonic_core::proto::{FILE_DESCRIPTOR_SET, farm_service_server::FarmServiceServer};
use futures::Stream;
use std::net::SocketAddr;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{
    codec::CompressionEncoding,
    transport::{Server, server::Connected},
};
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

type FarmServer = FarmServiceServer<FarmingService>;

/// Where the server accepts connections.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    /// Bound socket file, removed again once serving stops.
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: String,
    },
}

impl Listener {
    /// Binds `config.server_addr`, as a socket path when `config.uds` is set.
    pub async fn bind(config: &ServerConfig) -> anyhow::Result<Self> {
        let addr = &config.server_addr;
        if !config.uds {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;
            return Ok(Self::Tcp(listener));
        }

        #[cfg(unix)]
        {
            let listener = tokio::net::UnixListener::bind(addr)
                .with_context(|| format!("failed to bind unix socket {addr}"))?;
            Ok(Self::Unix {
                listener,
                path: addr.clone(),
            })
        }
        #[cfg(not(unix))]
        anyhow::bail!("Unix domain sockets are not supported on this platform")
    }

    /// Bound TCP address; `None` for a socket file.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Self::Unix { .. } => None,
        }
    }
}

/// Serves `service` on `listener` until `shutdown` resolves and sessions drain.
pub async fn serve<F>(listener: Listener, service: FarmingService, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    match listener {
        Listener::Tcp(listener) => {
            serve_incoming(TcpListenerStream::new(listener), service, shutdown).await
        }
        #[cfg(unix)]
        Listener::Unix { listener, path } => {
            let incoming = tokio_stream::wrappers::UnixListenerStream::new(listener);
            let res = serve_incoming(incoming, service, shutdown).await;
            // A panic can still leave the file behind.
            let _ = std::fs::remove_file(&path);
            res
        }
    }
}

async fn serve_incoming<I, IO, IE, F>(
    incoming: I,
    service: FarmingService,
    shutdown: F,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
    F: Future<Output = ()>,
{
    let (health, health_service) = tonic_health::server::health_reporter();
    health.set_serving::<FarmServer>().await;

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let farm = compressed(FarmServiceServer::new(service.clone()));
    let drained = async move {
        shutdown.await;
        health.set_not_serving::<FarmServer>().await;
        if let Err(_e) = service.shutdown().await {
            #[cfg(feature = "tracing")]
            tracing::error!("session drain failed: {_e}");
        }
    };

    Server::builder()
        .accept_http1(true)
        .http2_adaptive_window(Some(true))
        .layer(ServiceBuilder::new().layer(cors).layer(GrpcWebLayer::new()))
        .add_service(health_service)
        .add_service(reflection)
        .add_service(farm)
        .serve_with_incoming_shutdown(incoming, drained)
        .await?;

    Ok(())
}

fn compressed(server: FarmServer) -> FarmServer {
    [
        CompressionEncoding::Zstd,
        CompressionEncoding::Gzip,
        CompressionEncoding::Deflate,
    ]
    .into_iter()
    .fold(server, |server, encoding| {
        server.send_compressed(encoding).accept_compressed(encoding)
    })
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
///
/// A handler that fails to install never fires; the other one still does.
pub async fn termination_signal() {
    let ctrl_c = async {
        if let Err(_e) = tokio::signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("failed to install Ctrl+C handler: {_e}");
            futures::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("failed to install SIGTERM handler: {_e}");
                futures::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = futures::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }

    #[cfg(feature = "tracing")]
    tracing::info!("shutdown signal received, draining sessions");
}
