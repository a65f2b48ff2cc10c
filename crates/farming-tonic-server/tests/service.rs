use core::time::Duration;
use farming_tonic_core::proto::{
    FertilizerRequest, SoilSample, TemperatureRequest, WateringQuery,
    farm_service_client::FarmServiceClient, farm_service_server::FarmServiceServer,
};
use farming_tonic_server::server::{
    config::ServerConfig,
    service::FarmingService,
    transport::{Listener, serve},
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::{StreamExt, wrappers::{ReceiverStream, TcpListenerStream}};
use tonic::{
    Code,
    codec::CompressionEncoding,
    transport::{Channel, Server},
};

fn test_config() -> ServerConfig {
    ServerConfig {
        server_addr: "127.0.0.1:0".into(),
        reading_interval: Duration::from_millis(10),
        ..ServerConfig::default()
    }
}

async fn spawn_server(config: ServerConfig) -> (SocketAddr, FarmingService) {
    let listener = TcpListener::bind(&config.server_addr).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = FarmingService::new(config);

    let svc = service.clone();
    tokio::spawn(async move {
        Server::builder()
            .add_service(FarmServiceServer::new(svc))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    (addr, service)
}

async fn connect(addr: SocketAddr) -> FarmServiceClient<Channel> {
    FarmServiceClient::connect(format!("http://{addr}"))
        .await
        .unwrap()
}

fn sample(wet: f64, dry: f64) -> SoilSample {
    SoilSample {
        wet_soil_weight: wet,
        dry_soil_weight: dry,
    }
}

async fn wait_until_drained(service: &FarmingService) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while service.sessions().inflight() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sessions did not drain");
}

#[tokio::test]
async fn calculate_returns_nitrogen() {
    let (addr, _service) = spawn_server(test_config()).await;
    let mut client = connect(addr).await;

    let resp = client
        .calculate(FertilizerRequest { acres: 10.0 })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.total_nitrogen_needed_kg, 10.0 * 0.404686 * 2.5 * 90.0);
}

#[tokio::test]
async fn calculate_rejects_non_finite_acres() {
    let (addr, _service) = spawn_server(test_config()).await;
    let mut client = connect(addr).await;

    let status = client
        .calculate(FertilizerRequest { acres: f64::NAN })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn temperature_stream_sends_ten_readings() {
    let (addr, service) = spawn_server(test_config()).await;
    let mut client = connect(addr).await;

    let mut stream = client
        .temperature_stream(TemperatureRequest {
            sensor_id: "greenhouse-1".into(),
        })
        .await
        .unwrap()
        .into_inner();

    let mut readings = Vec::new();
    while let Some(reading) = stream.next().await {
        readings.push(reading.unwrap());
    }

    assert_eq!(readings.len(), 10);
    let mut previous = 20.0;
    for reading in &readings {
        assert_eq!(reading.sensor_id, "greenhouse-1");
        assert!((reading.temperature - previous).abs() <= 2.0 + 1e-9);
        assert!(!reading.timestamp.is_empty());
        previous = reading.temperature;
    }
    wait_until_drained(&service).await;
}

#[tokio::test]
async fn dropping_temperature_stream_releases_session() {
    let (addr, service) = spawn_server(test_config()).await;
    let mut client = connect(addr).await;

    let mut stream = client
        .temperature_stream(TemperatureRequest {
            sensor_id: "s".into(),
        })
        .await
        .unwrap()
        .into_inner();
    for _ in 0..3 {
        stream.next().await.unwrap().unwrap();
    }
    drop(stream);

    wait_until_drained(&service).await;
}

#[tokio::test]
async fn compute_average_over_samples() {
    let (addr, _service) = spawn_server(test_config()).await;
    let mut client = connect(addr).await;

    let resp = client
        .compute_average(tokio_stream::iter(vec![
            sample(110.0, 100.0),
            sample(5.0, 0.0),
            sample(120.0, 100.0),
        ]))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.soil_moisture_percentage, 15.0);

    let resp = client
        .compute_average(tokio_stream::iter(Vec::<SoilSample>::new()))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.soil_moisture_percentage, 0.0);
}

#[tokio::test]
async fn find_optimum_pairs_queries() {
    let (addr, _service) = spawn_server(test_config()).await;
    let mut client = connect(addr).await;

    let (tx, rx) = mpsc::channel(4);
    let mut responses = client
        .find_optimum(ReceiverStream::new(rx))
        .await
        .unwrap()
        .into_inner();

    for reading in [10.0, 20.0, 7.5] {
        tx.send(WateringQuery {
            moisture_reading: reading,
        })
        .await
        .unwrap();
        let rec = responses.next().await.unwrap().unwrap();
        assert_eq!(rec.input_moisture, reading);
        assert_eq!(rec.recommended_level, reading * 1.5);
    }

    drop(tx);
    assert!(responses.next().await.is_none());
}

#[tokio::test]
async fn all_shapes_run_concurrently() {
    let (addr, service) = spawn_server(test_config()).await;
    let client = connect(addr).await;

    let mut c1 = client.clone();
    let temperature = tokio::spawn(async move {
        let mut stream = c1
            .temperature_stream(TemperatureRequest {
                sensor_id: "a".into(),
            })
            .await?
            .into_inner();
        let mut n = 0;
        while let Some(r) = stream.next().await {
            assert_eq!(r?.sensor_id, "a");
            n += 1;
        }
        Ok::<_, tonic::Status>(n)
    });

    let mut c2 = client.clone();
    let average = tokio::spawn(async move {
        c2.compute_average(tokio_stream::iter(vec![sample(150.0, 100.0)]))
            .await
            .map(|r| r.into_inner().soil_moisture_percentage)
    });

    let mut c3 = client.clone();
    let optimum = tokio::spawn(async move {
        let queries = (1..=5).map(|n| WateringQuery {
            moisture_reading: f64::from(n),
        });
        let mut stream = c3
            .find_optimum(tokio_stream::iter(queries))
            .await?
            .into_inner();
        let mut levels = Vec::new();
        while let Some(r) = stream.next().await {
            levels.push(r?.recommended_level);
        }
        Ok::<_, tonic::Status>(levels)
    });

    let mut c4 = client.clone();
    let unary = c4
        .calculate(FertilizerRequest { acres: 1.0 })
        .await
        .unwrap()
        .into_inner();

    assert_eq!(temperature.await.unwrap().unwrap(), 10);
    assert_eq!(average.await.unwrap().unwrap(), 50.0);
    assert_eq!(
        optimum.await.unwrap().unwrap(),
        vec![1.5, 3.0, 4.5, 6.0, 7.5]
    );
    assert_eq!(unary.total_nitrogen_needed_kg, 0.404686 * 2.5 * 90.0);
    wait_until_drained(&service).await;
}

#[tokio::test]
async fn stream_timeout_is_reported() {
    let config = ServerConfig {
        stream_timeout: Some(Duration::from_secs(1)),
        ..test_config()
    };
    let (addr, _service) = spawn_server(config).await;
    let mut client = connect(addr).await;

    // Never send anything and never half-close.
    let (_tx, rx) = mpsc::channel::<SoilSample>(1);
    let status = client
        .compute_average(ReceiverStream::new(rx))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::DeadlineExceeded);
}

#[tokio::test]
async fn shutdown_ends_open_streams_with_cancelled() {
    let config = ServerConfig {
        reading_interval: Duration::from_millis(100),
        shutdown_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let (addr, service) = spawn_server(config).await;
    let mut client = connect(addr).await;

    let mut stream = client
        .temperature_stream(TemperatureRequest {
            sensor_id: "s".into(),
        })
        .await
        .unwrap()
        .into_inner();
    for _ in 0..2 {
        stream.next().await.unwrap().unwrap();
    }

    service.shutdown().await.unwrap();
    assert_eq!(service.sessions().inflight(), 0);

    // Readings already sent are delivered, then the stream ends with a status.
    let mut readings = 2;
    let status = loop {
        match stream.next().await {
            Some(Ok(_)) => readings += 1,
            Some(Err(status)) => break status,
            None => panic!("stream ended without a status"),
        }
    };
    assert_eq!(status.code(), Code::Cancelled);
    assert!(readings < 10);

    let status = client
        .calculate(FertilizerRequest { acres: 1.0 })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
}

#[tokio::test]
async fn served_router_compresses_and_drains_on_signal() {
    let config = test_config();
    let listener = Listener::bind(&config).await.unwrap();
    let addr = listener.tcp_addr().unwrap();
    let service = FarmingService::new(config);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve(listener, service.clone(), async {
        let _ = stop_rx.await;
    }));

    let mut client = connect(addr)
        .await
        .send_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Zstd);
    let resp = client
        .calculate(FertilizerRequest { acres: 2.0 })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(resp.total_nitrogen_needed_kg, 2.0 * 0.404686 * 2.5 * 90.0);
    drop(client);

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
    assert!(!service.sessions().is_accepting());
}
