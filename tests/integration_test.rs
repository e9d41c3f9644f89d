use axum::{http::StatusCode, routing::get, Router};
use serde_json::json;
use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::{net::TcpListener, sync::oneshot, time::sleep};
use tracing::level_filters::LevelFilter;

use homewizard_bridge::{
    bridge::StartupError, config::Config, service::MeterService, BusHandle, Phase, Value,
};

/// Mock HomeWizard kWh meter serving `/api/v1/data`
struct MockMeter {
    power: Mutex<f64>,
    import_kwh: Mutex<f64>,
    request_count: AtomicU32,
    send_empty: AtomicBool,
}

impl MockMeter {
    fn new() -> Self {
        Self {
            power: Mutex::new(0.0),
            import_kwh: Mutex::new(0.0),
            request_count: AtomicU32::new(0),
            send_empty: AtomicBool::new(false),
        }
    }

    fn set_power(&self, power: f64) {
        *self.power.lock().unwrap() = power;
    }

    fn set_import(&self, kwh: f64) {
        *self.import_kwh.lock().unwrap() = kwh;
    }

    fn set_send_empty(&self, send_empty: bool) {
        self.send_empty.store(send_empty, Ordering::Relaxed);
    }

    fn get_request_count(&self) -> u32 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn create_router(self: Arc<Self>) -> Router {
        Router::new().route(
            "/api/v1/data",
            get({
                let meter = self.clone();
                move || async move {
                    meter.request_count.fetch_add(1, Ordering::Relaxed);

                    if meter.send_empty.load(Ordering::Relaxed) {
                        return (StatusCode::OK, String::new());
                    }

                    let power = *meter.power.lock().unwrap();
                    let body = json!({
                        "wifi_ssid": "test",
                        "unique_id": "5c2fafabcdef",
                        "active_voltage_v": 230.0,
                        "active_current_a": power / 230.0,
                        "active_power_w": power,
                        "total_power_import_kwh": *meter.import_kwh.lock().unwrap(),
                        "total_power_export_kwh": 3.2
                    });
                    (StatusCode::OK, body.to_string())
                }
            }),
        )
    }
}

async fn start_mock_meter() -> (Arc<MockMeter>, SocketAddr, oneshot::Sender<()>) {
    let meter = Arc::new(MockMeter::new());
    let app = meter.clone().create_router();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        let server = axum::serve(listener, app);
        tokio::select! {
            _ = server => {},
            _ = shutdown_rx => {
                println!("Mock meter shutting down");
            }
        }
    });

    (meter, addr, shutdown_tx)
}

fn test_config(addr: SocketAddr, role: &str, phase: Phase) -> Config {
    Config {
        device_instance: 44,
        custom_name: "Garage PV".to_string(),
        role: role.to_string(),
        phase,
        position: 0,
        sign_of_life_interval: Some(Duration::from_secs(1)),
        access_type: "OnPremise".to_string(),
        host: Some(addr.to_string()),
        log_level: LevelFilter::DEBUG,
        unknown_log_level: None,
    }
}

async fn number(bus: &BusHandle, path: &str) -> f64 {
    bus.get(path)
        .await
        .unwrap()
        .and_then(|v| v.as_f64())
        .unwrap_or_else(|| panic!("{path} has no numeric value"))
}

#[tokio::test]
async fn test_full_integration() {
    let (meter, addr, _shutdown) = start_mock_meter().await;
    meter.set_power(460.0);
    meter.set_import(100.5);

    let (service, bus) = MeterService::start(test_config(addr, "pvinverter", Phase::L2))
        .await
        .expect("service should start");
    assert_eq!(
        service.bridge().service_name(),
        "com.victronenergy.pvinverter.http_44"
    );
    tokio::spawn(service.run());

    // Test 1: readings land on the configured phase only
    sleep(Duration::from_millis(1600)).await;

    assert_eq!(number(&bus, "/Ac/L2/Voltage").await, 230.0);
    assert_eq!(number(&bus, "/Ac/L2/Current").await, 2.0);
    assert_eq!(number(&bus, "/Ac/L2/Power").await, 460.0);
    assert_eq!(number(&bus, "/Ac/L1/Power").await, 0.0);
    assert_eq!(number(&bus, "/Ac/L3/Voltage").await, 0.0);
    assert_eq!(number(&bus, "/Ac/Power").await, 460.0);
    assert_eq!(number(&bus, "/Ac/Energy/Forward").await, 100.5);
    assert_eq!(number(&bus, "/Ac/Energy/Reverse").await, 3.2);
    assert_eq!(
        bus.get_text("/Ac/Power").await.unwrap().as_deref(),
        Some("460.0W")
    );
    assert_eq!(
        bus.get("/Serial").await.unwrap(),
        Some(Value::from("5c2fafabcdef"))
    );
    let index_before_failure = number(&bus, "/UpdateIndex").await;
    assert!(index_before_failure >= 2.0);

    // Test 2: an empty answer zeroes power but keeps the energy totals
    meter.set_send_empty(true);
    sleep(Duration::from_millis(1200)).await;

    assert_eq!(number(&bus, "/Ac/Power").await, 0.0);
    for phase in ["L1", "L2", "L3"] {
        assert_eq!(number(&bus, &format!("/Ac/{phase}/Power")).await, 0.0);
    }
    assert_eq!(number(&bus, "/Ac/Energy/Forward").await, 100.5);
    assert_eq!(number(&bus, "/Ac/Energy/Reverse").await, 3.2);
    assert!(number(&bus, "/UpdateIndex").await > index_before_failure);

    // Test 3: polling recovers on its own
    meter.set_send_empty(false);
    meter.set_power(920.0);
    meter.set_import(101.0);
    sleep(Duration::from_millis(1200)).await;

    assert_eq!(number(&bus, "/Ac/Power").await, 920.0);
    assert_eq!(number(&bus, "/Ac/L2/Power").await, 920.0);
    assert_eq!(number(&bus, "/Ac/Energy/Forward").await, 101.0);
    assert!(meter.get_request_count() > 5);

    // Test 4: write-backs are accepted on measurements only
    assert!(bus.write("/Ac/L1/Energy/Forward", 12.0).await.unwrap());
    assert_eq!(number(&bus, "/Ac/L1/Energy/Forward").await, 12.0);
    assert!(!bus.write("/Serial", "forged").await.unwrap());
}

#[tokio::test]
async fn test_changes_are_notified() {
    let (meter, addr, _shutdown) = start_mock_meter().await;
    meter.set_power(100.0);

    let (service, bus) = MeterService::start(test_config(addr, "grid", Phase::L1))
        .await
        .unwrap();
    let mut changes = bus.subscribe();
    tokio::spawn(service.run());

    let mut saw_power = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !saw_power {
        let Ok(change) = tokio::time::timeout_at(deadline, changes.recv())
            .await
            .expect("no change notification in time")
        else {
            // Lagged behind a burst of changes, keep reading
            continue;
        };
        if change.path.to_string() == "/Ac/Power" {
            assert_eq!(change.value, Value::Float(100.0));
            assert_eq!(change.text, "100.0W");
            saw_power = true;
        }
    }
}

#[tokio::test]
async fn test_unsupported_role_stops_startup() {
    let (meter, addr, _shutdown) = start_mock_meter().await;

    let result = MeterService::start(test_config(addr, "unsupported_value", Phase::L1)).await;

    assert!(matches!(result, Err(StartupError::UnsupportedRole(_))));
    assert_eq!(meter.get_request_count(), 0);
}

#[test]
fn test_unreachable_meter_is_fatal_at_startup() {
    let config = Config {
        host: Some("127.0.0.1:1".to_string()),
        ..test_config("127.0.0.1:1".parse().unwrap(), "pvinverter", Phase::L1)
    };

    let result = tokio_test::block_on(MeterService::start(config));

    assert!(matches!(result, Err(StartupError::Fetch(_))));
}
