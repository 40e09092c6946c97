//! End-to-end command and telemetry flows over the loopback broker.

use std::sync::Arc;
use std::time::Duration;

use energy_monitor_sim::config::Config;
use energy_monitor_sim::controller::{AppState, FLOOD_PASSES};
use energy_monitor_sim::domain::{Quality, RelayState, SensorReading, SimMode};
use energy_monitor_sim::transport::{LoopbackTransport, Transport};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Harness {
    state: AppState,
    transport: Arc<LoopbackTransport>,
    cancel: CancellationToken,
    lifecycle: JoinHandle<()>,
}

impl Harness {
    async fn start() -> Self {
        let mut cfg = Config::default();
        cfg.simulation.random_seed = Some(11);
        cfg.simulation.interval_seconds = 1.0;

        let transport = Arc::new(LoopbackTransport::new());
        let state = AppState::with_transport(cfg, transport.clone()).unwrap();

        let cancel = CancellationToken::new();
        let lifecycle = {
            let lifecycle = state.lifecycle();
            let cancel = cancel.clone();
            tokio::spawn(async move { lifecycle.run(cancel).await })
        };

        let harness = Self {
            state,
            transport,
            cancel,
            lifecycle,
        };
        harness
            .wait_for(|h| h.transport.subscriptions().len() == 2)
            .await;
        harness
    }

    async fn wait_for(&self, condition: impl Fn(&Self) -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition(self) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn send(&self, topic: &str, payload: &str) {
        assert!(self.transport.inject(topic, payload.as_bytes().to_vec()));
    }

    fn readings(&self, area: &str) -> Vec<SensorReading> {
        self.transport
            .published_on(&format!("edificio/{area}/consumo"))
            .iter()
            .map(|m| serde_json::from_slice(&m.payload).unwrap())
            .collect()
    }

    fn json_on(&self, topic: &str) -> Vec<serde_json::Value> {
        self.transport
            .published_on(topic)
            .iter()
            .map(|m| serde_json::from_slice(&m.payload).unwrap())
            .collect()
    }

    async fn stop(self) -> Arc<LoopbackTransport> {
        self.cancel.cancel();
        self.lifecycle.await.unwrap();
        self.transport
    }
}

#[tokio::test]
async fn test_online_status_is_retained_on_connect() {
    let harness = Harness::start().await;

    let status = harness.transport.retained("edificio/system/status").unwrap();
    let status: serde_json::Value = serde_json::from_slice(&status.payload).unwrap();
    assert_eq!(status["status"], "online");
    assert_eq!(status["building"], "edificio_principal");
    assert_eq!(status["run_id"], harness.state.run_id.to_string());

    let transport = harness.stop().await;
    let status = transport.retained("edificio/system/status").unwrap();
    let status: serde_json::Value = serde_json::from_slice(&status.payload).unwrap();
    assert_eq!(status["status"], "offline");
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_crash_leaves_offline_will() {
    let harness = Harness::start().await;
    harness.transport.simulate_crash();

    let status = harness.transport.retained("edificio/system/status").unwrap();
    let status: serde_json::Value = serde_json::from_slice(&status.payload).unwrap();
    assert_eq!(status["status"], "offline");
    harness.stop().await;
}

#[tokio::test]
async fn test_maintenance_cut_yields_zero_readings_and_single_ack() {
    let harness = Harness::start().await;
    harness.send(
        "edificio/biblioteca/comando",
        r#"{"accion": "cut_power", "motivo": "maintenance", "origen": "n8n"}"#,
    );
    harness
        .wait_for(|h| h.state.relays.get("biblioteca").unwrap() == RelayState::Off)
        .await;

    let publisher = harness.state.publisher();
    for _ in 0..5 {
        publisher.tick().await;
    }

    let readings = harness.readings("biblioteca");
    assert_eq!(readings.len(), 5);
    for reading in &readings {
        assert_eq!(reading.kwh, 0.0);
        assert_eq!(reading.relay_state, RelayState::Off);
        assert_eq!(reading.relay_state.label(), "OFF");
    }
    assert!(readings.windows(2).all(|w| w[1].sequence == w[0].sequence + 1));
    assert!(harness.readings("cafeteria").iter().all(|r| r.kwh > 0.0));

    let acks = harness.json_on("edificio/system/relay_ack");
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0]["area"], "biblioteca");
    assert_eq!(acks[0]["relay_state"], "OFF");
    assert_eq!(acks[0]["motivo"], "maintenance");

    harness.stop().await;
}

#[tokio::test]
async fn test_flood_mode_over_protocol() {
    let harness = Harness::start().await;
    harness.send(
        "edificio/cafeteria/comando",
        r#"{"accion": "set_mode", "modo": "flood", "origen": "qa"}"#,
    );
    harness
        .wait_for(|h| h.state.slots.mode("cafeteria").unwrap() == SimMode::Flood)
        .await;

    let report = harness.state.publisher().tick().await;
    assert_eq!(report.passes, FLOOD_PASSES);

    assert_eq!(harness.readings("cafeteria").len(), FLOOD_PASSES);
    for area in harness.state.registry.ids().filter(|a| *a != "cafeteria") {
        assert_eq!(harness.readings(area).len(), 1, "{area}");
    }
    assert_eq!(harness.json_on("edificio/summary").len(), 1);

    let config_acks = harness.json_on("edificio/system/config_ack");
    assert_eq!(config_acks.len(), 1);
    assert_eq!(config_acks[0]["modo"], "flood");

    harness.stop().await;
}

#[tokio::test]
async fn test_system_wide_cut_and_restore() {
    let harness = Harness::start().await;
    harness.send("edificio/system/comando", r#"{"accion": "corte_emergencia"}"#);
    harness
        .wait_for(|h| h.json_on("edificio/system/relay_ack").len() == 1)
        .await;

    let report = harness.state.relays.snapshot();
    assert!(report.relay_states.values().all(|e| e.state == RelayState::Off));
    let ack = &harness.json_on("edificio/system/relay_ack")[0];
    assert_eq!(ack["area"], "system");
    assert_eq!(ack["origen"], "desconocido");

    harness.send(
        "edificio/system/comando",
        r#"{"accion": "restore_power", "area": "all"}"#,
    );
    harness
        .wait_for(|h| h.json_on("edificio/system/relay_ack").len() == 2)
        .await;
    let report = harness.state.relays.snapshot();
    assert!(report.relay_states.values().all(|e| e.state == RelayState::On));

    harness.stop().await;
}

#[tokio::test]
async fn test_rejected_commands_leave_state_untouched() {
    let harness = Harness::start().await;
    let before = harness.state.relays.snapshot().relay_states;

    harness.send("edificio/sotano/comando", r#"{"accion": "cut_power"}"#);
    harness.send("edificio/system/comando", r#"{"accion": "launch"}"#);
    harness.send("edificio/system/comando", "garbage");
    // A valid query afterwards proves the handler is still serving
    harness.send("edificio/system/comando", r#"{"accion": "status_rele"}"#);
    harness
        .wait_for(|h| h.json_on("edificio/system/relay_status").len() == 1)
        .await;

    assert!(harness.json_on("edificio/system/relay_ack").is_empty());
    assert_eq!(harness.state.relays.snapshot().relay_states, before);

    let status = &harness.json_on("edificio/system/relay_status")[0];
    assert_eq!(status["relay_states"].as_object().unwrap().len(), 10);

    harness.stop().await;
}

#[tokio::test]
async fn test_set_interval_is_clamped_and_acknowledged() {
    let harness = Harness::start().await;
    harness.send(
        "edificio/system/comando",
        r#"{"accion": "set_interval", "intervalo": 120}"#,
    );
    harness
        .wait_for(|h| h.json_on("edificio/system/config_ack").len() == 1)
        .await;

    assert_eq!(harness.state.interval.seconds(), 60.0);
    assert_eq!(harness.json_on("edificio/system/config_ack")[0]["intervalo"], 60.0);
    harness.stop().await;
}

#[tokio::test]
async fn test_ticks_continue_while_disconnected() {
    let harness = Harness::start().await;
    harness.transport.set_reachable(false);

    let report = harness.state.publisher().tick().await;
    assert_eq!(report.readings, 10);
    assert_eq!(report.published, 0);
    assert_eq!(report.skipped, 11);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_system_cuts_racing_ticks_never_tear_a_reading() {
    const TICKS: usize = 40;
    const COMMANDS: usize = 40;

    let harness = Harness::start().await;
    let publisher = Arc::new(harness.state.publisher());
    let ticking = {
        let publisher = publisher.clone();
        tokio::spawn(async move {
            for _ in 0..TICKS {
                publisher.tick().await;
                tokio::task::yield_now().await;
            }
        })
    };

    for i in 0..COMMANDS {
        let action = if i % 2 == 0 { "cut_power" } else { "restore_power" };
        harness.send(
            "edificio/system/comando",
            &format!(r#"{{"accion": "{action}", "origen": "race"}}"#),
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    ticking.await.unwrap();
    harness
        .wait_for(|h| h.json_on("edificio/system/relay_ack").len() == COMMANDS)
        .await;

    for area in harness.state.registry.ids() {
        let readings = harness.readings(area);
        assert_eq!(readings.len(), TICKS, "{area}");
        for reading in &readings {
            let off = reading.relay_state == RelayState::Off;
            assert_eq!(off, reading.quality == Quality::RelayOff, "{area} #{}", reading.sequence);
            if off {
                assert_eq!(reading.kwh, 0.0, "{area} #{}", reading.sequence);
                assert_eq!(reading.mode, "relay_off");
            } else {
                assert!(reading.kwh > 0.0, "{area} #{}", reading.sequence);
            }
        }
        assert!(
            readings.windows(2).all(|w| w[1].sequence > w[0].sequence),
            "{area} sequences out of order"
        );
    }

    // Even count of alternating commands ends with power restored
    let report = harness.state.relays.snapshot();
    assert!(report.relay_states.values().all(|e| e.state == RelayState::On));
    harness.stop().await;
}
