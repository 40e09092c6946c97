use anyhow::Result;
use energy_monitor_sim::{config, controller, telemetry};
use config::Config;
use telemetry::init_tracing;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::load()?;
    let _log_guard = init_tracing(&cfg.logging);

    let app_state = controller::AppState::new(cfg.clone())?;

    info!(
        building = %cfg.simulation.building_id,
        prefix = %cfg.simulation.topic_prefix,
        areas = app_state.registry.len(),
        interval_s = app_state.interval.seconds(),
        transport = ?cfg.transport.mode,
        run_id = %app_state.run_id,
        "starting energy monitor simulator"
    );

    let cancel = CancellationToken::new();
    let tasks = controller::spawn_simulator_tasks(&app_state, cancel.clone());

    telemetry::shutdown_signal().await;
    cancel.cancel();
    tasks.join().await;

    warn!("shutdown complete");
    Ok(())
}
