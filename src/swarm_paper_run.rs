use log::{info, warn};
use rust_decimal::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use swarm_control::{
    init_logging,
    strategies::{MeanReversionProvider, TrendProvider},
    ControlConfig, PaperGateway, PersistedState, Price, SignalProvider, Symbol, TradingController,
};
use tokio::time::{interval, Duration};

/// Deterministic oscillating price path with a slow drift, so the providers see both trends
/// and reversions
fn synthetic_mid(base: f64, step: u64) -> f64 {
    let t = step as f64;
    base * (1.0 + 0.02 * (t / 15.0).sin() + 0.0005 * t)
}

/// Usage: swarm_paper_run [seconds] [config.json] [state.json]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging("info", None)?;

    let args: Vec<String> = std::env::args().collect();
    let run_secs: u64 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(30);
    let mut config = match args.get(2) {
        Some(path) => ControlConfig::from_json_file(path)?,
        None => ControlConfig {
            symbols: vec![Symbol::new("BTCUSDT")],
            cycle_interval_ms: 1_000,
            consensus_threshold: 0.6,
            initial_balance: Decimal::new(10_000, 0),
            ..ControlConfig::default()
        },
    };
    config
        .strategy_params
        .entry("trend_fast_period".to_string())
        .or_insert(5.0);
    config
        .strategy_params
        .entry("trend_slow_period".to_string())
        .or_insert(15.0);
    config
        .strategy_params
        .entry("mr_period".to_string())
        .or_insert(10.0);
    let state_path = args.get(3).map(PathBuf::from);

    let gateway = Arc::new(PaperGateway::new(
        config.quote_asset.clone(),
        config.initial_balance,
    ));
    let providers: Vec<Arc<dyn SignalProvider>> = vec![
        Arc::new(TrendProvider::new()),
        Arc::new(MeanReversionProvider::new()),
    ];

    let controller = match state_path.as_ref().filter(|p| p.exists()) {
        Some(path) => {
            let persisted = PersistedState::load_from_file(path)?;
            TradingController::restore(gateway.clone(), providers, persisted)
        }
        None => TradingController::new(gateway.clone(), providers),
    };

    // quote feed
    let feed_gateway = gateway.clone();
    let feed_symbols = config.symbols.clone();
    let feed_interval = Duration::from_millis(config.cycle_interval_ms.max(2) / 2);
    let feed = tokio::spawn(async move {
        let mut ticker = interval(feed_interval);
        let mut step = 0u64;
        loop {
            ticker.tick().await;
            for (i, symbol) in feed_symbols.iter().enumerate() {
                let mid = synthetic_mid(100.0 * (i as f64 + 1.0), step);
                let half_spread = mid * 0.0005;
                let (Some(bid), Some(ask)) = (
                    Decimal::from_f64(mid - half_spread),
                    Decimal::from_f64(mid + half_spread),
                ) else {
                    continue;
                };
                feed_gateway
                    .set_quote(
                        symbol.clone(),
                        Price::new(bid.round_dp(2)),
                        Price::new(ask.round_dp(2)),
                    )
                    .await;
            }
            step += 1;
        }
    });

    let started = controller.start(config).await;
    if !started.success {
        feed.abort();
        return Err(started.message.into());
    }
    info!("{}", started.message);

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(run_secs)) => {
            let stopped = controller.stop().await;
            if stopped.success {
                info!("{}", stopped.message);
            } else {
                warn!("Stop failed: {}", stopped.message);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            let result = controller.emergency_stop().await;
            warn!("{}", result.message);
            let reset = controller.reset().await;
            if reset.success {
                info!("{}", reset.message);
            } else {
                warn!("Reset failed: {}", reset.message);
            }
        }
    }
    feed.abort();

    let status = controller.status().await;
    println!("phase: {}", status.phase);
    println!("cycles: {}", status.iteration_count);
    if let Some(err) = &status.last_error {
        println!("last error: {}", err);
    }
    println!("{}", controller.performance_report().await.report());

    if let Some(path) = state_path {
        controller.export_state().await?.save_to_file(&path)?;
        info!("State written to {}", path.display());
    }
    Ok(())
}
