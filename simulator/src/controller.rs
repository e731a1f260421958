//! Simulation controller.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use ratefeed_fx::{
    DataFeed, ExchangeRateConversion, FxEngineConfig, FxError, StaticConfigSource,
};
use tracing::{info, warn};

use crate::feed::SimulatedFeed;
use crate::metrics::SimulationMetrics;
use crate::scenario::{ConversionProbe, Scenario};

/// Build the engine and simulated feeds described by a scenario.
pub fn build_engine(
    scenario: &Scenario,
    settings: FxEngineConfig,
    seed: Option<u64>,
) -> anyhow::Result<(ExchangeRateConversion, Vec<Arc<SimulatedFeed>>)> {
    settings.validate().map_err(anyhow::Error::msg)?;

    let feeds: Vec<Arc<SimulatedFeed>> = scenario
        .feeds
        .iter()
        .enumerate()
        .map(|(i, profile)| {
            let feed_seed = seed.map(|s| s.wrapping_add(i as u64));
            Arc::new(SimulatedFeed::new(profile.clone(), feed_seed))
        })
        .collect();
    let data_feeds: Vec<Arc<dyn DataFeed>> = feeds
        .iter()
        .map(|feed| Arc::clone(feed) as Arc<dyn DataFeed>)
        .collect();

    let engine = ExchangeRateConversion::new(
        settings,
        Arc::new(StaticConfigSource::new(scenario.rates.clone())),
        data_feeds,
    );
    if engine.effective_config().is_empty() {
        warn!(scenario = %scenario.name, "Scenario has no usable exchange rate config");
    }

    Ok((engine, feeds))
}

/// Controls the simulation.
pub struct SimulationController {
    scenario: Scenario,
    engine: Arc<ExchangeRateConversion>,
    feeds: Vec<Arc<SimulatedFeed>>,
    metrics: Arc<RwLock<SimulationMetrics>>,
}

impl SimulationController {
    pub fn new(
        scenario: Scenario,
        engine: Arc<ExchangeRateConversion>,
        feeds: Vec<Arc<SimulatedFeed>>,
    ) -> Self {
        Self {
            scenario,
            engine,
            feeds,
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
        }
    }

    /// Start polling and report conversions every `report_every` until the
    /// duration elapses or Ctrl+C is received.
    pub async fn run(
        &self,
        report_every: Duration,
        duration: Option<Duration>,
    ) -> anyhow::Result<()> {
        info!(
            scenario = %self.scenario.name,
            description = %self.scenario.description,
            feeds = self.feeds.len(),
            "Running scenario"
        );
        self.engine.start()?;
        let ready = self.engine.ready_notifier();

        let deadline = duration.map(|d| tokio::time::Instant::now() + d);
        let mut ticker = tokio::time::interval(report_every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let expired = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = ticker.tick() => {
                    let is_ready = *ready.borrow();
                    if is_ready {
                        self.report();
                    } else {
                        info!("Waiting for the first exchange rate refresh");
                    }
                }
                _ = expired => break,
                result = tokio::signal::ctrl_c() => {
                    result?;
                    info!("Interrupted");
                    break;
                }
            }
        }

        self.engine.stop();
        Ok(())
    }

    /// Evaluate every conversion probe once.
    pub fn report(&self) {
        self.metrics.write().record_tick();

        for probe in &self.scenario.conversions {
            self.evaluate(probe);
        }

        for feed in &self.feeds {
            if let Some(age) = self.engine.cache().snapshot_age(feed.name()) {
                self.metrics.write().record_snapshot_age(age.num_milliseconds());
            }
        }
    }

    fn evaluate(&self, probe: &ConversionProbe) {
        let source = probe.source.as_deref();
        let result =
            self.engine
                .convert_token_value(probe.amount, &probe.from, &probe.to, source);

        match result {
            Ok(value) => {
                let usd = self
                    .engine
                    .adjust_token_rate(&probe.from, probe.amount, source)
                    .unwrap_or(f64::NAN);
                info!(
                    amount = probe.amount,
                    from = %probe.from,
                    to = %probe.to,
                    source = source.unwrap_or("config"),
                    value,
                    usd,
                    "Converted"
                );
                self.metrics.write().record_success();
            }
            Err(FxError::UnresolvableRate { from, to }) => {
                warn!(%from, %to, "Rate not known yet");
                self.metrics.write().record_unresolvable();
            }
            Err(e) => {
                warn!(error = %e, from = %probe.from, to = %probe.to, "Conversion failed");
                self.metrics.write().record_failure();
            }
        }
    }

    /// Get a copy of the metrics.
    pub fn get_metrics(&self) -> SimulationMetrics {
        self.metrics.read().clone()
    }

    pub fn engine(&self) -> &ExchangeRateConversion {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> FxEngineConfig {
        FxEngineConfig {
            update_interval: Duration::from_secs(1),
            feed_ready_timeout: Duration::from_secs(2),
            ..FxEngineConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_basic_scenario_converts() {
        let scenario = Scenario::load("basic").unwrap();
        let (engine, feeds) = build_engine(&scenario, settings(), Some(42)).unwrap();
        let controller = SimulationController::new(scenario, Arc::new(engine), feeds);

        controller
            .run(Duration::from_secs(1), Some(Duration::from_secs(5)))
            .await
            .unwrap();

        let metrics = controller.get_metrics();
        assert!(metrics.ticks >= 4);
        assert!(metrics.successful_conversions > 0);
        assert_eq!(metrics.failed_conversions, 0);
        assert!(!controller.engine().is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_source_counts_as_failure() {
        let mut scenario = Scenario::load("basic").unwrap();
        scenario.conversions = vec![ConversionProbe {
            amount: 1.0,
            from: "BTC".to_string(),
            to: "USDT".to_string(),
            source: Some("nowhere".to_string()),
        }];
        let (engine, feeds) = build_engine(&scenario, settings(), Some(42)).unwrap();
        let controller = SimulationController::new(scenario, Arc::new(engine), feeds);

        controller.engine().start().unwrap();
        controller.report();

        let metrics = controller.get_metrics();
        assert_eq!(metrics.failed_conversions, 1);
        assert_eq!(metrics.success_rate(), 0.0);
        controller.engine().stop();
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let scenario = Scenario::load("basic").unwrap();
        let settings = FxEngineConfig {
            update_interval: Duration::ZERO,
            ..FxEngineConfig::default()
        };
        assert!(build_engine(&scenario, settings, None).is_err());
    }
}
