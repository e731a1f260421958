//! Simulated price feeds.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ratefeed_common::{AssetSymbol, RateTable};
use ratefeed_fx::{DataFeed, FxError, FxResult};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::scenario::FeedProfile;

/// A feed whose prices follow a bounded random walk.
pub struct SimulatedFeed {
    profile: FeedProfile,
    prices: Arc<RwLock<RateTable>>,
    rng: Arc<Mutex<StdRng>>,
    ticks: Arc<AtomicU64>,
    started: AtomicBool,
    ready: Arc<watch::Sender<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedFeed {
    /// Create a feed from its scenario description.
    pub fn new(profile: FeedProfile, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let prices = profile
            .prices
            .iter()
            .map(|(asset, price)| (AssetSymbol::new(asset), *price))
            .collect();
        let (ready, _) = watch::channel(false);

        Self {
            profile,
            prices: Arc::new(RwLock::new(prices)),
            rng: Arc::new(Mutex::new(rng)),
            ticks: Arc::new(AtomicU64::new(0)),
            started: AtomicBool::new(false),
            ready: Arc::new(ready),
            task: Mutex::new(None),
        }
    }

    /// Number of completed fetches.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn is_failing(&self) -> bool {
        matches!(self.profile.fail_after_ticks, Some(limit) if self.ticks() >= limit)
    }
}

/// Move every price by at most `volatility` in either direction.
fn step_prices(prices: &mut RateTable, rng: &mut StdRng, volatility: f64) {
    if volatility <= 0.0 {
        return;
    }
    for price in prices.values_mut() {
        let change = rng.gen_range(-volatility..=volatility);
        *price = (*price * (1.0 + change)).max(f64::MIN_POSITIVE);
    }
}

#[async_trait]
impl DataFeed for SimulatedFeed {
    fn name(&self) -> &str {
        &self.profile.name
    }

    async fn price_dict(&self) -> FxResult<RateTable> {
        if self.is_failing() {
            return Err(FxError::FeedUnavailable {
                feed: self.profile.name.clone(),
                reason: format!("simulated outage after {} ticks", self.ticks()),
            });
        }
        Ok(self.prices.read().clone())
    }

    fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn start(&self) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(feed = %self.profile.name, "Cannot start simulated feed outside a runtime");
                return;
            }
        };

        let prices = Arc::clone(&self.prices);
        let rng = Arc::clone(&self.rng);
        let ticks = Arc::clone(&self.ticks);
        let ready = Arc::clone(&self.ready);
        let warmup = Duration::from_millis(self.profile.warmup_ms);
        let tick = Duration::from_millis(self.profile.tick_ms.max(1));
        let volatility = self.profile.volatility;
        let name = self.profile.name.clone();

        let handle = runtime.spawn(async move {
            tokio::time::sleep(warmup).await;
            loop {
                step_prices(&mut prices.write(), &mut rng.lock(), volatility);
                let count = ticks.fetch_add(1, Ordering::SeqCst) + 1;
                if count == 1 {
                    info!(feed = %name, "Simulated feed ready");
                }
                ready.send_replace(true);
                debug!(feed = %name, tick = count, "Simulated prices updated");
                tokio::time::sleep(tick).await;
            }
        });

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
        self.started.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.started.store(false, Ordering::SeqCst);
    }

    async fn get_ready(&self) {
        let mut ready = self.ready.subscribe();
        let _ = ready.wait_for(|ready| *ready).await;
    }
}

impl Drop for SimulatedFeed {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
