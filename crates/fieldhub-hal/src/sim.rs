//! Simulated report source for running the gateway without hardware.
//!
//! [`SimulatedSource`] pretends to hear a fixed set of devices.  Each one
//! first reports a random `position` and `magneticField`, then a new random
//! `position` every interval.  The addresses are unknown to the registry at
//! startup, so they exercise the normal auto-discovery path.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use fieldhub_hal::sim::SimulatedSource;
//! use fieldhub_types::Address;
//!
//! let source = SimulatedSource::new(vec![Address::new("MOCK:MAC:1")])
//!     .with_interval(Duration::from_millis(250));
//! assert_eq!(source.addresses().len(), 1);
//! ```

use std::time::Duration;

use async_trait::async_trait;
use fieldhub_types::{Address, StateChanges};
use futures_util::stream::{self, BoxStream, StreamExt};
use rand::Rng;
use serde_json::{Value, json};
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::source::{Report, ReportSource};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Report source that fabricates readings for a fixed address list.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    addresses: Vec<Address>,
    interval: Duration,
}

impl SimulatedSource {
    pub fn new(addresses: Vec<Address>) -> Self {
        Self {
            addresses,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Override the period of the `position` reports (builder-style).
    /// Zero is clamped to one millisecond.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }
}

#[async_trait]
impl ReportSource for SimulatedSource {
    fn name(&self) -> &str {
        "sim"
    }

    async fn reports(&self) -> BoxStream<'static, Report> {
        let initial: Vec<Report> = self
            .addresses
            .iter()
            .map(|address| {
                let mut changes = StateChanges::new();
                changes.insert("position".into(), random_vector());
                changes.insert("magneticField".into(), random_vector());
                Report::new(address.clone(), changes)
            })
            .collect();

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let addresses = self.addresses.clone();

        let updates = stream::unfold(ticker, move |mut ticker| {
            let addresses = addresses.clone();
            async move {
                ticker.tick().await;
                let batch: Vec<Report> = addresses
                    .into_iter()
                    .map(|address| {
                        let mut changes = StateChanges::new();
                        changes.insert("position".into(), random_vector());
                        Report::new(address, changes)
                    })
                    .collect();
                Some((stream::iter(batch), ticker))
            }
        })
        .flatten();

        stream::iter(initial).chain(updates).boxed()
    }
}

fn random_vector() -> Value {
    let mut rng = rand::thread_rng();
    json!({
        "x": rng.gen_range(0..5),
        "y": rng.gen_range(0..5),
        "z": rng.gen_range(0..5),
    })
}
