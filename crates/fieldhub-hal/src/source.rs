//! The report-source adapter pattern.
//!
//! The gateway never speaks a field-bus or radio protocol itself.  Each
//! transport is wrapped in a [`ReportSource`] that decodes its traffic and
//! yields [`Report`]s; the coordinator consumes those reports without caring
//! where they came from.

use async_trait::async_trait;
use fieldhub_types::{Address, StateChanges};
use futures_util::stream::BoxStream;

/// A decoded observation of a device's presence and state.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub address: Address,
    /// Channels carried by this observation; may be empty for a bare
    /// presence report.
    pub changes: StateChanges,
}

impl Report {
    pub fn new(address: Address, changes: StateChanges) -> Self {
        Self { address, changes }
    }
}

/// Every transport adapter implements this trait.
#[async_trait]
pub trait ReportSource: Send + Sync {
    /// Short name used in logs, e.g. `"ble"` or `"sim"`.
    fn name(&self) -> &str;

    /// Live stream of decoded reports.  Ends when the transport shuts down.
    async fn reports(&self) -> BoxStream<'static, Report>;
}
