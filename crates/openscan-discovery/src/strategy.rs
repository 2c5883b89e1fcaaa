//! The contract every discovery strategy implements.

use crate::error::Result;
use async_trait::async_trait;
use openscan_core::ScannerDescriptor;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Channel candidates are reported on, in arrival order.
pub type CandidateSink = UnboundedSender<ScannerDescriptor>;

/// One way of finding scanners on the network.
///
/// Strategies push candidates into the sink as soon as they resolve them and
/// must stop promptly once `cancel` fires.
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Run until the strategy is exhausted or cancelled.
    ///
    /// # Errors
    /// Returns error if the strategy cannot run at all.
    async fn run(&self, sink: CandidateSink, cancel: CancellationToken) -> Result<()>;
}
