//! Hand-off of archived editions to downstream consumers

use crate::error::Result;
use crate::types::{ArchiveEntry, RawContent};
use async_trait::async_trait;

/// Receives each validated edition after it has been archived
///
/// Used for preview generation and similar follow-up work. A sink failure
/// is logged and never changes the run's outcome.
#[async_trait]
pub trait EditionSink: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Consume the archived edition
    async fn accept(&self, entry: &ArchiveEntry, content: &RawContent) -> Result<()>;
}
