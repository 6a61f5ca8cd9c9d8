use super::types::CollectorResult;

/// Contract for anything that samples one piece of device state.
///
/// Producers are cheap to call repeatedly and keep no state between calls
/// beyond what they were constructed with. Errors are reported, never
/// panicked, so the caller can degrade the affected field.
#[async_trait::async_trait]
pub trait DataProducer: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    async fn produce(&self) -> CollectorResult<Self::Output>;
}
