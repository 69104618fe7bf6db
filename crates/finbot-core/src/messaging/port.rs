use async_trait::async_trait;

use crate::{domain::SenderId, Result};

/// Outbound side of a messenger.
///
/// Implementations perform exactly one protocol write per call and report
/// failures; they do not retry delivery of the reply itself.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_reply(&self, recipient: &SenderId, text: &str) -> Result<()>;
}
