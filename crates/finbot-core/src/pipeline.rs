//! Per-event orchestration: filter, classify, persist, reply.
//!
//! Every event that survives the filters gets exactly one reply:
//! - classification failed: [`CLASSIFY_FAILED_REPLY`]
//! - persisting failed (ensure or every append attempt): [`PERSIST_FAILED_REPLY`]
//! - otherwise the classifier's own summary.
//!
//! Filtered events get no reply and touch no gateway.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    classifier::Classifier,
    domain::{ClassifiedRecord, OutboundReply, SenderId},
    errors::PersistError,
    messaging::{
        port::MessagingPort,
        types::{InboundEvent, TransportEvent},
    },
    persistence::PersistenceGateway,
    retry::{RetryExhausted, RetryPolicy},
};

pub const CLASSIFY_FAILED_REPLY: &str =
    "Desculpe, não consegui processar sua solicitação agora. Tente novamente mais tarde.";

pub const PERSIST_FAILED_REPLY: &str = "Sua transação foi processada, mas não foi possível registrá-la na planilha. Por favor, anote os detalhes e tente novamente mais tarde.";

/// Why an event was dropped without a reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterReason {
    FromSelf,
    Group,
    ForeignSender,
    EmptyText,
}

/// Which reply an event ended with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyKind {
    Summary,
    ClassifyFailed,
    PersistFailed,
}

/// Terminal state of one pipeline run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    Filtered(FilterReason),
    /// `delivered` is false when the transport rejected the reply.
    Replied { kind: ReplyKind, delivered: bool },
}

#[derive(Debug)]
enum PersistFailure {
    Ensure(PersistError),
    Append(RetryExhausted<PersistError>),
}

impl std::fmt::Display for PersistFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistFailure::Ensure(e) => write!(f, "ensure destination: {e}"),
            PersistFailure::Append(e) => write!(f, "append: {e}"),
        }
    }
}

pub struct EventPipeline {
    classifier: Arc<dyn Classifier>,
    persistence: Arc<PersistenceGateway>,
    messenger: Arc<dyn MessagingPort>,
    retry: RetryPolicy,
    destination: String,
    target_sender: Option<SenderId>,
}

impl EventPipeline {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        persistence: Arc<PersistenceGateway>,
        messenger: Arc<dyn MessagingPort>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            classifier,
            persistence,
            messenger,
            retry: RetryPolicy::default(),
            destination: destination.into(),
            target_sender: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Only serve this sender; everyone else is dropped silently. Off unless
    /// called: by default every direct sender is served.
    pub fn with_target_sender(mut self, sender: SenderId) -> Self {
        self.target_sender = Some(sender);
        self
    }

    fn filter(&self, event: &InboundEvent) -> Result<String, FilterReason> {
        if event.from_self {
            return Err(FilterReason::FromSelf);
        }
        if event.is_group() {
            return Err(FilterReason::Group);
        }
        if let Some(target) = &self.target_sender {
            if &event.sender != target {
                return Err(FilterReason::ForeignSender);
            }
        }
        event.payload.extract_text().ok_or(FilterReason::EmptyText)
    }

    /// Drive one event to its terminal state.
    pub async fn handle(&self, event: InboundEvent) -> PipelineOutcome {
        let text = match self.filter(&event) {
            Ok(text) => text,
            Err(reason) => {
                debug!(sender = %event.sender, ?reason, "event filtered");
                return PipelineOutcome::Filtered(reason);
            }
        };
        info!(sender = %event.sender, chars = text.chars().count(), "message received");

        let record = match self.classifier.classify(&text).await {
            Ok(record) => record,
            Err(e) => {
                error!(sender = %event.sender, error = %e, "classification failed");
                return self
                    .reply(&event.sender, ReplyKind::ClassifyFailed, CLASSIFY_FAILED_REPLY)
                    .await;
            }
        };

        match self.persist(&record).await {
            Ok(()) => {
                info!(
                    sender = %event.sender,
                    destination = %self.destination,
                    kind = record.kind.label(),
                    category = record.category.label(),
                    "transaction recorded"
                );
                self.reply(&event.sender, ReplyKind::Summary, &record.user_facing_summary)
                    .await
            }
            Err(e) => {
                error!(
                    sender = %event.sender,
                    destination = %self.destination,
                    error = %e,
                    "transaction not recorded"
                );
                self.reply(&event.sender, ReplyKind::PersistFailed, PERSIST_FAILED_REPLY)
                    .await
            }
        }
    }

    async fn persist(&self, record: &ClassifiedRecord) -> Result<(), PersistFailure> {
        self.persistence
            .ensure_destination(&self.destination)
            .await
            .map_err(PersistFailure::Ensure)?;

        self.retry
            .with_retry(|| self.persistence.append_record(&self.destination, record))
            .await
            .map_err(PersistFailure::Append)
    }

    async fn reply(&self, recipient: &SenderId, kind: ReplyKind, text: &str) -> PipelineOutcome {
        let reply = OutboundReply {
            recipient: recipient.clone(),
            text: text.to_string(),
        };
        let delivered = match self.messenger.send_reply(&reply.recipient, &reply.text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(recipient = %reply.recipient, ?kind, error = %e, "reply not delivered");
                false
            }
        };
        PipelineOutcome::Replied { kind, delivered }
    }
}

/// Consume transport events until the channel closes or `shutdown` fires.
///
/// Each message runs on its own task; in-flight tasks are not awaited on
/// shutdown.
pub async fn run_event_loop(
    pipeline: Arc<EventPipeline>,
    mut events: mpsc::Receiver<TransportEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested, no longer accepting events");
                break;
            }
            ev = events.recv() => match ev {
                Some(ev) => ev,
                None => {
                    info!("transport closed the event stream");
                    break;
                }
            },
        };

        match event {
            TransportEvent::Connected => info!("transport connected"),
            TransportEvent::Disconnected { reason } => {
                warn!(reason = reason.as_deref().unwrap_or("unknown"), "transport disconnected")
            }
            TransportEvent::MessageReceived(inbound) => {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    pipeline.handle(inbound).await;
                });
            }
        }
    }
}
