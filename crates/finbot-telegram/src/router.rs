use std::{sync::Arc, time::Duration};

use chrono::Utc;
use teloxide::{
    dispatching::Dispatcher,
    dptree,
    prelude::*,
    types::{Chat, UserId},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use finbot_core::{
    domain::SenderId,
    messaging::types::{InboundEvent, MessagePayload, Origin, TransportEvent},
};

/// Shared by the update handlers.
struct Inbound {
    events: mpsc::Sender<TransportEvent>,
    self_id: UserId,
}

impl Inbound {
    async fn forward(&self, event: InboundEvent) {
        debug!(sender = %event.sender, origin = ?event.origin, "inbound message");
        if self
            .events
            .send(TransportEvent::MessageReceived(event))
            .await
            .is_err()
        {
            warn!("event queue closed, dropping inbound message");
        }
    }
}

/// Long-poll the Bot API until `shutdown` fires.
///
/// Emits `Connected` once the token is verified and `Disconnected` when
/// polling stops.
pub async fn run_polling(
    bot: Bot,
    events: mpsc::Sender<TransportEvent>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let me = match bot.get_me().await {
        Ok(me) => me,
        Err(e) => {
            let _ = events
                .send(TransportEvent::Disconnected {
                    reason: Some(e.to_string()),
                })
                .await;
            return Err(anyhow::anyhow!("telegram get_me failed: {e}"));
        }
    };
    info!(username = %me.username(), "telegram connected");
    let _ = events.send(TransportEvent::Connected).await;

    let inbound = Arc::new(Inbound {
        events: events.clone(),
        self_id: me.id,
    });

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![inbound])
        .default_handler(|_| async {})
        .build();

    let token = dispatcher.shutdown_token();
    let stopper = tokio::spawn(async move {
        shutdown.cancelled().await;
        // `shutdown` refuses while the dispatcher is still starting up.
        loop {
            match token.shutdown() {
                Ok(done) => {
                    done.await;
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    });

    dispatcher.dispatch().await;
    stopper.abort();

    info!("telegram polling stopped");
    let _ = events
        .send(TransportEvent::Disconnected { reason: None })
        .await;
    Ok(())
}

async fn on_message(msg: Message, inbound: Arc<Inbound>) -> ResponseResult<()> {
    inbound
        .forward(event_from_message(&msg, inbound.self_id))
        .await;
    Ok(())
}

async fn on_callback(bot: Bot, q: CallbackQuery, inbound: Arc<Inbound>) -> ResponseResult<()> {
    // Stop the client-side spinner whatever happens next.
    if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
        debug!(error = %e, "answer_callback_query failed");
    }
    if let Some(event) = event_from_callback(&q, inbound.self_id) {
        inbound.forward(event).await;
    }
    Ok(())
}

fn origin_of(chat: &Chat) -> Origin {
    if chat.is_private() {
        Origin::Direct
    } else {
        Origin::Group
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.filter(|t| !t.is_empty()).map(str::to_string)
}

/// Text maps to the conversation slot, a media caption to extended text.
/// Posts without a user (channel posts) are attributed to the chat.
pub(crate) fn event_from_message(msg: &Message, self_id: UserId) -> InboundEvent {
    let from = msg.from();
    let sender = from
        .map(|u| u.id.0.to_string())
        .unwrap_or_else(|| msg.chat.id.0.to_string());

    InboundEvent {
        sender: SenderId::new(sender),
        payload: MessagePayload {
            conversation: non_empty(msg.text()),
            extended_text: non_empty(msg.caption()),
            button_reply: None,
        },
        origin: origin_of(&msg.chat),
        from_self: from.map(|u| u.id == self_id).unwrap_or(false),
        received_at: msg.date,
    }
}

/// A pressed inline button. Queries without data carry nothing to classify.
pub(crate) fn event_from_callback(q: &CallbackQuery, self_id: UserId) -> Option<InboundEvent> {
    let data = non_empty(q.data.as_deref())?;
    let origin = q
        .message
        .as_ref()
        .map(|m| origin_of(&m.chat))
        .unwrap_or(Origin::Direct);

    Some(InboundEvent {
        sender: SenderId::new(q.from.id.0.to_string()),
        payload: MessagePayload {
            button_reply: Some(data),
            ..Default::default()
        },
        origin,
        from_self: q.from.id == self_id,
        received_at: Utc::now(),
    })
}
