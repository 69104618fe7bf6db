use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use finbot_core::{
    config::Config,
    domain::SenderId,
    persistence::PersistenceGateway,
    pipeline::{run_event_loop, EventPipeline},
    retry::RetryPolicy,
};
use finbot_openai::OpenAiClassifier;
use finbot_sheets::{ServiceAccountKey, ServiceAccountTokenSource, SheetsStore};
use finbot_telegram::{Bot, TelegramMessenger};

const SHEETS_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), finbot_core::Error> {
    finbot_core::logging::init("finbot")?;

    let cfg = Config::load()?;

    let classifier = OpenAiClassifier::new(cfg.openai_api_key.clone(), cfg.classifier_timeout)?
        .with_model(cfg.openai_model.clone())
        .with_base_url(cfg.openai_base_url.clone());

    let key = ServiceAccountKey::from_file(&cfg.google_credentials_path).await?;
    let tokens = ServiceAccountTokenSource::new(key, SHEETS_TIMEOUT)?;
    let store = SheetsStore::new(cfg.google_sheet_id.clone(), Arc::new(tokens), SHEETS_TIMEOUT)?
        .with_base_url(cfg.sheets_base_url.clone());
    let persistence = Arc::new(PersistenceGateway::new(Arc::new(store)));

    let bot = Bot::new(cfg.telegram_bot_token.clone());
    let messenger = TelegramMessenger::new(bot.clone());

    let mut pipeline = EventPipeline::new(
        Arc::new(classifier),
        persistence,
        Arc::new(messenger),
        cfg.sheet_name.clone(),
    )
    .with_retry_policy(RetryPolicy::new(
        cfg.retry_max_attempts,
        cfg.retry_backoff_base,
    ));
    if cfg.restrict_to_target_sender {
        pipeline = pipeline.with_target_sender(SenderId::new(cfg.target_sender_id.clone()));
    }
    let pipeline = Arc::new(pipeline);

    info!(
        sheet = %cfg.sheet_name,
        model = %cfg.openai_model,
        target = %cfg.target_sender_id,
        restricted = cfg.restrict_to_target_sender,
        "finbot starting"
    );

    let (tx, rx) = mpsc::channel(cfg.event_queue_capacity);
    let shutdown = CancellationToken::new();
    let event_loop = tokio::spawn(run_event_loop(pipeline, rx, shutdown.clone()));

    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("signal received, shutting down");
        on_signal.cancel();
    });

    let polled = finbot_telegram::router::run_polling(bot, tx, shutdown.clone()).await;
    shutdown.cancel();
    let _ = event_loop.await;

    polled.map_err(|e| finbot_core::Error::External(format!("telegram bot failed: {e}")))
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
