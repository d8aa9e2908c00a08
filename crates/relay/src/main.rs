use std::sync::Arc;

use teloxide::prelude::Requester;
use teloxide::Bot;

use relay_core::{
    config::{AppEnv, RelayConfig},
    engine::RelayEngine,
    events::EventBus,
};
use relay_telegram::TelegramChannelPort;

#[tokio::main]
async fn main() -> Result<(), relay_core::Error> {
    relay_core::logging::init("relay");

    let env = AppEnv::load()?;
    let bot = Bot::new(env.telegram_bot_token.clone());

    if let Ok(me) = bot.get_me().await {
        tracing::info!("relay started: @{}", me.username());
    }

    let port = Arc::new(TelegramChannelPort::new(bot.clone()));
    let engine = RelayEngine::new(port, EventBus::default());

    // Restore the persisted posting configuration, if any. A broken snapshot
    // is reported but never blocks startup.
    if let Some(path) = &env.config_file {
        match load_config_snapshot(path) {
            Ok(Some(config)) => {
                let destinations = config.destination_channels.len();
                match engine.set_config(config).await {
                    Ok(()) => {
                        tracing::info!(
                            path = %path.display(),
                            destinations,
                            "posting configuration restored"
                        );
                        if let Err(e) = engine.start().await {
                            tracing::warn!("posting loop not started: {e}");
                        }
                    }
                    Err(e) => tracing::warn!("persisted configuration rejected: {e}"),
                }
            }
            Ok(None) => {
                tracing::info!(path = %path.display(), "no configuration snapshot yet");
            }
            Err(e) => tracing::warn!("could not load configuration snapshot: {e}"),
        }
    }

    relay_telegram::ingest::run_polling(bot, engine).await;

    Ok(())
}

fn load_config_snapshot(path: &std::path::Path) -> Result<Option<RelayConfig>, relay_core::Error> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let config: RelayConfig = serde_json::from_str(&content)?;
    Ok(Some(config))
}
