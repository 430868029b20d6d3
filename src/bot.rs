use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::router::{CommandRouter, IncomingCommand, Outgoing, ParsedCommand};
use crate::telegram::{ChatTransport, ParseMode, TelegramClient, TransportError, Update};

/// Pause after a failed poll before asking again
const POLL_FAILURE_BACKOFF: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct PollingOptions {
    pub timeout: Duration,
    /// Consecutive `getUpdates` failures tolerated before giving up
    pub max_consecutive_failures: u32,
}

/// Long-poll Telegram and answer commands one at a time.
/// Only returns once polling has failed too many times in a row.
pub async fn run(client: Arc<TelegramClient>, router: Arc<CommandRouter>, options: PollingOptions) -> TransportError {
    info!("bot started, waiting for messages");
    let mut offset = 0i64;
    let mut failures = 0u32;

    loop {
        let updates = match client.get_updates(offset, options.timeout).await {
            Ok(updates) => {
                failures = 0;
                updates
            }
            Err(e) => {
                failures += 1;
                warn!(error = %e, failures, "polling failed");
                if failures >= options.max_consecutive_failures {
                    return e;
                }
                tokio::time::sleep(POLL_FAILURE_BACKOFF).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(command) = incoming_command(update) else {
                continue;
            };

            let span = info_span!(
                "request",
                request_id = %Uuid::new_v4(),
                command = command_name(&command.text),
                caller = command.caller_id,
                chat = command.chat_id
            );
            async {
                let outgoing = router.handle_isolated(command.clone()).await;
                for message in outgoing {
                    if let Err(e) = deliver(client.as_ref(), &command, message).await {
                        error!(error = %e, "failed to deliver reply");
                    }
                }
            }
            .instrument(span)
            .await;
        }
    }
}

/// Recognized command name for the request span, `-` for anything else
fn command_name(text: &str) -> &'static str {
    ParsedCommand::parse(text).map_or("-", |parsed| parsed.kind.name())
}

/// Text messages with a known sender; everything else is skipped
fn incoming_command(update: Update) -> Option<IncomingCommand> {
    let message = update.message?;
    Some(IncomingCommand {
        chat_id: message.chat.id,
        message_id: message.message_id,
        caller_id: message.from?.id,
        text: message.text?,
    })
}

pub async fn deliver(
    transport: &dyn ChatTransport,
    command: &IncomingCommand,
    message: Outgoing,
) -> Result<(), TransportError> {
    match message {
        Outgoing::Reply { text, parse_mode } => {
            transport
                .reply_to(command.chat_id, command.message_id, &text, parse_mode)
                .await
        }
        Outgoing::Text {
            chat_id,
            text,
            parse_mode,
        } => transport.send_text(chat_id, &text, parse_mode).await,
        Outgoing::Image { chat_id, png, caption } => transport.send_image(chat_id, png, &caption).await,
    }
}

/// Best effort: a failure here is only logged
pub async fn notify_admin(transport: &dyn ChatTransport, admin_chat_id: i64, failure: &str) {
    let text = format!("⚠️ Бот упал с ошибкой:\n```\n{failure}\n```");
    if let Err(e) = transport
        .send_text(admin_chat_id, &text, Some(ParseMode::Markdown))
        .await
    {
        error!(error = %e, "failed to notify administrator");
    }
}
