use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::access::AccessGate;
use crate::chart::{RenderOutcome, ReportRenderer};
use crate::error::{BotError, ValidationError};
use crate::models::DateRange;
use crate::projections::{Aggregator, LogScanner};
use crate::telegram::{escape_markdown_v2, ParseMode};

const DENY_ADMIN: &str = "❌ У вас нет прав на выполнение этой команды.";
const DENY_UNREGISTERED: &str = "❌ У вас нет доступа к боту. Обратитесь к администратору!";
const USERS_EMPTY: &str = "ℹ️ Список пользователей пуст.";
const DATE_FORMAT_ERROR: &str = "❌ Ошибка: Некорректный формат даты. Используйте DD-MM-YYYY.";
const USAGE_ADDUSER: &str = "⚠️ Использование: /adduser @username";
const USAGE_REMOVEUSER: &str = "⚠️ Использование: /removeuser @username";
const USAGE_STATS: &str =
    "⚠️ Использование: /stats DD-MM-YYYY DD-MM-YYYY\n📌 Пример: /stats 01-03-2024 07-03-2024";

/// Where a request is in its lifecycle; only used for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    AuthChecking,
    Authorized,
    Rejected,
    Executing,
    Responding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Users,
    AddUser,
    RemoveUser,
    Stats,
}

impl CommandKind {
    pub fn name(self) -> &'static str {
        match self {
            CommandKind::Users => "/users",
            CommandKind::AddUser => "/adduser",
            CommandKind::RemoveUser => "/removeuser",
            CommandKind::Stats => "/stats",
        }
    }

    fn requires_admin(self) -> bool {
        !matches!(self, CommandKind::Stats)
    }
}

/// A recognized command and its whitespace-separated arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub kind: CommandKind,
    pub args: Vec<String>,
}

impl ParsedCommand {
    /// `None` for plain text and commands this bot does not handle.
    /// Accepts the `/command@BotName` form used in group chats.
    pub fn parse(text: &str) -> Option<Self> {
        let mut tokens = text.split_whitespace();
        let head = tokens.next()?.strip_prefix('/')?;
        let name = head.split('@').next().unwrap_or(head);
        let kind = match name {
            "users" => CommandKind::Users,
            "adduser" => CommandKind::AddUser,
            "removeuser" => CommandKind::RemoveUser,
            "stats" => CommandKind::Stats,
            _ => return None,
        };
        Some(Self {
            kind,
            args: tokens.map(str::to_string).collect(),
        })
    }
}

/// A chat message as the router sees it
#[derive(Debug, Clone)]
pub struct IncomingCommand {
    pub chat_id: i64,
    pub message_id: i64,
    pub caller_id: i64,
    pub text: String,
}

/// What the router wants sent back
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// Reply quoting the command message
    Reply {
        text: String,
        parse_mode: Option<ParseMode>,
    },
    Text {
        chat_id: i64,
        text: String,
        parse_mode: Option<ParseMode>,
    },
    Image {
        chat_id: i64,
        png: Vec<u8>,
        caption: String,
    },
}

impl Outgoing {
    fn reply(text: impl Into<String>) -> Self {
        Outgoing::Reply {
            text: text.into(),
            parse_mode: None,
        }
    }

    fn reply_markdown(text: impl Into<String>) -> Self {
        Outgoing::Reply {
            text: text.into(),
            parse_mode: Some(ParseMode::Markdown),
        }
    }
}

/// Sequences access checks, validation, scanning and rendering for each command
pub struct CommandRouter {
    gate: Arc<AccessGate>,
    scanner: LogScanner,
    renderer: ReportRenderer,
}

impl CommandRouter {
    pub fn new(gate: Arc<AccessGate>, scanner: LogScanner, renderer: ReportRenderer) -> Self {
        Self {
            gate,
            scanner,
            renderer,
        }
    }

    /// Run one command in its own task so a panic only costs this request
    pub async fn handle_isolated(self: &Arc<Self>, command: IncomingCommand) -> Vec<Outgoing> {
        let router = self.clone();
        match tokio::spawn(async move { router.handle(&command).await }).await {
            Ok(outgoing) => outgoing,
            Err(e) => {
                error!(error = %e, "request task failed");
                vec![Outgoing::reply(format!("❌ Ошибка: {e}"))]
            }
        }
    }

    pub async fn handle(&self, command: &IncomingCommand) -> Vec<Outgoing> {
        let Some(parsed) = ParsedCommand::parse(&command.text) else {
            return Vec::new();
        };
        let caller = command.caller_id.to_string();

        debug!(phase = ?RequestPhase::AuthChecking, command = parsed.kind.name());
        if let Err(e) = self.authorize(parsed.kind, &caller).await {
            warn!(phase = ?RequestPhase::Rejected, caller = %caller, command = parsed.kind.name(), "access denied");
            return vec![reply_for_error(&e)];
        }
        debug!(phase = ?RequestPhase::Authorized);

        debug!(phase = ?RequestPhase::Executing);
        let outgoing = match self.execute(&parsed, command).await {
            Ok(outgoing) => outgoing,
            Err(e) => {
                if !matches!(e, BotError::Validation(_)) {
                    error!(command = parsed.kind.name(), error = %e, "command failed");
                }
                vec![reply_for_error(&e)]
            }
        };
        debug!(phase = ?RequestPhase::Responding, messages = outgoing.len());
        outgoing
    }

    async fn authorize(&self, kind: CommandKind, caller: &str) -> Result<(), BotError> {
        if kind.requires_admin() {
            if !self.gate.is_admin(caller) {
                return Err(BotError::AdminOnly);
            }
        } else if !self.gate.is_authorized(caller).await {
            return Err(BotError::Unauthorized);
        }
        Ok(())
    }

    async fn execute(&self, parsed: &ParsedCommand, command: &IncomingCommand) -> Result<Vec<Outgoing>, BotError> {
        match parsed.kind {
            CommandKind::Users => self.list_users().await,
            CommandKind::AddUser => {
                let name = single_user_arg(parsed)?;
                self.gate.add_user(&command.chat_id.to_string(), &name).await?;
                Ok(vec![Outgoing::reply(format!("✅ Пользователь @{name} добавлен в список."))])
            }
            CommandKind::RemoveUser => {
                let name = single_user_arg(parsed)?;
                self.gate.remove_user(&name).await?;
                Ok(vec![Outgoing::reply(format!("🗑️ Пользователь @{name} удалён."))])
            }
            CommandKind::Stats => self.stats(parsed, command.chat_id).await,
        }
    }

    async fn list_users(&self) -> Result<Vec<Outgoing>, BotError> {
        let users = self.gate.list_users().await;
        if users.is_empty() {
            return Ok(vec![Outgoing::reply(USERS_EMPTY)]);
        }
        let lines = users
            .iter()
            .map(|user| format!("🔹 {}", escape_markdown_v2(&user.display_name)))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(vec![Outgoing::Reply {
            text: format!("📜 *Список пользователей:*\n{lines}"),
            parse_mode: Some(ParseMode::MarkdownV2),
        }])
    }

    async fn stats(&self, parsed: &ParsedCommand, chat_id: i64) -> Result<Vec<Outgoing>, BotError> {
        let [start_token, end_token] = parsed.args.as_slice() else {
            return Err(ValidationError::Usage { command: CommandKind::Stats.name() }.into());
        };
        let range = DateRange::parse(start_token, end_token)?;
        if range.start > range.end {
            debug!(start = %range.start, end = %range.end, "reversed range, result will be empty");
        }

        let rows = self.scanner.fetch_filtered(&range).await?;
        let tally = Aggregator::tally(&rows);

        let report = match self.renderer.render(&tally, &range)? {
            RenderOutcome::Empty => {
                return Ok(vec![Outgoing::reply_markdown(format!(
                    "ℹ️ За период {start_token} - {end_token} изменений не найдено."
                ))]);
            }
            RenderOutcome::Report(report) => report,
        };

        Ok(vec![
            Outgoing::reply(format!(
                "✅ Запрашиваю статистику за период {} - {}...",
                range.start, range.end
            )),
            Outgoing::Image {
                chat_id,
                png: report.chart,
                caption: format!("📊 Изменения за {start_token} - {end_token}"),
            },
            Outgoing::Text {
                chat_id,
                text: report.summary_text,
                parse_mode: Some(ParseMode::Markdown),
            },
        ])
    }
}

/// Exactly one argument, surrounding `@` stripped
fn single_user_arg(parsed: &ParsedCommand) -> Result<String, ValidationError> {
    let usage = ValidationError::Usage { command: parsed.kind.name() };
    let [arg] = parsed.args.as_slice() else {
        return Err(usage);
    };
    let name = arg.trim_matches('@');
    if name.is_empty() {
        return Err(usage);
    }
    Ok(name.to_string())
}

fn reply_for_error(err: &BotError) -> Outgoing {
    match err {
        BotError::AdminOnly => Outgoing::reply(DENY_ADMIN),
        BotError::Unauthorized => Outgoing::reply(DENY_UNREGISTERED),
        BotError::Validation(ValidationError::Usage { command }) => Outgoing::reply_markdown(match *command {
            "/adduser" => USAGE_ADDUSER,
            "/removeuser" => USAGE_REMOVEUSER,
            _ => USAGE_STATS,
        }),
        BotError::Validation(ValidationError::DateFormat(_)) => Outgoing::reply_markdown(DATE_FORMAT_ERROR),
        BotError::Validation(ValidationError::UserNotFound { name, suggestion }) => {
            let mut text = format!("⚠️ Пользователь @{name} не найден.");
            if let Some(suggestion) = suggestion {
                text.push_str(&format!(" Возможно, вы имели в виду @{suggestion}?"));
            }
            Outgoing::reply(text)
        }
        BotError::Upstream(_) | BotError::Persistence(_) | BotError::Render(_) => {
            Outgoing::reply(format!("❌ Ошибка: {err}"))
        }
    }
}
