// Consumer commands typed at the prompt

use crate::client::context::ClientContext;
use crate::client::display;
use crate::client::message::{self, is_channel};
use crate::client::overlay::Outcome;

const SHRUG: &str = "¯\\_(ツ)_/¯";

/// One parsed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join(String),
    Part { channel: Option<String>, reason: Option<String> },
    Quit,
    Msg { target: String, text: String },
    /// Plain text for the current target
    Say(String),
    Me(String),
    Nick(String),
    Ctcp { target: String, body: String },
    /// Ignore a nick, or list ignored nicks when `None`
    Ignore(Option<String>),
    Unignore(String),
    SessionStart(String),
    SessionEnd(String),
    SessionStatus(String),
    SessionInfo,
    AuthAsk { peer: String, question: String, secret: String },
    AuthAnswer { peer: String, secret: String },
    Raw(String),
    Help,
    /// Known command with missing arguments
    Usage(&'static str),
    Unknown(String),
}

/// Whether the input loop should keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// First word and the trimmed remainder
fn word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.split_once(' ') {
        Some((first, rest)) => (first, rest.trim()),
        None => (s.trim_end(), ""),
    }
}

impl Command {
    /// Parse one input line. Never fails: unrecognised input becomes `Unknown`.
    pub fn parse(line: &str) -> Command {
        let line = line.trim_end_matches(['\r', '\n']);

        let Some(body) = line.strip_prefix('/') else {
            return Command::Say(line.to_string());
        };
        if body.starts_with('/') {
            // "//text" sends "/text"
            return Command::Say(body.to_string());
        }

        let (name, rest) = word(body);
        let (first, tail) = word(rest);

        match name.to_lowercase().as_str() {
            "join" if !first.is_empty() => Command::Join(first.to_string()),
            "join" => Command::Usage("/join <#channel>"),
            "part" if is_channel(first) => Command::Part {
                channel: Some(first.to_string()),
                reason: non_empty(tail),
            },
            "part" => Command::Part {
                channel: None,
                reason: non_empty(rest),
            },
            "quit" | "exit" => Command::Quit,
            "msg" | "query" if !first.is_empty() && !tail.is_empty() => Command::Msg {
                target: first.to_string(),
                text: tail.to_string(),
            },
            "msg" | "query" => Command::Usage("/msg <nick|#channel> <text>"),
            "me" if !rest.is_empty() => Command::Me(rest.to_string()),
            "me" => Command::Usage("/me <action>"),
            "nick" if !first.is_empty() => Command::Nick(first.to_string()),
            "nick" => Command::Usage("/nick <nick>"),
            "ctcp" if !first.is_empty() && !tail.is_empty() => Command::Ctcp {
                target: first.to_string(),
                body: tail.to_uppercase(),
            },
            "ctcp" => Command::Usage("/ctcp <nick> <command>"),
            "ignore" => Command::Ignore(non_empty(first)),
            "unignore" if !first.is_empty() => Command::Unignore(first.to_string()),
            "unignore" => Command::Usage("/unignore <nick>"),
            "otr-start" if !first.is_empty() => Command::SessionStart(first.to_string()),
            "otr-start" => Command::Usage("/otr-start <nick>"),
            "otr-end" if !first.is_empty() => Command::SessionEnd(first.to_string()),
            "otr-end" => Command::Usage("/otr-end <nick>"),
            "otr-status" if !first.is_empty() => Command::SessionStatus(first.to_string()),
            "otr-status" => Command::Usage("/otr-status <nick>"),
            "otr-info" => Command::SessionInfo,
            "otr-smpq" => match tail.split_once("? ") {
                Some((question, secret)) if !first.is_empty() && !secret.trim().is_empty() => {
                    Command::AuthAsk {
                        peer: first.to_string(),
                        question: format!("{}?", question.trim()),
                        secret: secret.trim().to_string(),
                    }
                }
                _ => Command::Usage("/otr-smpq <nick> <question>? <secret>"),
            },
            "otr-smpr" if !first.is_empty() && !tail.is_empty() => Command::AuthAnswer {
                peer: first.to_string(),
                secret: tail.to_string(),
            },
            "otr-smpr" => Command::Usage("/otr-smpr <nick> <secret>"),
            "raw" if !rest.is_empty() => Command::Raw(rest.to_string()),
            "raw" => Command::Usage("/raw <line>"),
            "shrug" => Command::Say(SHRUG.to_string()),
            "help" => Command::Help,
            _ => Command::Unknown(name.to_string()),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Execute a consumer command
pub async fn execute(ctx: &mut ClientContext, command: Command) -> Flow {
    match command {
        Command::Join(channel) => {
            ctx.send(message::join(&channel)).await;
            ctx.set_target(channel);
        }
        Command::Part { channel, reason } => handle_part(ctx, channel, reason).await,
        Command::Quit => return Flow::Quit,
        Command::Msg { target, text } => {
            handle_say(ctx, &target, &text).await;
            ctx.set_target(target);
        }
        Command::Say(text) => match ctx.target().map(str::to_string) {
            Some(target) => handle_say(ctx, &target, &text).await,
            None => ctx.print("No current target: use /join or /msg first"),
        },
        Command::Me(action) => match ctx.target().map(str::to_string) {
            Some(target) if is_channel(&target) => ctx.send(message::action(&target, &action)).await,
            Some(target) => {
                let outcome = ctx.overlay().lock().await.send(&target, &format!("\x01ACTION {}\x01", action));
                ctx.apply(outcome).await;
            }
            None => ctx.print("No current target: use /join or /msg first"),
        },
        Command::Nick(nick) => {
            ctx.send(message::nick(&nick)).await;
        }
        Command::Ctcp { target, body } => {
            ctx.send(message::ctcp(&target, &body)).await;
        }
        Command::Ignore(None) => {
            let nicks = ctx.ignore().list().await;
            if nicks.is_empty() {
                ctx.print("Nobody is ignored");
            } else {
                ctx.print(&format!("Ignoring: {}", nicks.join(", ")));
            }
        }
        Command::Ignore(Some(nick)) => {
            ctx.ignore().add(&nick).await;
            ctx.print(&format!("Ignoring {}", nick));
        }
        Command::Unignore(nick) => {
            if ctx.ignore().remove(&nick).await {
                ctx.print(&format!("No longer ignoring {}", nick));
            } else {
                ctx.print(&format!("{} was not ignored", nick));
            }
        }
        Command::SessionStart(peer) => {
            let outcome = ctx.overlay().lock().await.start_session(&peer);
            ctx.apply(outcome).await;
        }
        Command::SessionEnd(peer) => {
            let outcome = ctx.overlay().lock().await.end_session(&peer);
            ctx.apply(outcome).await;
        }
        Command::SessionStatus(peer) => {
            let notice = ctx.overlay().lock().await.status(&peer);
            ctx.print(&display::render_notice(&notice));
        }
        Command::SessionInfo => {
            let notices = ctx.overlay().lock().await.info();
            for notice in &notices {
                ctx.print(&display::render_notice(notice));
            }
        }
        Command::AuthAsk { peer, question, secret } => {
            let outcome = ctx.overlay().lock().await.ask(&peer, &question, &secret);
            ctx.apply(outcome).await;
        }
        Command::AuthAnswer { peer, secret } => {
            let outcome = ctx.overlay().lock().await.answer(&peer, &secret);
            ctx.apply(outcome).await;
        }
        Command::Raw(line) => {
            ctx.send(line).await;
        }
        Command::Help => ctx.print(display::HELP),
        Command::Usage(usage) => ctx.print(&format!("Usage: {}", usage)),
        Command::Unknown(name) => ctx.print(&format!("Unknown command /{}, try /help", name)),
    }
    Flow::Continue
}

async fn handle_part(ctx: &mut ClientContext, channel: Option<String>, reason: Option<String>) {
    let channel = match channel.or_else(|| ctx.target().filter(|t| is_channel(t)).map(str::to_string)) {
        Some(channel) => channel,
        None => {
            ctx.print("Usage: /part [#channel] [reason]");
            return;
        }
    };

    ctx.send(message::part(&channel, reason.as_deref())).await;
    if ctx.target() == Some(channel.as_str()) {
        ctx.clear_target();
    }
}

/// Channels get plain PRIVMSGs; nicks go through the secure overlay
async fn handle_say(ctx: &mut ClientContext, target: &str, text: &str) {
    if is_channel(target) {
        ctx.send(message::privmsg(target, text)).await;
        return;
    }

    let outcome: Outcome = ctx.overlay().lock().await.send(target, text);
    ctx.apply(outcome).await;
}
