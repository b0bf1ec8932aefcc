// Plain line rendering of protocol events

use crate::client::message::{is_channel, Message};
use crate::client::overlay::{SecurityNotice, Severity};
use crate::client::transport::TransportSecurity;

/// One display line for `msg`, or `None` if it should not be shown
pub fn render_message(msg: &Message, show_joins: bool) -> Option<String> {
    let ts = &msg.timestamp;
    let text = match msg.command.as_str() {
        "PRIVMSG" => render_privmsg(msg),
        "NOTICE" => format!("-{}- {}", sender(msg), msg.content),
        "ERROR" => format!("ERROR {}", msg.content),
        "JOIN" if show_joins => format!("{} joined {}", msg.nick, first_nonempty(&msg.recipient, &msg.content)),
        "PART" if show_joins => format!("{} left {} ({})", msg.nick, msg.recipient, msg.content),
        "QUIT" if show_joins => format!("{} quit ({})", msg.nick, msg.content),
        "JOIN" | "PART" | "QUIT" => return None,
        "NICK" => format!(
            "{} is now known as {}",
            msg.nick,
            first_nonempty(&msg.content, &msg.recipient)
        ),
        "KICK" => format!("{} kicked {} from {} ({})", msg.nick, msg.args, msg.recipient, msg.content),
        "MODE" => format!("{} sets mode {} {} {}", msg.nick, msg.recipient, msg.args, msg.content)
            .trim_end()
            .to_string(),
        numeric if is_numeric(numeric) => render_numeric(msg)?,
        _ => return None,
    };
    Some(format!("{} {}", ts, text))
}

fn render_privmsg(msg: &Message) -> String {
    let marker = if msg.encrypted { "[secure] " } else { "" };

    if let Some(body) = msg.ctcp() {
        return match body.strip_prefix("ACTION ") {
            Some(action) if is_channel(&msg.recipient) => {
                format!("[{}] * {} {}", msg.recipient, msg.nick, action)
            }
            Some(action) => format!("{}* {} {}", marker, msg.nick, action),
            None => format!("CTCP from {}: {}", msg.nick, body),
        };
    }

    if is_channel(&msg.recipient) {
        format!("[{}] <{}> {}", msg.recipient, msg.nick, msg.content)
    } else {
        format!("{}<{}> {}", marker, msg.nick, msg.content)
    }
}

fn render_numeric(msg: &Message) -> Option<String> {
    let detail = [msg.args.as_str(), msg.content.as_str()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

    match msg.command.as_bytes()[0] {
        b'4' | b'5' => Some(format!("ERROR {}: {}", msg.command, detail)),
        _ if detail.is_empty() => None,
        _ => Some(format!("-{}- {}", sender(msg), detail)),
    }
}

fn is_numeric(command: &str) -> bool {
    command.len() == 3 && command.bytes().all(|b| b.is_ascii_digit())
}

fn sender(msg: &Message) -> &str {
    if msg.nick.is_empty() {
        "server"
    } else {
        &msg.nick
    }
}

fn first_nonempty<'a>(a: &'a str, b: &'a str) -> &'a str {
    if a.is_empty() {
        b
    } else {
        a
    }
}

/// Notice line, flagged by severity
pub fn render_notice(notice: &SecurityNotice) -> String {
    match notice.severity() {
        Severity::High => format!("!!! {}", notice),
        Severity::Warning => format!("! {}", notice),
        Severity::Info => format!("* {}", notice),
    }
}

/// Lines describing the transport, shown once after connecting
pub fn render_security(security: &TransportSecurity) -> Vec<String> {
    match security {
        TransportSecurity::Plaintext => {
            vec!["! Connected without TLS: the server and the proxy can read everything".to_string()]
        }
        TransportSecurity::Tls(summary) => {
            let mut lines = vec![format!("* TLS cipher: {}", summary.cipher)];
            lines.push("* Certificate chain:".to_string());
            lines.extend(summary.chain.iter().map(|cert| format!("  {}", cert)));
            lines
        }
        TransportSecurity::HandshakeFailed { reason } => {
            vec![format!("!!! TLS handshake failed: {}", reason)]
        }
    }
}

/// Help text for /help
pub const HELP: &str = "\
Commands:
  /join <#channel>              join a channel and make it the current target
  /part [#channel] [reason]     leave a channel
  /msg <nick|#channel> <text>   send a message and make it the current target
  /me <action>                  send an action to the current target
  /nick <nick>                  change nickname
  /ctcp <nick> <command>        send a CTCP request
  /ignore [nick]                ignore a nick, or list ignored nicks
  /unignore <nick>              stop ignoring a nick
  /otr-start <nick>             start an encrypted session
  /otr-end <nick>               end an encrypted session
  /otr-status <nick>            show whether a session is encrypted
  /otr-info                     show your fingerprint and open sessions
  /otr-smpq <nick> <question>? <secret>
                                authenticate a peer with a shared secret
  /otr-smpr <nick> <secret>     answer a peer's authentication question
  /raw <line>                   send a raw protocol line
  /shrug                        send a shrug to the current target
  /quit                         end all sessions and disconnect
Lines without a leading / go to the current target.";

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Message {
        let mut msg = Message::parse(line);
        msg.timestamp = "12:00".to_string();
        msg
    }

    #[test]
    fn test_render_channel_and_private() {
        let msg = parse(":alice!u@h PRIVMSG #rust :hello");
        assert_eq!(render_message(&msg, false).unwrap(), "12:00 [#rust] <alice> hello");

        let msg = parse(":alice!u@h PRIVMSG me :psst").with_content("psst".to_string(), true);
        assert_eq!(render_message(&msg, false).unwrap(), "12:00 [secure] <alice> psst");
    }

    #[test]
    fn test_render_action() {
        let msg = parse(":alice!u@h PRIVMSG #rust :\x01ACTION waves\x01");
        assert_eq!(render_message(&msg, false).unwrap(), "12:00 [#rust] * alice waves");
    }

    #[test]
    fn test_joins_hidden_by_default() {
        let msg = parse(":alice!u@h JOIN :#rust");
        assert!(render_message(&msg, false).is_none());
        assert_eq!(render_message(&msg, true).unwrap(), "12:00 alice joined #rust");
    }

    #[test]
    fn test_render_numerics() {
        let msg = parse(":irc.example.net 433 * zed :Nickname is already in use");
        assert_eq!(
            render_message(&msg, false).unwrap(),
            "12:00 ERROR 433: zed Nickname is already in use"
        );

        let msg = parse(":irc.example.net 001 zed :Welcome");
        assert_eq!(render_message(&msg, false).unwrap(), "12:00 -irc.example.net- Welcome");
    }

    #[test]
    fn test_unknown_commands_hidden() {
        assert!(render_message(&parse(":s CAP * LS :multi-prefix"), false).is_none());
    }

    #[test]
    fn test_notice_severity_marker() {
        let notice = SecurityNotice::FingerprintMismatch {
            peer: "bob".to_string(),
            fingerprint: vec![1, 2],
        };
        assert!(render_notice(&notice).starts_with("!!! WARNING"));

        let notice = SecurityNotice::SessionEnded { peer: "bob".to_string() };
        assert_eq!(render_notice(&notice), "* Secure session with bob ended");
    }
}
