// Message type and line codec for the IRC-style wire protocol

use chrono::Utc;

/// A parsed protocol line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Arrival time as `HH:MM` (UTC)
    pub timestamp: String,
    /// Sender nick from the `:nick!user@host` prefix
    pub nick: String,
    pub user: String,
    pub host: String,
    /// Command or numeric reply
    pub command: String,
    /// First parameter (channel or nick)
    pub recipient: String,
    /// Trailing text after ` :`
    pub content: String,
    /// Middle parameters between recipient and content
    pub args: String,
    /// Whether `content` was decrypted from a secure session
    pub encrypted: bool,
}

/// Split on the first occurrence of `delim`; the right side is empty when absent
fn split<'a>(s: &'a str, delim: &str) -> (&'a str, &'a str) {
    s.split_once(delim).unwrap_or((s, ""))
}

impl Message {
    /// Parse one raw line. Never fails; missing parts are left empty.
    pub fn parse(line: &str) -> Self {
        let mut line = line.trim_end_matches(['\r', '\n']);
        let mut message = Message {
            timestamp: current_time(),
            ..Default::default()
        };

        if let Some(rest) = line.strip_prefix(':') {
            let (prefix, rest) = split(rest, " ");
            let (nick, userhost) = split(prefix, "!");
            let (user, host) = split(userhost, "@");
            message.nick = nick.to_string();
            message.user = user.to_string();
            message.host = host.to_string();
            line = rest;
        }

        let (params, content) = split(line, " :");
        let (command, params) = split(params, " ");
        let (recipient, args) = split(params, " ");

        message.content = content.to_string();
        message.command = command.to_string();
        message.recipient = recipient.to_string();
        message.args = args.to_string();
        message
    }

    /// Copy of this message with decrypted content
    pub fn with_content(&self, content: String, encrypted: bool) -> Self {
        Self {
            content,
            encrypted,
            ..self.clone()
        }
    }

    /// A PRIVMSG addressed to a nick rather than a channel
    pub fn is_private(&self) -> bool {
        self.command == "PRIVMSG" && !is_channel(&self.recipient)
    }

    /// CTCP body when the content is wrapped in `\x01`
    pub fn ctcp(&self) -> Option<&str> {
        self.content
            .strip_prefix('\x01')
            .and_then(|body| body.strip_suffix('\x01'))
    }
}

/// Channel names start with `#` or `&`
pub fn is_channel(target: &str) -> bool {
    target.starts_with('#') || target.starts_with('&')
}

fn current_time() -> String {
    Utc::now().format("%H:%M").to_string()
}

// ========== Serializers ==========

pub fn privmsg(target: &str, text: &str) -> String {
    format!("PRIVMSG {} :{}", target, text)
}

pub fn ctcp(target: &str, body: &str) -> String {
    privmsg(target, &format!("\x01{}\x01", body))
}

pub fn action(target: &str, text: &str) -> String {
    ctcp(target, &format!("ACTION {}", text))
}

pub fn join(channel: &str) -> String {
    format!("JOIN {}", channel)
}

pub fn part(channel: &str, reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!("PART {} :{}", channel, reason),
        None => format!("PART {}", channel),
    }
}

pub fn nick(nick: &str) -> String {
    format!("NICK {}", nick)
}

/// USER and NICK lines sent right after connecting
pub fn register(nick: &str) -> [String; 2] {
    [format!("USER {} * localhost :{}", nick, nick), self::nick(nick)]
}

pub fn quit(reason: &str) -> String {
    format!("QUIT :{}", reason)
}

pub fn pong(payload: &str) -> String {
    format!("PONG :{}", payload)
}
