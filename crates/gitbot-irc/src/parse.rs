//! Minimal IRC line parsing: just enough structure to drive the session
//! state machine and route channel messages.

use gitbot_core::session::SessionEvent;

/// One parsed server line: `[:prefix] COMMAND params... [:trailing]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IrcLine<'a> {
    pub prefix: Option<&'a str>,
    pub command: &'a str,
    pub params: Vec<&'a str>,
}

/// Structured events handed to the runner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundEvent {
    Session(SessionEvent),
    Ping(String),
    Privmsg {
        sender_nick: String,
        sender_host: String,
        target: String,
        text: String,
    },
}

pub fn parse_line(raw: &str) -> Option<IrcLine<'_>> {
    let mut rest = raw.trim_end_matches(['\r', '\n']).trim_start();
    if rest.is_empty() {
        return None;
    }

    let prefix = match rest.strip_prefix(':') {
        Some(stripped) => {
            let (prefix, tail) = stripped.split_once(' ')?;
            rest = tail.trim_start();
            Some(prefix)
        }
        None => None,
    };

    let command = match rest.split_once(' ') {
        Some((command, tail)) => {
            rest = tail.trim_start();
            command
        }
        None => {
            let command = rest;
            rest = "";
            command
        }
    };
    if command.is_empty() {
        return None;
    }

    let mut params = Vec::new();
    while !rest.is_empty() {
        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing);
            break;
        }
        match rest.split_once(' ') {
            Some((param, tail)) => {
                params.push(param);
                rest = tail.trim_start();
            }
            None => {
                params.push(rest);
                break;
            }
        }
    }

    Some(IrcLine {
        prefix,
        command,
        params,
    })
}

/// `nick!user@host` → (`nick`, `host`). Degrades gracefully for server
/// prefixes that carry no user part.
pub fn split_prefix(prefix: &str) -> (&str, &str) {
    let (nick, rest) = prefix.split_once('!').unwrap_or((prefix, ""));
    let host = rest.split_once('@').map(|(_, host)| host).unwrap_or(rest);
    (nick, host)
}

pub fn to_event(line: &IrcLine<'_>) -> Option<InboundEvent> {
    match line.command {
        "PING" => Some(InboundEvent::Ping(
            line.params.first().copied().unwrap_or("").to_string(),
        )),

        // :server CAP * ACK :sasl
        "CAP" => {
            let acked = line.params.iter().any(|p| *p == "ACK");
            let sasl = line
                .params
                .last()
                .map(|p| p.split_whitespace().any(|cap| cap == "sasl"))
                .unwrap_or(false);
            (acked && sasl).then_some(InboundEvent::Session(SessionEvent::CapAcknowledged))
        }

        "AUTHENTICATE" if line.params.first() == Some(&"+") => {
            Some(InboundEvent::Session(SessionEvent::AuthChallenge))
        }

        // RPL_SASLSUCCESS / ERR_SASLFAIL / ERR_SASLTOOLONG
        "903" => Some(InboundEvent::Session(SessionEvent::SaslSucceeded)),
        "904" | "905" => Some(InboundEvent::Session(SessionEvent::SaslFailed(
            line.params
                .last()
                .copied()
                .unwrap_or("authentication failed")
                .to_string(),
        ))),

        "PRIVMSG" => {
            let (sender_nick, sender_host) = split_prefix(line.prefix?);
            let target = line.params.first()?;
            let text = line.params.get(1)?;
            Some(InboundEvent::Privmsg {
                sender_nick: sender_nick.to_string(),
                sender_host: sender_host.to_string(),
                target: (*target).to_string(),
                text: (*text).to_string(),
            })
        }

        _ => None,
    }
}
