//! IRC session state machine.
//!
//! Pure transitions: protocol events go in, wire actions come out, no I/O
//! happens here. The connection runner feeds events from the transport,
//! executes the returned actions, and arms a per-step timeout while the
//! handshake is in flight. Every transition is driven by the peer's explicit
//! acknowledgement of the previous step, never by a fixed delay.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::debug;

/// Connection phase. Any phase can fall back to `Disconnected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    NegotiatingCapabilities,
    Authenticating,
    FinalizingRegistration,
    JoiningChannels,
    Ready,
}

impl Phase {
    /// Phases in which a stalled peer must trip the step timeout.
    pub fn awaits_acknowledgement(self) -> bool {
        matches!(
            self,
            Phase::Connecting
                | Phase::NegotiatingCapabilities
                | Phase::Authenticating
                | Phase::FinalizingRegistration
                | Phase::JoiningChannels
        )
    }
}

/// Structured protocol events, produced by the transport layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// Transport-level connection established.
    Connected,
    /// Server acknowledged the SASL capability request (`CAP ... ACK`).
    CapAcknowledged,
    /// Server is ready for credentials (`AUTHENTICATE +`).
    AuthChallenge,
    /// SASL success numeric (903).
    SaslSucceeded,
    /// SASL failure numeric (904/905) with the server's reason.
    SaslFailed(String),
    /// The per-step timeout expired while waiting for an acknowledgement.
    StepTimedOut,
    /// Transport-level connection lost or closed.
    Disconnected,
}

/// Effects the runner must execute, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionAction {
    /// Write one raw IRC line.
    SendRaw(String),
    /// Close the transport; the session is unusable.
    Disconnect(String),
    /// The session reached `Ready`.
    NotifyReady,
    /// The session fell back to `Disconnected`.
    NotifyDisconnected,
}

/// Identity and channel set for one connection attempt.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub nick: String,
    pub ident: String,
    pub realname: String,
    pub sasl_account: String,
    pub sasl_password: String,
    pub channels: Vec<String>,
}

pub struct Session {
    cfg: SessionConfig,
    phase: Phase,
}

impl Session {
    pub fn new(cfg: SessionConfig) -> Self {
        Self {
            cfg,
            phase: Phase::Disconnected,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Explicit connect request; the runner opens the transport afterwards.
    pub fn begin_connect(&mut self) {
        self.phase = Phase::Connecting;
    }

    pub fn on_event(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        use SessionAction::*;

        match (self.phase, event) {
            // Request the SASL capability before registration, then send
            // NICK/USER, holding back CAP END until authentication is done.
            (Phase::Connecting, SessionEvent::Connected) => {
                self.phase = Phase::NegotiatingCapabilities;
                vec![
                    SendRaw("CAP REQ :sasl".to_string()),
                    SendRaw(format!("NICK {}", self.cfg.nick)),
                    SendRaw(format!("USER {} 0 * :{}", self.cfg.ident, self.cfg.realname)),
                ]
            }

            (Phase::NegotiatingCapabilities, SessionEvent::CapAcknowledged) => {
                self.phase = Phase::Authenticating;
                vec![SendRaw("AUTHENTICATE PLAIN".to_string())]
            }

            (Phase::Authenticating, SessionEvent::AuthChallenge) => {
                self.phase = Phase::FinalizingRegistration;
                vec![SendRaw(format!("AUTHENTICATE {}", self.sasl_plain_blob()))]
            }

            // Joins are fire-and-forget; no per-channel confirmation is
            // awaited, so the join phase completes within this transition
            // and the session comes out Ready.
            (Phase::FinalizingRegistration, SessionEvent::SaslSucceeded) => {
                let mut actions = vec![SendRaw("CAP END".to_string())];
                for channel in &self.cfg.channels {
                    actions.push(SendRaw(format!("JOIN {channel}")));
                }
                self.phase = Phase::Ready;
                actions.push(NotifyReady);
                actions
            }

            (_, SessionEvent::SaslFailed(reason)) => {
                vec![Disconnect(format!("SASL authentication failed: {reason}"))]
            }

            (phase, SessionEvent::StepTimedOut) if phase.awaits_acknowledgement() => {
                vec![Disconnect(format!("handshake step timed out in {phase:?}"))]
            }

            (_, SessionEvent::Disconnected) => {
                self.phase = Phase::Disconnected;
                vec![NotifyDisconnected]
            }

            (phase, event) => {
                debug!(?phase, ?event, "ignoring out-of-order session event");
                vec![]
            }
        }
    }

    /// SASL PLAIN: base64 of `authzid NUL authcid NUL password`, account used
    /// for both identities.
    fn sasl_plain_blob(&self) -> String {
        let raw = format!(
            "{0}\0{0}\0{1}",
            self.cfg.sasl_account, self.cfg.sasl_password
        );
        BASE64.encode(raw.as_bytes())
    }
}
