//! Connection runner.
//!
//! Owns the transport and the core session state machine: feeds it protocol
//! events, executes the actions it returns, arms the per-step handshake
//! timeout, routes channel messages to the command dispatcher and pushes
//! outbound notifications. Reconnects with fresh configuration after a lost
//! connection or an explicit restart request.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use gitbot_core::{
    config::SharedConfig,
    dispatcher::CommandDispatcher,
    domain::Hostmask,
    errors::Error,
    ports::MessageSink,
    session::{Phase, Session, SessionAction, SessionConfig, SessionEvent},
    Result,
};

use crate::{
    parse::{self, InboundEvent},
    transport::IrcTransport,
};

const HANDSHAKE_STEP_TIMEOUT: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(15);
const OUTBOUND_QUEUE: usize = 64;

/// Control requests from the supervising process (signal handlers).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    /// Tear the connection down and reconnect with freshly read config.
    Restart,
    /// Disconnect and end the runner.
    Quit,
}

enum ConnectionEnd {
    Lost,
    Restart,
    Quit,
}

/// Cloneable handle other components use to send messages through the
/// session. Sends fail while the session is not ready; nothing is queued
/// for later delivery.
#[derive(Clone)]
pub struct SessionHandle {
    outbound: mpsc::Sender<OutboundMessage>,
    ready: Arc<AtomicBool>,
}

struct OutboundMessage {
    target: String,
    text: String,
}

#[async_trait]
impl MessageSink for SessionHandle {
    async fn send_message(&self, target: &str, text: &str) -> Result<()> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(Error::Transport("session is not ready".to_string()));
        }
        self.outbound
            .send(OutboundMessage {
                target: target.to_string(),
                text: text.to_string(),
            })
            .await
            .map_err(|_| Error::Transport("session closed".to_string()))
    }
}

pub struct IrcRunner {
    config: SharedConfig,
    dispatcher: Arc<CommandDispatcher>,
    outbound_rx: mpsc::Receiver<OutboundMessage>,
    control_rx: mpsc::Receiver<Control>,
    ready: Arc<AtomicBool>,
}

impl IrcRunner {
    pub fn new(
        config: SharedConfig,
        dispatcher: Arc<CommandDispatcher>,
    ) -> (Self, SessionHandle, mpsc::Sender<Control>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (control_tx, control_rx) = mpsc::channel(4);
        let ready = Arc::new(AtomicBool::new(false));

        let handle = SessionHandle {
            outbound: outbound_tx,
            ready: ready.clone(),
        };
        let runner = Self {
            config,
            dispatcher,
            outbound_rx,
            control_rx,
            ready: ready.clone(),
        };
        (runner, handle, control_tx)
    }

    /// Run until a quit request. Lost connections reconnect after a pause;
    /// restart requests reconnect immediately.
    pub async fn run(mut self) -> Result<()> {
        loop {
            let end = self.run_connection().await;
            self.ready.store(false, Ordering::SeqCst);

            match end {
                Ok(ConnectionEnd::Quit) => {
                    info!("IRC runner shutting down");
                    return Ok(());
                }
                Ok(ConnectionEnd::Restart) => {
                    info!("restarting IRC connection");
                }
                Ok(ConnectionEnd::Lost) => {
                    warn!("IRC connection lost, reconnecting in {RECONNECT_DELAY:?}");
                    if let Some(Control::Quit) = self.pause_before_reconnect().await {
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!(error = %e, "IRC connection attempt failed, retrying in {RECONNECT_DELAY:?}");
                    if let Some(Control::Quit) = self.pause_before_reconnect().await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Sleep out the reconnect delay, but keep honoring control requests.
    async fn pause_before_reconnect(&mut self) -> Option<Control> {
        tokio::select! {
            _ = sleep(RECONNECT_DELAY) => None,
            ctl = self.control_rx.recv() => Some(ctl.unwrap_or(Control::Quit)),
        }
    }

    async fn run_connection(&mut self) -> Result<ConnectionEnd> {
        // Snapshot the configuration for this attempt; a rehash applies to
        // the next connect.
        let (host, port, tls, nick, session_cfg) = {
            let cfg = self.config.read().await;
            (
                cfg.irc.server.clone(),
                cfg.irc.port,
                cfg.irc.tls,
                cfg.irc.nick.clone(),
                SessionConfig {
                    nick: cfg.irc.nick.clone(),
                    ident: cfg.irc.ident.clone(),
                    realname: cfg.irc.realname.clone(),
                    sasl_account: cfg.irc.sasl_account.clone(),
                    sasl_password: cfg.irc.sasl_password.clone(),
                    channels: cfg.irc.channels.clone(),
                },
            )
        };

        let mut session = Session::new(session_cfg);
        session.begin_connect();

        info!(server = %host, port, tls, "connecting to IRC");
        let mut transport = IrcTransport::connect(&host, port, tls).await?;

        let actions = session.on_event(SessionEvent::Connected);
        if self.apply_actions(&mut transport, actions).await? {
            return Ok(ConnectionEnd::Lost);
        }

        let mut phase = session.phase();
        let mut deadline = handshake_deadline(phase);

        loop {
            let step_timeout = async {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                line = transport.next_line() => {
                    match line? {
                        None => {
                            session.on_event(SessionEvent::Disconnected);
                            return Ok(ConnectionEnd::Lost);
                        }
                        Some(raw) => {
                            if self.handle_line(&mut transport, &mut session, &nick, &raw).await? {
                                return Ok(ConnectionEnd::Lost);
                            }
                        }
                    }
                }

                Some(msg) = self.outbound_rx.recv() => {
                    if session.phase() == Phase::Ready {
                        transport
                            .send_line(&format!("PRIVMSG {} :{}", msg.target, msg.text))
                            .await?;
                    } else {
                        debug!(target = %msg.target, "dropping outbound message, session not ready");
                    }
                }

                ctl = self.control_rx.recv() => {
                    match ctl.unwrap_or(Control::Quit) {
                        Control::Restart => {
                            let _ = transport.send_line("QUIT :restarting").await;
                            return Ok(ConnectionEnd::Restart);
                        }
                        Control::Quit => {
                            let _ = transport.send_line("QUIT :shutting down").await;
                            return Ok(ConnectionEnd::Quit);
                        }
                    }
                }

                _ = step_timeout => {
                    let actions = session.on_event(SessionEvent::StepTimedOut);
                    if self.apply_actions(&mut transport, actions).await? {
                        return Ok(ConnectionEnd::Lost);
                    }
                }
            }

            if session.phase() != phase {
                phase = session.phase();
                deadline = handshake_deadline(phase);
            }
        }
    }

    /// Process one server line. Returns `true` when the connection must be
    /// torn down.
    async fn handle_line(
        &self,
        transport: &mut IrcTransport,
        session: &mut Session,
        own_nick: &str,
        raw: &str,
    ) -> Result<bool> {
        let Some(line) = parse::parse_line(raw) else {
            return Ok(false);
        };

        match parse::to_event(&line) {
            Some(InboundEvent::Ping(token)) => {
                transport.send_line(&format!("PONG :{token}")).await?;
            }

            Some(InboundEvent::Session(event)) => {
                let actions = session.on_event(event);
                if self.apply_actions(transport, actions).await? {
                    return Ok(true);
                }
            }

            Some(InboundEvent::Privmsg {
                sender_nick,
                sender_host,
                target,
                text,
            }) => {
                if session.phase() != Phase::Ready {
                    return Ok(false);
                }
                let sender = Hostmask::new(&sender_nick, &sender_host);
                // Directly addressed messages have our nick as target; route
                // the reply back to the sender instead.
                let reply_channel = if target == own_nick {
                    sender_nick.clone()
                } else {
                    target
                };
                // Commands run one at a time: the next line is not read
                // until this reply went out.
                if let Some(reply) = self
                    .dispatcher
                    .handle(&sender, &sender_nick, &reply_channel, &text)
                    .await
                {
                    transport
                        .send_line(&format!("PRIVMSG {} :{}", reply.target, reply.text))
                        .await?;
                }
            }

            None => {}
        }

        Ok(false)
    }

    /// Execute session actions in order. Returns `true` when a disconnect
    /// was requested.
    async fn apply_actions(
        &self,
        transport: &mut IrcTransport,
        actions: Vec<SessionAction>,
    ) -> Result<bool> {
        for action in actions {
            match action {
                SessionAction::SendRaw(line) => transport.send_line(&line).await?,
                SessionAction::Disconnect(reason) => {
                    warn!(%reason, "closing IRC connection");
                    return Ok(true);
                }
                SessionAction::NotifyReady => {
                    info!("IRC session ready");
                    self.ready.store(true, Ordering::SeqCst);
                }
                SessionAction::NotifyDisconnected => {
                    self.ready.store(false, Ordering::SeqCst);
                }
            }
        }
        Ok(false)
    }
}

fn handshake_deadline(phase: Phase) -> Option<Instant> {
    phase
        .awaits_acknowledgement()
        .then(|| Instant::now() + HANDSHAKE_STEP_TIMEOUT)
}
