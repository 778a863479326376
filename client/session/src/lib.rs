//! Client-side counterpart to `login::service::LoginService`: establishes an encrypted channel to
//! the login service, negotiates the application-level hello/login exchange, and on success hands
//! off to the gateway (baseapp) address the login service returned.
//!
//! Mints and transmits its own connection token directly against a shared secret rather than
//! obtaining one from a separate authenticator/lobby service: in this core the login service is
//! the only handshake endpoint a client ever talks to first (see DESIGN.md).

pub mod state;

use flux::contract::{AccountKind, ClientKind, CONNECTION_TOKEN_EXPIRY_SECS};
use flux::error::{NetworkError, PayloadBatch};
use flux::logging;
use flux::session::user::PrivateData;
use flux::time::timestamp_secs;
use flux::{crypto, UserId};
use login::wire::{ClientMessage, ServerMessage};
use mio::net::TcpStream;
use netcode::{Channel, ChannelState, ConnectionToken};
use state::{ClientAction, PendingLogin, ServerMessageView, SessionEvent, SessionState};
use std::io;
use std::net::SocketAddr;
use std::time::Instant;

const LOCAL_CHANNEL_ID: usize = 0;

/// Drives a single outbound session. The channel can be swapped in place when handing off from
/// the login endpoint to the gateway.
pub struct ClientSession {
    client_version: String,
    script_version: String,
    session_key: [u8; 32],
    user_id: UserId,
    channel: Channel,
    poll: mio::Poll,
    state: SessionState,
    events: Vec<SessionEvent>,
    encryption_enabled: bool,
    pending_cipher_key: Option<[u8; crypto::KEY_SIZE]>,
    log: logging::Logger,
}

impl ClientSession {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        client_version: String,
        script_version: String,
        session_key: [u8; 32],
        user_id: UserId,
        encryption_enabled: bool,
        log: L,
    ) -> io::Result<ClientSession> {
        let log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        Ok(ClientSession {
            client_version,
            script_version,
            session_key,
            user_id,
            channel: Channel::new(flux::VERSION_ID, flux::PROTOCOL_ID, &log),
            poll: mio::Poll::new()?,
            state: SessionState::Init,
            events: Vec::new(),
            encryption_enabled,
            pending_cipher_key: None,
            log,
        })
    }

    /// Opens (or reuses, after a `reset()`) a channel to `addr` and drives it through `hello` and
    /// `login`. Fails if the session is already in flight and `can_reset()` is false.
    pub fn login(
        &mut self,
        addr: SocketAddr,
        client_kind: ClientKind,
        login_name: String,
        password: String,
        attached_data: Vec<u8>,
        client_digest: Vec<u8>,
    ) -> io::Result<()> {
        self.ensure_resettable()?;

        self.open_channel(addr)?;

        let key_blob = if self.encryption_enabled {
            let mut material = vec![0u8; crypto::KEY_SIZE];
            crypto::random_bytes(&mut material);
            self.pending_cipher_key = Some(crypto::derive_key(&material));
            material
        } else {
            self.pending_cipher_key = None;
            Vec::new()
        };

        self.send(ClientMessage::Hello {
            client_version: self.client_version.clone(),
            script_version: self.script_version.clone(),
            key_blob,
        })?;

        self.state = SessionState::InitLoginAppChannel(PendingLogin {
            client_kind,
            attached_data,
            login_name,
            password,
            client_digest,
        });

        Ok(())
    }

    /// Thin RPC wrapper: sends `reqCreateAccount`/`reqCreateMailAccount` over an already-connected
    /// login channel. Unlike `login`, account creation isn't gated by this session's own state
    /// machine — the login service answers it independent of hello/login progress.
    pub fn create_account(
        &mut self,
        account_name: String,
        password: String,
        attached_data: Vec<u8>,
        mail: bool,
    ) -> io::Result<()> {
        let message = if mail {
            ClientMessage::ReqCreateMailAccount { account_name, password, attached_data }
        } else {
            ClientMessage::ReqCreateAccount {
                kind: AccountKind::Smart,
                account_name,
                password,
                attached_data,
            }
        };

        self.send(message)
    }

    /// Thin RPC wrapper: sends `reqAccountResetPassword` over an already-connected login channel.
    pub fn reset_password(&mut self, account_name: String) -> io::Result<()> {
        self.send(ClientMessage::ReqAccountResetPassword { account_name })
    }

    /// Returns the session to `INIT`: stops sending, deregisters and closes the underlying
    /// channel, and drops any in-flight handshake state. Safe to call in any state.
    pub fn reset(&mut self) {
        if self.channel.get_state() != ChannelState::Disconnected {
            drop(self.channel.deregister(&self.poll));
            self.channel.close(true);
        }

        self.state = SessionState::Init;
    }

    /// `canReset`: true once the session is idle (`INIT`/`PLAY`) or has reached a terminal
    /// failure; false while a handshake is genuinely in flight.
    pub fn can_reset(&self) -> bool {
        self.state.can_reset()
    }

    /// Advances the per-tick state-machine action (see `state::SessionState::on_tick`), then
    /// drains any inbound server messages and applies them. Returns the client-visible events
    /// accumulated this tick.
    pub fn sync(&mut self, now: Instant) -> io::Result<Vec<SessionEvent>> {
        if self.channel.get_state() == ChannelState::Connected(self.user_id) {
            self.poll_io(now)?;
        }

        let (next_state, actions) = std::mem::replace(&mut self.state, SessionState::Init).on_tick();
        self.state = next_state;
        self.apply(actions)?;

        if self.channel.get_state() == ChannelState::Connected(self.user_id) {
            let mut incoming = PayloadBatch::<ServerMessage>::new();
            loop {
                match self.channel.read() {
                    Ok(netcode::Frame::Payload(pinfo)) => {
                        if self.channel.read_payload(&mut incoming, pinfo).is_err() {
                            self.reset();
                            self.events.push(SessionEvent::Disconnected);
                            break;
                        }
                    }
                    Ok(netcode::Frame::Control(_)) => continue,
                    Err(NetworkError::Wait) => break,
                    Err(NetworkError::Fatal(_)) => {
                        self.reset();
                        self.events.push(SessionEvent::Disconnected);
                        break;
                    }
                }
            }

            for message in incoming.drain() {
                let view = to_view(&message);
                let (next_state, actions) = std::mem::replace(&mut self.state, SessionState::Init).on_message(view);
                self.state = next_state;
                self.apply(actions)?;
            }
        }

        Ok(self.events.drain(..).collect())
    }

    fn apply(&mut self, actions: Vec<ClientAction>) -> io::Result<()> {
        for action in actions {
            match action {
                ClientAction::Send(message) => drop(self.send(message)),
                ClientAction::InstallCipher => match self.pending_cipher_key.take() {
                    Some(key) => {
                        self.channel.install_extra_cipher(key);
                        logging::debug!(self.log, "encrypt-after-hello cipher installed");
                    }
                    None => {
                        logging::debug!(self.log, "handshake acknowledged"; "context" => "apply");
                    }
                },
                ClientAction::ConnectToGateway(handoff) => {
                    let addr = format!("{}:{}", handoff.host, handoff.port);
                    self.reset();

                    if let Ok(parsed) = addr.parse::<SocketAddr>() {
                        drop(self.open_channel(parsed));
                        self.state = SessionState::LoginBaseappChannel(handoff);
                    } else {
                        logging::error!(self.log, "unparseable gateway address"; "addr" => addr.as_str());
                        self.events.push(SessionEvent::Disconnected);
                    }
                }
                ClientAction::Reset => self.reset(),
                ClientAction::Emit(event) => self.events.push(event),
            }
        }

        Ok(())
    }

    fn poll_io(&mut self, now: Instant) -> io::Result<()> {
        let mut events = mio::Events::with_capacity(64);
        self.poll.poll(&mut events, Some(std::time::Duration::from_secs(0)))?;

        if events.iter().next().is_some() {
            drop(self.channel.receive(now));
            drop(self.channel.send(now));
        }

        Ok(())
    }

    /// Mints a fresh connection token for `addr`, writes it on a blocking connect, then converts
    /// the stream to non-blocking and registers it on the session's poll. The client mints its own
    /// token because it already knows the keys it is about to use for the channel.
    fn open_channel(&mut self, addr: SocketAddr) -> io::Result<()> {
        let mut server_key = [0u8; crypto::KEY_SIZE];
        let mut client_key = [0u8; crypto::KEY_SIZE];
        crypto::random_bytes(&mut server_key);
        crypto::random_bytes(&mut client_key);

        let token = ConnectionToken {
            version: flux::VERSION_ID,
            protocol: flux::PROTOCOL_ID,
            expires: timestamp_secs() + CONNECTION_TOKEN_EXPIRY_SECS,
            sequence: 0,
            data: PrivateData {
                user_id: self.user_id,
                server_key,
                client_key,
            },
        };

        let mut std_stream = std::net::TcpStream::connect(addr)?;
        token.write(&mut std_stream, &self.session_key)?;
        std_stream.set_nonblocking(true)?;

        let stream = TcpStream::from_stream(std_stream)?;
        let now = Instant::now();

        self.channel.connect(LOCAL_CHANNEL_ID, stream, server_key, client_key, self.user_id, now);
        self.channel
            .register(LOCAL_CHANNEL_ID, &self.poll)
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "channel registration failed"))?;

        Ok(())
    }

    fn send(&mut self, message: ClientMessage) -> io::Result<()> {
        let mut batch = PayloadBatch::new();
        batch.push(message);

        self.channel
            .write_payload(&mut batch)
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "channel write failed"))
    }

    fn ensure_resettable(&mut self) -> io::Result<()> {
        if self.state != SessionState::Init {
            if !self.can_reset() {
                return Err(io::Error::new(io::ErrorKind::Other, "session busy"));
            }
            self.reset();
        }

        Ok(())
    }
}

fn to_view(message: &ServerMessage) -> ServerMessageView {
    match message {
        ServerMessage::OnHelloCB { component_kind, .. } => {
            ServerMessageView::OnHelloCB { component_kind: *component_kind }
        }
        ServerMessage::OnVersionNotMatch { server_version } => {
            ServerMessageView::OnVersionNotMatch { server_version: server_version.clone() }
        }
        ServerMessage::OnScriptVersionNotMatch { server_script_version } => {
            ServerMessageView::OnScriptVersionNotMatch { server_script_version: server_script_version.clone() }
        }
        ServerMessage::OnCreateAccountResult { code, data } => {
            ServerMessageView::OnCreateAccountResult { code: *code, data: data.clone() }
        }
        ServerMessage::OnLoginFailed { code, data } => {
            ServerMessageView::OnLoginFailed { code: *code, data: data.clone() }
        }
        ServerMessage::OnLoginSuccessfully { account_name, host, port, data } => {
            ServerMessageView::OnLoginSuccessfully {
                account_name: account_name.clone(),
                host: host.clone(),
                port: *port,
                data: data.clone(),
            }
        }
        ServerMessage::OnReqAccountResetPasswordCB { code } => {
            ServerMessageView::OnReqAccountResetPasswordCB { code: *code }
        }
        ServerMessage::OnImportClientMessages { .. } | ServerMessage::OnImportServerErrorsDescr { .. } => {
            ServerMessageView::Other
        }
    }
}
