//! Pure client-side state-transition logic for the login/handshake flow, kept free of actual
//! networking so it can be exercised without real sockets. `ClientSession` (see `lib.rs`) owns the
//! channel and drives these transitions off real ticks and inbound messages.

use flux::contract::{ClientKind, ErrorCode};
use login::wire::ClientMessage;

/// Peer kind values carried in `ServerMessage::OnHelloCB::component_kind`. Mirrors the login
/// service's own `COMPONENT_KIND_LOGIN`; the gateway value has no server-side counterpart in this
/// core (the gateway/baseapp component is out of scope) but the client still has to recognize it
/// once handed off to one.
pub const COMPONENT_KIND_LOGIN: u8 = 1;
pub const COMPONENT_KIND_GATEWAY: u8 = 2;

/// Credentials for an in-flight `login` RPC, carried from the moment `onHelloCB` promotes the
/// session into `Login` through to the next tick, which is when the RPC is actually sent.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingLogin {
    pub client_kind: ClientKind,
    pub attached_data: Vec<u8>,
    pub login_name: String,
    pub password: String,
    pub client_digest: Vec<u8>,
}

/// Gateway hand-off parameters carried from `onLoginSuccessfully` through to the tick that tears
/// down the login channel and opens the gateway one.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayHandoff {
    pub account_name: String,
    pub host: String,
    pub port: u16,
    pub ticket: Vec<u8>,
}

/// Session state, enumerated exactly as specified: `INIT`, `INITLOGINAPP_CHANNEL`, `LOGIN`,
/// `LOGIN_BASEAPP_CHANNEL`, `LOGIN_BASEAPP`, `PLAY`. The transitional states carry whatever
/// payload their one-time tick-time action needs.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Init,
    InitLoginAppChannel(PendingLogin),
    Login(PendingLogin),
    LoginBaseappChannel(GatewayHandoff),
    LoginBaseapp(GatewayHandoff),
    Play,
}

/// An effect `ClientSession` must perform against the real channel/poll in response to a
/// transition. Mirrors the outbound-effects-accumulator pattern `LoginService` uses for its own
/// external interactions.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction {
    Send(ClientMessage),
    /// Install the session's pre-handshake cipher now that `onHelloCB` confirmed the peer
    /// accepted it (encrypt-after-hello).
    InstallCipher,
    /// Tear down the login channel and open a new one to the gateway.
    ConnectToGateway(GatewayHandoff),
    /// Return to `INIT`: drop the channel and any in-flight handshake state.
    Reset,
    Emit(SessionEvent),
}

/// Client-visible outcomes surfaced to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    HelloAccepted,
    VersionMismatch { server_version: String },
    ScriptVersionMismatch { server_script_version: String },
    CreateAccountResult { code: ErrorCode, data: Vec<u8> },
    LoginFailed { code: ErrorCode, data: Vec<u8> },
    ResetPasswordResult { code: ErrorCode },
    /// The gateway handshake completed. The actual post-handshake gateway-login RPC and
    /// everything past it (gameplay protocol) is a Non-goal of this core.
    GatewayHandshakeComplete { account_name: String },
    Disconnected,
}

impl SessionState {
    /// Applies the one-time per-tick action for states that carry one, then settles into the
    /// resting `PLAY` state. Each state is handled explicitly rather than falling through to the
    /// next, unlike the fallthrough `switch` this behavior is derived from: `INIT` and
    /// `INITLOGINAPP_CHANNEL` have no tick-time action of their own and just advance, while
    /// `LOGIN`, `LOGIN_BASEAPP_CHANNEL` and `LOGIN_BASEAPP` each perform one.
    pub fn on_tick(self) -> (SessionState, Vec<ClientAction>) {
        match self {
            SessionState::Init | SessionState::InitLoginAppChannel(_) => (SessionState::Play, Vec::new()),
            SessionState::Login(pending) => {
                let action = ClientAction::Send(ClientMessage::Login {
                    client_kind: pending.client_kind,
                    attached_data: pending.attached_data,
                    login_name: pending.login_name,
                    password: pending.password,
                    client_digest: pending.client_digest,
                });
                (SessionState::Play, vec![action])
            }
            SessionState::LoginBaseappChannel(handoff) => {
                (SessionState::Play, vec![ClientAction::ConnectToGateway(handoff)])
            }
            SessionState::LoginBaseapp(handoff) => (
                SessionState::Play,
                vec![ClientAction::Emit(SessionEvent::GatewayHandshakeComplete {
                    account_name: handoff.account_name,
                })],
            ),
            SessionState::Play => (SessionState::Play, Vec::new()),
        }
    }

    /// Applies an inbound server message. The resting `PLAY` state is not special-cased here:
    /// most messages are accepted regardless of the current state (mirroring `LoginService`'s own
    /// handlers, which don't gate on a server-side equivalent of this state machine either).
    pub fn on_message(self, message: ServerMessageView) -> (SessionState, Vec<ClientAction>) {
        match message {
            ServerMessageView::OnHelloCB { component_kind } => match self {
                SessionState::InitLoginAppChannel(pending) if component_kind == COMPONENT_KIND_LOGIN => (
                    SessionState::Login(pending),
                    vec![ClientAction::InstallCipher, ClientAction::Emit(SessionEvent::HelloAccepted)],
                ),
                SessionState::LoginBaseappChannel(handoff) if component_kind == COMPONENT_KIND_GATEWAY => {
                    (SessionState::LoginBaseapp(handoff), vec![ClientAction::InstallCipher])
                }
                other => (other, Vec::new()),
            },
            ServerMessageView::OnVersionNotMatch { server_version } => (
                SessionState::Init,
                vec![
                    ClientAction::Reset,
                    ClientAction::Emit(SessionEvent::VersionMismatch { server_version }),
                ],
            ),
            ServerMessageView::OnScriptVersionNotMatch { server_script_version } => (
                SessionState::Init,
                vec![
                    ClientAction::Reset,
                    ClientAction::Emit(SessionEvent::ScriptVersionMismatch { server_script_version }),
                ],
            ),
            ServerMessageView::OnCreateAccountResult { code, data } => (
                self,
                vec![ClientAction::Emit(SessionEvent::CreateAccountResult { code, data })],
            ),
            ServerMessageView::OnLoginFailed { code, data } => (
                SessionState::Init,
                vec![
                    ClientAction::Reset,
                    ClientAction::Emit(SessionEvent::LoginFailed { code, data }),
                ],
            ),
            ServerMessageView::OnLoginSuccessfully { account_name, host, port, data } => (
                SessionState::LoginBaseappChannel(GatewayHandoff {
                    account_name,
                    host,
                    port,
                    ticket: data,
                }),
                Vec::new(),
            ),
            ServerMessageView::OnReqAccountResetPasswordCB { code } => {
                (self, vec![ClientAction::Emit(SessionEvent::ResetPasswordResult { code })])
            }
            ServerMessageView::Other => (self, Vec::new()),
        }
    }

    /// `canReset` becomes true only after a terminal failure or once steady-state `PLAY` is
    /// reached, so that a session mid-handshake cannot be stomped by a concurrent `login`/
    /// `createAccount` call.
    pub fn can_reset(&self) -> bool {
        matches!(self, SessionState::Init | SessionState::Play)
    }
}

/// The subset of `ServerMessage` fields `on_message` needs, without depending on the full enum's
/// variable-length payloads the caller already owns. Keeps this module decoupled from exactly how
/// `ClientSession` destructures the wire type.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessageView {
    OnHelloCB { component_kind: u8 },
    OnVersionNotMatch { server_version: String },
    OnScriptVersionNotMatch { server_script_version: String },
    OnCreateAccountResult { code: ErrorCode, data: Vec<u8> },
    OnLoginFailed { code: ErrorCode, data: Vec<u8> },
    OnLoginSuccessfully { account_name: String, host: String, port: u16, data: Vec<u8> },
    OnReqAccountResetPasswordCB { code: ErrorCode },
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> PendingLogin {
        PendingLogin {
            client_kind: ClientKind::Desktop,
            attached_data: vec![],
            login_name: "alice".into(),
            password: "hunter2".into(),
            client_digest: vec![1, 2, 3],
        }
    }

    #[test]
    fn hello_cb_from_login_promotes_to_login_and_installs_cipher() {
        let (state, actions) = SessionState::InitLoginAppChannel(pending())
            .on_message(ServerMessageView::OnHelloCB { component_kind: COMPONENT_KIND_LOGIN });

        assert!(matches!(state, SessionState::Login(_)));
        assert!(actions.contains(&ClientAction::InstallCipher));
        assert!(actions.contains(&ClientAction::Emit(SessionEvent::HelloAccepted)));
    }

    #[test]
    fn hello_cb_with_mismatched_kind_is_ignored() {
        let (state, actions) = SessionState::InitLoginAppChannel(pending())
            .on_message(ServerMessageView::OnHelloCB { component_kind: COMPONENT_KIND_GATEWAY });

        assert!(matches!(state, SessionState::InitLoginAppChannel(_)));
        assert!(actions.is_empty());
    }

    #[test]
    fn login_tick_sends_login_rpc_and_settles_in_play() {
        let (state, actions) = SessionState::Login(pending()).on_tick();

        assert_eq!(state, SessionState::Play);
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], ClientAction::Send(ClientMessage::Login { .. })));
    }

    #[test]
    fn login_successfully_queues_gateway_handoff() {
        let (state, actions) = SessionState::Play.on_message(ServerMessageView::OnLoginSuccessfully {
            account_name: "alice".into(),
            host: "10.0.0.9".into(),
            port: 20014,
            data: vec![9, 9],
        });

        assert!(matches!(state, SessionState::LoginBaseappChannel(_)));
        assert!(actions.is_empty());
    }

    #[test]
    fn gateway_channel_tick_connects_to_gateway() {
        let handoff = GatewayHandoff {
            account_name: "alice".into(),
            host: "10.0.0.9".into(),
            port: 20014,
            ticket: vec![9, 9],
        };

        let (state, actions) = SessionState::LoginBaseappChannel(handoff.clone()).on_tick();

        assert_eq!(state, SessionState::Play);
        assert_eq!(actions, vec![ClientAction::ConnectToGateway(handoff)]);
    }

    #[test]
    fn login_failed_resets_to_init() {
        let (state, actions) = SessionState::Login(pending())
            .on_message(ServerMessageView::OnLoginFailed { code: ErrorCode::Password, data: vec![] });

        assert_eq!(state, SessionState::Init);
        assert!(actions.contains(&ClientAction::Reset));
    }

    #[test]
    fn can_reset_only_in_init_or_play() {
        assert!(SessionState::Init.can_reset());
        assert!(SessionState::Play.can_reset());
        assert!(!SessionState::Login(pending()).can_reset());
    }
}
