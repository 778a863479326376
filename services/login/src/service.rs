//! Core `LoginService` logic: the account-creation and login algorithms, the HTTP-callback
//! handoff, and the lazily-cached client message/error catalogs.
//!
//! `LoginService` itself never touches sockets. Every operation records the effects it wants
//! (replies to a client channel, requests to the database or gateway-manager, worker-pool tasks)
//! as `Outbound` values; the caller (`main.rs`'s event loop, or a test) drains them and performs
//! the actual I/O. This mirrors `Endpoint::changes()`'s drain-after-sync idiom.

use crate::config::ServiceConfig;
use crate::directory::ComponentDirectory;
use crate::pending::PendingRequestTable;
use crate::wire::{self, ServerMessage};
use flux::contract::{AccountFlags, AccountKind, ClientKind, ErrorCode};
use flux::logging;
use flux::time::timestamp_secs;
use flux::crypto;
use hashbrown::HashMap;
use netcode::ChannelId;
use std::net::SocketAddr;

const SERVER_VERSION: &str = "1.0.0";
const SERVER_SCRIPT_VERSION: &str = "1.0.0";
const COMPONENT_KIND_LOGIN: u8 = 1;

/// Requests LoginService wants to forward to the database component.
#[derive(Debug, Clone, PartialEq)]
pub enum DbRequest {
    CreateAccount {
        account_name: String,
        password: String,
        kind: AccountKind,
        attached_data: Vec<u8>,
    },
    AccountLogin {
        login_name: String,
        password: String,
        attached_data: Vec<u8>,
    },
    AccountResetPassword {
        account_name: String,
    },
    EraseClientReq {
        account_name: String,
    },
    /// Out-of-band HTTP callback outcomes, validated against a minted `PendingCallbackKind` entry
    /// before being forwarded here.
    NotifyAccountActivated {
        account_name: String,
        success: bool,
    },
    NotifyAccountBindedEmail {
        account_name: String,
        success: bool,
    },
    NotifyAccountResetPassword {
        account_name: String,
        success: bool,
    },
}

/// Which out-of-band HTTP callback a minted code was issued for. Prevents a code minted for one
/// flow (say, activation) from being replayed against another (say, password reset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingCallbackKind {
    Activation,
    BindEmail,
    ResetPassword,
}

/// Requests LoginService wants to forward to the gateway-manager component.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayRequest {
    RegisterPendingAccountToBaseapp {
        login_name: String,
        account_name: String,
        attached_data: Vec<u8>,
    },
    RegisterPendingAccountToBaseappAddr {
        gateway_component_id: u64,
        login_name: String,
        account_name: String,
        attached_data: Vec<u8>,
    },
}

/// A blocking task handed off to the worker pool (SMTP send, catalog parse). Results come back
/// on the next `on_main_thread_tick`.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerTask {
    SendActivationEmail { account_name: String, http_host: String, code: String },
    SendResetPasswordEmail { account_name: String, http_host: String, code: String },
}

/// An effect `LoginService` wants the caller to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    ToClient(ChannelId, ServerMessage),
    ToDatabase(DbRequest),
    ToGatewayManager(GatewayRequest),
    EnqueueWorkerTask(WorkerTask),
    CloseClient(ChannelId),
    /// Install the post-handshake symmetric cipher negotiated in `hello` (encrypt-after-hello).
    InstallExtraCipher(ChannelId, [u8; crypto::KEY_SIZE]),
}

/// Result of a completed database login query, handed to `on_db_login_query_result`.
#[derive(Debug, Clone)]
pub struct DbLoginReply {
    pub retcode: ErrorCode,
    pub login_name: String,
    pub account_name: String,
    pub existing_gateway_component_id: u64,
    pub flags: AccountFlags,
    pub deadline: u64,
    pub attached_data: Vec<u8>,
}

pub struct LoginService {
    config: ServiceConfig,
    log: logging::Logger,

    directory: ComponentDirectory,
    create_pending: PendingRequestTable,
    login_pending: PendingRequestTable,

    /// Channel id -> account/login name, mirroring the original's per-channel "extra" slot. Used
    /// to notify the database when a client disconnects mid-request.
    client_extra: HashMap<ChannelId, String>,

    /// Opaque code -> (flow, account name) minted for the out-of-band HTTP callback surface.
    /// Consumed (removed) the first time the matching callback fires, so a code can't be replayed.
    pending_callbacks: HashMap<String, (PendingCallbackKind, String)>,

    init_progress: f32,
    shutting_down: bool,

    account_digest: Vec<u8>,
    message_catalog_cache: Option<Vec<u8>>,
    error_catalog_cache: Option<Vec<u8>>,

    outbound: Vec<Outbound>,
}

impl LoginService {
    pub fn new(config: ServiceConfig, log: &logging::Logger) -> LoginService {
        let ttl = ServiceConfig::PENDING_REQUEST_TTL_SECS;

        LoginService {
            config,
            log: log.new(logging::o!()),
            directory: ComponentDirectory::new(),
            create_pending: PendingRequestTable::new(ttl),
            login_pending: PendingRequestTable::new(ttl),
            client_extra: HashMap::new(),
            pending_callbacks: HashMap::new(),
            init_progress: 0.0,
            shutting_down: false,
            account_digest: Vec::new(),
            message_catalog_cache: None,
            error_catalog_cache: None,
            outbound: Vec::new(),
        }
    }

    /// Drains the effects accumulated since the last drain.
    pub fn drain_outbound(&mut self) -> impl Iterator<Item = Outbound> + '_ {
        self.outbound.drain(..)
    }

    #[inline]
    fn reply(&mut self, channel: ChannelId, msg: ServerMessage) {
        self.outbound.push(Outbound::ToClient(channel, msg));
    }

    // ---- handshake ----------------------------------------------------------------------

    /// `keyMaterial` is the client's `hello.keyBlob`. When the external-encryption policy is
    /// enabled and at least 4 bytes were sent, a symmetric cipher is installed on the channel
    /// *after* the `onHelloCB` reply has been queued for send (encrypt-after-hello); otherwise the
    /// channel remains in plaintext.
    pub fn on_hello(&mut self, channel: ChannelId, client_version: &str, script_version: &str, key_material: &[u8]) {
        if client_version != SERVER_VERSION {
            logging::warn!(self.log, "version mismatch"; "client_version" => client_version);
            self.reply(
                channel,
                ServerMessage::OnVersionNotMatch {
                    server_version: SERVER_VERSION.to_string(),
                },
            );
            return;
        }

        if script_version != SERVER_SCRIPT_VERSION {
            logging::warn!(self.log, "script version mismatch"; "script_version" => script_version);
            self.reply(
                channel,
                ServerMessage::OnScriptVersionNotMatch {
                    server_script_version: SERVER_SCRIPT_VERSION.to_string(),
                },
            );
            return;
        }

        self.reply(
            channel,
            ServerMessage::OnHelloCB {
                server_version: SERVER_VERSION.to_string(),
                server_script_version: SERVER_SCRIPT_VERSION.to_string(),
                message_digest: wire::encode_client_message_catalog(),
                account_digest: self.account_digest.clone(),
                component_kind: COMPONENT_KIND_LOGIN,
            },
        );

        if !self.config.external_channel_encryption_enable {
            return;
        }

        if key_material.len() < 4 {
            logging::warn!(self.log, "hello key material too short, channel stays plaintext";
                           "channel_id" => channel, "key_material_len" => key_material.len());
            return;
        }

        self.outbound
            .push(Outbound::InstallExtraCipher(channel, crypto::derive_key(key_material)));
    }

    pub fn on_client_active_tick(&mut self, _channel: ChannelId) {
        // Liveness bookkeeping (last-ingress refresh) is handled at the channel layer; nothing
        // further to do here.
    }

    // ---- account creation -----------------------------------------------------------------

    pub fn req_create_account(
        &mut self,
        channel: ChannelId,
        kind: AccountKind,
        account_name: &str,
        password: &str,
        attached_data: Vec<u8>,
        remote_addr: SocketAddr,
    ) {
        self.create_account(channel, kind, account_name, password, attached_data, remote_addr);
    }

    pub fn req_create_mail_account(
        &mut self,
        channel: ChannelId,
        account_name: &str,
        password: &str,
        attached_data: Vec<u8>,
        remote_addr: SocketAddr,
    ) {
        self.create_account(channel, AccountKind::Mail, account_name, password, attached_data, remote_addr);
    }

    fn create_account(
        &mut self,
        channel: ChannelId,
        kind: AccountKind,
        account_name: &str,
        password: &str,
        attached_data: Vec<u8>,
        remote_addr: SocketAddr,
    ) {
        if !self.config.account_registration_enable {
            self.reply(
                channel,
                ServerMessage::OnCreateAccountResult {
                    code: ErrorCode::AccountRegisterNotAvailable,
                    data: Vec::new(),
                },
            );
            return;
        }

        if self.shutting_down {
            self.reply(
                channel,
                ServerMessage::OnCreateAccountResult {
                    code: ErrorCode::InShuttingDown,
                    data: Vec::new(),
                },
            );
            return;
        }

        if account_name.len() > self.config.account_name_max_len
            || password.len() > self.config.account_passwd_max_len
            || attached_data.len() > self.config.account_data_max_len
        {
            logging::warn!(self.log, "oversize create account request dropped"; "account_name" => account_name);
            return;
        }

        if self.create_pending.contains(account_name) {
            self.reply(
                channel,
                ServerMessage::OnCreateAccountResult {
                    code: ErrorCode::Busy,
                    data: Vec::new(),
                },
            );
            return;
        }

        let resolved_kind = match resolve_account_kind(kind, account_name) {
            Ok(resolved) => resolved,
            Err(code) => {
                self.reply(channel, ServerMessage::OnCreateAccountResult { code, data: Vec::new() });
                return;
            }
        };

        if self.directory.database().is_none() {
            self.reply(
                channel,
                ServerMessage::OnCreateAccountResult {
                    code: ErrorCode::SrvNoReady,
                    data: Vec::new(),
                },
            );
            return;
        }

        self.create_pending
            .add(account_name, ClientKind::Desktop, attached_data.clone(), remote_addr);
        self.client_extra.insert(channel, account_name.to_string());

        self.outbound.push(Outbound::ToDatabase(DbRequest::CreateAccount {
            account_name: account_name.to_string(),
            password: password.to_string(),
            kind: resolved_kind,
            attached_data,
        }));
    }

    /// Handles the database's asynchronous reply to a create-account request.
    pub fn on_db_create_account_result(
        &mut self,
        channel: ChannelId,
        account_name: &str,
        code: ErrorCode,
        is_mail: bool,
    ) {
        let pending = match self.create_pending.remove(account_name) {
            Some(pending) => pending,
            None => {
                logging::warn!(self.log, "create account reply with no pending entry"; "account_name" => account_name);
                return;
            }
        };

        self.client_extra.remove(&channel);

        self.reply(
            channel,
            ServerMessage::OnCreateAccountResult {
                code,
                data: pending.attached_data,
            },
        );

        if is_mail && code == ErrorCode::Success {
            let http_host = self.directory.http_callback_host(&self.config.external_address);
            let callback_code = self.mint_callback_code(account_name, PendingCallbackKind::Activation);

            if let Some(http_host) = http_host {
                self.outbound.push(Outbound::EnqueueWorkerTask(WorkerTask::SendActivationEmail {
                    account_name: account_name.to_string(),
                    http_host: format!("{}:{}", http_host, self.config.http_cb_port),
                    code: callback_code,
                }));
            }
        }
    }

    // ---- login ------------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn login(
        &mut self,
        channel: ChannelId,
        client_kind: ClientKind,
        attached_data: Vec<u8>,
        login_name: &str,
        password: &str,
        client_digest: &[u8],
        remote_addr: SocketAddr,
    ) {
        let login_name = login_name.trim();

        if login_name.is_empty() || login_name.len() > self.config.account_name_max_len {
            self.reply(channel, ServerMessage::OnLoginFailed { code: ErrorCode::Name, data: Vec::new() });
            return;
        }

        if password.len() > self.config.account_passwd_max_len {
            self.reply(channel, ServerMessage::OnLoginFailed { code: ErrorCode::Password, data: Vec::new() });
            return;
        }

        if attached_data.len() > self.config.account_data_max_len {
            self.reply(channel, ServerMessage::OnLoginFailed { code: ErrorCode::OpFailed, data: Vec::new() });
            return;
        }

        if self.directory.gateway_manager().is_none() || self.directory.database().is_none() {
            self.reply(channel, ServerMessage::OnLoginFailed { code: ErrorCode::SrvNoReady, data: Vec::new() });
            return;
        }

        if !self.config.allow_empty_digest && !client_digest.is_empty() && client_digest != self.account_digest {
            self.reply(
                channel,
                ServerMessage::OnLoginFailed {
                    code: ErrorCode::EntityDefsNotMatch,
                    data: Vec::new(),
                },
            );
            return;
        }

        if self.login_pending.contains(login_name) {
            self.reply(channel, ServerMessage::OnLoginFailed { code: ErrorCode::Busy, data: Vec::new() });
            return;
        }

        self.login_pending.add(login_name, client_kind, attached_data.clone(), remote_addr);
        self.client_extra.insert(channel, login_name.to_string());

        if self.shutting_down {
            self.reply(channel, ServerMessage::OnLoginFailed { code: ErrorCode::InShuttingDown, data: Vec::new() });
            return;
        }

        if self.init_progress < 1.0 {
            self.reply(
                channel,
                ServerMessage::OnLoginFailed {
                    code: ErrorCode::SrvStarting,
                    data: progress_bytes(self.init_progress),
                },
            );
            return;
        }

        self.outbound.push(Outbound::ToDatabase(DbRequest::AccountLogin {
            login_name: login_name.to_string(),
            password: password.to_string(),
            attached_data,
        }));
    }

    /// Handles the database's asynchronous reply to a login query.
    pub fn on_db_login_query_result(&mut self, channel: ChannelId, result: DbLoginReply) {
        if result.flags.is_locked() {
            self.fail_login(channel, &result.login_name, ErrorCode::AccountLock, result.attached_data);
            return;
        }

        if result.flags.is_not_activated() {
            self.fail_login(channel, &result.login_name, ErrorCode::AccountNotActivated, result.attached_data);
            return;
        }

        if result.deadline > 0 && timestamp_secs() >= result.deadline {
            self.fail_login(channel, &result.login_name, ErrorCode::AccountDeadline, result.attached_data);
            return;
        }

        let pending = match self.login_pending.find(&result.login_name) {
            Some(pending) => pending.clone(),
            None => {
                logging::warn!(self.log, "login reply with no pending entry"; "login_name" => result.login_name.as_str());
                self.reply(channel, ServerMessage::OnLoginFailed { code: ErrorCode::SrvOverload, data: Vec::new() });
                return;
            }
        };

        if result.retcode != ErrorCode::Success {
            self.fail_login(channel, &result.login_name, result.retcode, pending.attached_data);
            return;
        }

        let request = if result.existing_gateway_component_id > 0 {
            GatewayRequest::RegisterPendingAccountToBaseappAddr {
                gateway_component_id: result.existing_gateway_component_id,
                login_name: result.login_name.clone(),
                account_name: result.account_name.clone(),
                attached_data: pending.attached_data,
            }
        } else {
            GatewayRequest::RegisterPendingAccountToBaseapp {
                login_name: result.login_name.clone(),
                account_name: result.account_name.clone(),
                attached_data: pending.attached_data,
            }
        };

        self.outbound.push(Outbound::ToGatewayManager(request));
    }

    fn fail_login(&mut self, channel: ChannelId, login_name: &str, code: ErrorCode, data: Vec<u8>) {
        self.login_pending.remove(login_name);
        self.client_extra.remove(&channel);
        self.reply(channel, ServerMessage::OnLoginFailed { code, data });
    }

    /// Handles the gateway-manager's asynchronous reply carrying the gateway address to send the
    /// client to.
    pub fn on_gateway_login_addr_result(&mut self, channel: ChannelId, login_name: &str, account_name: &str, host: &str, port: u16) {
        if host.is_empty() {
            self.fail_login(channel, login_name, ErrorCode::SrvNoReady, Vec::new());
            return;
        }

        let pending = match self.login_pending.remove(login_name) {
            Some(pending) => pending,
            None => return,
        };

        self.client_extra.remove(&channel);

        self.reply(
            channel,
            ServerMessage::OnLoginSuccessfully {
                account_name: account_name.to_string(),
                host: host.to_string(),
                port,
                data: pending.attached_data,
            },
        );
    }

    // ---- password reset ---------------------------------------------------------------------

    pub fn req_account_reset_password(&mut self, channel: ChannelId, account_name: &str) {
        if self.directory.database().is_none() {
            self.reply(channel, ServerMessage::OnReqAccountResetPasswordCB { code: ErrorCode::SrvNoReady });
            return;
        }

        self.outbound.push(Outbound::ToDatabase(DbRequest::AccountResetPassword {
            account_name: account_name.to_string(),
        }));
        self.reply(channel, ServerMessage::OnReqAccountResetPasswordCB { code: ErrorCode::Success });
    }

    pub fn on_db_reset_password_result(&mut self, channel: ChannelId, account_name: &str, code: ErrorCode) {
        if code == ErrorCode::Success {
            let http_host = self.directory.http_callback_host(&self.config.external_address);
            let callback_code = self.mint_callback_code(account_name, PendingCallbackKind::ResetPassword);

            if let Some(http_host) = http_host {
                self.outbound.push(Outbound::EnqueueWorkerTask(WorkerTask::SendResetPasswordEmail {
                    account_name: account_name.to_string(),
                    http_host: format!("{}:{}", http_host, self.config.http_cb_port),
                    code: callback_code,
                }));
            }
        }

        self.reply(channel, ServerMessage::OnReqAccountResetPasswordCB { code });
    }

    // ---- HTTP callback surface ---------------------------------------------------------------

    /// Mints an opaque, single-use code for `kind` and binds it to `account_name` until a
    /// matching callback consumes it via `take_pending_callback`.
    fn mint_callback_code(&mut self, account_name: &str, kind: PendingCallbackKind) -> String {
        let mut raw = [0u8; 16];
        crypto::random_bytes(&mut raw);
        let code = base64::encode(&raw);

        self.pending_callbacks.insert(code.clone(), (kind, account_name.to_string()));

        code
    }

    /// Consumes `code` if it was minted for `kind` and hasn't already been used. Returns the
    /// account name it was minted for.
    fn take_pending_callback(&mut self, code: &str, kind: PendingCallbackKind) -> Option<String> {
        match self.pending_callbacks.remove(code) {
            Some((found_kind, account_name)) if found_kind == kind => Some(account_name),
            Some((found_kind, account_name)) => {
                logging::warn!(self.log, "callback code used for the wrong flow";
                               "account_name" => account_name.as_str(), "expected" => ?kind, "found" => ?found_kind);
                None
            }
            None => None,
        }
    }

    /// Invoked by the embedded HTTP handler when an activation link is followed. `success`
    /// reflects whether `code` validated against the pending record it was minted for; only the
    /// group leader node owns this handler, calling it on a non-leader node is a caller bug.
    pub fn on_account_activated(&mut self, code: &str, success: bool) {
        if !self.directory.is_leader() {
            logging::warn!(self.log, "activation callback invoked on non-leader node");
            return;
        }

        let account_name = match self.take_pending_callback(code, PendingCallbackKind::Activation) {
            Some(account_name) => account_name,
            None => {
                logging::warn!(self.log, "activation callback with unknown or already-used code");
                return;
            }
        };

        self.outbound
            .push(Outbound::ToDatabase(DbRequest::NotifyAccountActivated { account_name, success }));
    }

    /// Invoked by the embedded HTTP handler when a bind-email link is followed.
    pub fn on_account_binded_email(&mut self, code: &str, success: bool) {
        if !self.directory.is_leader() {
            logging::warn!(self.log, "bind-email callback invoked on non-leader node");
            return;
        }

        let account_name = match self.take_pending_callback(code, PendingCallbackKind::BindEmail) {
            Some(account_name) => account_name,
            None => {
                logging::warn!(self.log, "bind-email callback with unknown or already-used code");
                return;
            }
        };

        self.outbound
            .push(Outbound::ToDatabase(DbRequest::NotifyAccountBindedEmail { account_name, success }));
    }

    /// Invoked by the embedded HTTP handler when a password-reset link is followed.
    pub fn on_account_reset_password(&mut self, code: &str, success: bool) {
        if !self.directory.is_leader() {
            logging::warn!(self.log, "reset-password callback invoked on non-leader node");
            return;
        }

        let account_name = match self.take_pending_callback(code, PendingCallbackKind::ResetPassword) {
            Some(account_name) => account_name,
            None => {
                logging::warn!(self.log, "reset-password callback with unknown or already-used code");
                return;
            }
        };

        self.outbound
            .push(Outbound::ToDatabase(DbRequest::NotifyAccountResetPassword { account_name, success }));
    }

    // ---- component lifecycle -----------------------------------------------------------------

    pub fn on_dbmgr_init_completed(&mut self, start_group_order: u32, account_digest: Vec<u8>) {
        self.directory.set_self_group_order(start_group_order);
        self.account_digest = account_digest;
    }

    /// Clamps `initProgress` to be monotonic non-decreasing, matching the original's guard
    /// against an out-of-order progress update.
    pub fn on_baseapp_init_progress(&mut self, progress: f32) {
        if progress > self.init_progress {
            self.init_progress = progress.min(1.0);
        }
    }

    pub fn begin_shutdown(&mut self) {
        self.shutting_down = true;
    }

    /// Called when a client channel is torn down. Notifies the database of any request in flight
    /// on behalf of that channel so it can be discarded server-side.
    pub fn on_channel_closed(&mut self, channel: ChannelId) {
        self.directory.disconnect_channel(channel);

        if let Some(account_name) = self.client_extra.remove(&channel) {
            self.outbound
                .push(Outbound::ToDatabase(DbRequest::EraseClientReq { account_name }));
        }
    }

    /// Sweeps pending-request tables for expired entries. Should be invoked once per tick. Any
    /// `client_extra` slot pointing at an expired key is released along with it, mirroring the
    /// release that already happens on a successful or failed reply.
    pub fn on_main_thread_tick(&mut self) {
        let expired = self
            .create_pending
            .process()
            .into_iter()
            .chain(self.login_pending.process());

        for name in expired {
            self.client_extra.retain(|_, v| v != &name);
        }
    }

    // ---- catalogs ------------------------------------------------------------------------

    pub fn import_client_messages(&mut self, channel: ChannelId) {
        let bundle = self
            .message_catalog_cache
            .get_or_insert_with(wire::encode_client_message_catalog)
            .clone();

        self.reply(channel, ServerMessage::OnImportClientMessages { bundle });
    }

    pub fn import_server_errors_descr(&mut self, channel: ChannelId) {
        let bundle = self
            .error_catalog_cache
            .get_or_insert_with(wire::encode_error_catalog)
            .clone();

        self.reply(channel, ServerMessage::OnImportServerErrorsDescr { bundle });
    }

    pub fn directory_mut(&mut self) -> &mut ComponentDirectory {
        &mut self.directory
    }

    pub fn directory(&self) -> &ComponentDirectory {
        &self.directory
    }
}

/// Resolves `SMART` into `MAIL`/`NORMAL` based on whether `account_name` is a syntactically valid
/// email address; validates explicit `NORMAL`/`MAIL` kinds against name/email validity.
fn resolve_account_kind(kind: AccountKind, account_name: &str) -> Result<AccountKind, ErrorCode> {
    match kind {
        AccountKind::Smart => {
            if is_valid_email(account_name) {
                Ok(AccountKind::Mail)
            } else if is_valid_account_name(account_name) {
                Ok(AccountKind::Normal)
            } else {
                Err(ErrorCode::Name)
            }
        }
        AccountKind::Normal => {
            if is_valid_account_name(account_name) {
                Ok(AccountKind::Normal)
            } else {
                Err(ErrorCode::Name)
            }
        }
        AccountKind::Mail => {
            if is_valid_email(account_name) {
                Ok(AccountKind::Mail)
            } else {
                Err(ErrorCode::NameMail)
            }
        }
    }
}

fn is_valid_account_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_valid_email(name: &str) -> bool {
    match name.find('@') {
        Some(at) => at > 0 && name[at + 1..].contains('.') && !name.ends_with('.'),
        None => false,
    }
}

fn progress_bytes(progress: f32) -> Vec<u8> {
    progress.to_be_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{ComponentKind, ComponentRecord};
    use flux::session::server::SessionKey;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000)
    }

    fn test_config() -> ServiceConfig {
        ServiceConfig {
            listen_address: "127.0.0.1:20013".into(),
            session_key: SessionKey::new([1u8; SessionKey::SIZE]),
            account_type: "smart".into(),
            account_registration_enable: true,
            allow_empty_digest: true,
            game_update_hertz: 50,
            external_channel_encryption_enable: true,
            external_address: "login.example.com:20013".into(),
            http_cb_port: 8080,
            start_group_order: 1,
            entry_script_file: String::new(),
            account_name_max_len: 64,
            account_passwd_max_len: 64,
            account_data_max_len: 256,
        }
    }

    fn service() -> LoginService {
        LoginService::new(test_config(), &flux::logging::init())
    }

    fn db_record() -> ComponentRecord {
        ComponentRecord {
            kind: ComponentKind::Database,
            component_id: 1,
            internal_address: "10.0.0.1:1000".into(),
            external_address: String::new(),
            group_order: 0,
            global_order: 0,
            channel_id: Some(42),
        }
    }

    fn gateway_manager_record() -> ComponentRecord {
        ComponentRecord {
            kind: ComponentKind::GatewayManager,
            component_id: 2,
            internal_address: "10.0.0.2:2000".into(),
            external_address: String::new(),
            group_order: 0,
            global_order: 0,
            channel_id: Some(43),
        }
    }

    #[test]
    fn create_account_disabled_registration() {
        let mut svc = service();
        svc.config.account_registration_enable = false;

        svc.req_create_account(1, AccountKind::Normal, "alice", "pw", Vec::new(), addr());

        let outbound: Vec<_> = svc.drain_outbound().collect();
        assert_eq!(
            outbound,
            vec![Outbound::ToClient(
                1,
                ServerMessage::OnCreateAccountResult {
                    code: ErrorCode::AccountRegisterNotAvailable,
                    data: Vec::new()
                }
            )]
        );
    }

    #[test]
    fn create_account_busy_on_second_request() {
        let mut svc = service();
        svc.directory_mut().set_database(db_record());

        svc.req_create_account(1, AccountKind::Normal, "bob", "pw", Vec::new(), addr());
        svc.drain_outbound().for_each(drop);

        svc.req_create_account(2, AccountKind::Normal, "bob", "pw", Vec::new(), addr());
        let outbound: Vec<_> = svc.drain_outbound().collect();

        assert_eq!(
            outbound,
            vec![Outbound::ToClient(
                2,
                ServerMessage::OnCreateAccountResult { code: ErrorCode::Busy, data: Vec::new() }
            )]
        );
    }

    #[test]
    fn login_fails_without_gateway_manager() {
        let mut svc = service();
        svc.directory_mut().set_database(db_record());

        svc.login(1, ClientKind::Desktop, Vec::new(), "carol", "pw", &[], addr());

        let outbound: Vec<_> = svc.drain_outbound().collect();
        assert_eq!(
            outbound,
            vec![Outbound::ToClient(
                1,
                ServerMessage::OnLoginFailed { code: ErrorCode::SrvNoReady, data: Vec::new() }
            )]
        );
    }

    #[test]
    fn login_locked_account_fails() {
        let mut svc = service();
        svc.directory_mut().set_database(db_record());
        svc.directory_mut().set_gateway_manager(gateway_manager_record());
        svc.on_baseapp_init_progress(1.0);

        svc.login(1, ClientKind::Desktop, Vec::new(), "dave", "pw", &[], addr());
        svc.drain_outbound().for_each(drop);

        svc.on_db_login_query_result(
            1,
            DbLoginReply {
                retcode: ErrorCode::Success,
                login_name: "dave".into(),
                account_name: "dave".into(),
                existing_gateway_component_id: 0,
                flags: AccountFlags(AccountFlags::LOCK),
                deadline: 0,
                attached_data: vec![9],
            },
        );

        let outbound: Vec<_> = svc.drain_outbound().collect();
        assert_eq!(
            outbound,
            vec![Outbound::ToClient(
                1,
                ServerMessage::OnLoginFailed { code: ErrorCode::AccountLock, data: vec![9] }
            )]
        );
    }

    #[test]
    fn login_existing_gateway_targets_specific_component() {
        let mut svc = service();
        svc.directory_mut().set_database(db_record());
        svc.directory_mut().set_gateway_manager(gateway_manager_record());
        svc.on_baseapp_init_progress(1.0);

        svc.login(1, ClientKind::Desktop, Vec::new(), "erin", "pw", &[], addr());
        svc.drain_outbound().for_each(drop);

        svc.on_db_login_query_result(
            1,
            DbLoginReply {
                retcode: ErrorCode::Success,
                login_name: "erin".into(),
                account_name: "erin".into(),
                existing_gateway_component_id: 42,
                flags: AccountFlags::default(),
                deadline: 0,
                attached_data: Vec::new(),
            },
        );

        let outbound: Vec<_> = svc.drain_outbound().collect();
        assert_eq!(
            outbound,
            vec![Outbound::ToGatewayManager(GatewayRequest::RegisterPendingAccountToBaseappAddr {
                gateway_component_id: 42,
                login_name: "erin".into(),
                account_name: "erin".into(),
                attached_data: Vec::new(),
            })]
        );

        svc.on_gateway_login_addr_result(1, "erin", "erin", "10.0.0.9", 9001);
        let outbound: Vec<_> = svc.drain_outbound().collect();
        assert_eq!(
            outbound,
            vec![Outbound::ToClient(
                1,
                ServerMessage::OnLoginSuccessfully {
                    account_name: "erin".into(),
                    host: "10.0.0.9".into(),
                    port: 9001,
                    data: Vec::new(),
                }
            )]
        );
    }

    #[test]
    fn resolve_smart_account_kind_prefers_mail_for_valid_email() {
        assert_eq!(resolve_account_kind(AccountKind::Smart, "a@b.com"), Ok(AccountKind::Mail));
        assert_eq!(resolve_account_kind(AccountKind::Smart, "plain_name"), Ok(AccountKind::Normal));
        assert_eq!(resolve_account_kind(AccountKind::Smart, "not valid!"), Err(ErrorCode::Name));
    }

    #[test]
    fn import_client_messages_is_idempotent() {
        let mut svc = service();
        svc.import_client_messages(1);
        svc.import_client_messages(1);

        let outbound: Vec<_> = svc.drain_outbound().collect();
        match (&outbound[0], &outbound[1]) {
            (
                Outbound::ToClient(_, ServerMessage::OnImportClientMessages { bundle: a }),
                Outbound::ToClient(_, ServerMessage::OnImportClientMessages { bundle: b }),
            ) => assert_eq!(a, b),
            _ => panic!("unexpected outbound {:?}", outbound),
        }
    }

    #[test]
    fn hello_installs_extra_cipher_when_key_material_present() {
        let mut svc = service();
        svc.on_hello(1, SERVER_VERSION, SERVER_SCRIPT_VERSION, &[1, 2, 3, 4]);

        let outbound: Vec<_> = svc.drain_outbound().collect();
        assert!(matches!(outbound[0], Outbound::ToClient(_, ServerMessage::OnHelloCB { .. })));
        assert!(matches!(outbound[1], Outbound::InstallExtraCipher(1, _)));
    }

    #[test]
    fn hello_skips_extra_cipher_when_key_material_too_short() {
        let mut svc = service();
        svc.on_hello(1, SERVER_VERSION, SERVER_SCRIPT_VERSION, &[1, 2]);

        let outbound: Vec<_> = svc.drain_outbound().collect();
        assert_eq!(outbound.len(), 1);
        assert!(matches!(outbound[0], Outbound::ToClient(_, ServerMessage::OnHelloCB { .. })));
    }

    #[test]
    fn hello_skips_extra_cipher_when_policy_disabled() {
        let mut svc = service();
        svc.config.external_channel_encryption_enable = false;
        svc.on_hello(1, SERVER_VERSION, SERVER_SCRIPT_VERSION, &[1, 2, 3, 4]);

        let outbound: Vec<_> = svc.drain_outbound().collect();
        assert_eq!(outbound.len(), 1);
    }

    #[test]
    fn account_activated_requires_a_valid_code() {
        let mut svc = service();
        svc.directory_mut().set_self_group_order(1);

        svc.on_account_activated("bogus-code", true);
        assert!(svc.drain_outbound().next().is_none());
    }

    #[test]
    fn account_activated_consumes_code_minted_for_activation() {
        let mut svc = service();
        svc.directory_mut().set_self_group_order(1);
        svc.directory_mut().set_database(db_record());

        svc.on_db_create_account_result(1, "alice@example.com", ErrorCode::Success, true);
        let outbound: Vec<_> = svc.drain_outbound().collect();
        let code = outbound
            .iter()
            .find_map(|effect| match effect {
                Outbound::EnqueueWorkerTask(WorkerTask::SendActivationEmail { code, .. }) => Some(code.clone()),
                _ => None,
            })
            .expect("activation email should have been enqueued");

        svc.on_account_activated(&code, true);
        let outbound: Vec<_> = svc.drain_outbound().collect();
        assert_eq!(
            outbound,
            vec![Outbound::ToDatabase(DbRequest::NotifyAccountActivated {
                account_name: "alice@example.com".into(),
                success: true,
            })]
        );

        // The code is single-use.
        svc.on_account_activated(&code, true);
        assert!(svc.drain_outbound().next().is_none());
    }

    #[test]
    fn account_activated_code_cannot_be_replayed_against_reset_password() {
        let mut svc = service();
        svc.directory_mut().set_self_group_order(1);
        let code = svc.mint_callback_code("alice", PendingCallbackKind::Activation);

        svc.on_account_reset_password(&code, true);
        assert!(svc.drain_outbound().next().is_none());
    }

    #[test]
    fn account_binded_email_consumes_its_own_code() {
        let mut svc = service();
        svc.directory_mut().set_self_group_order(1);
        let code = svc.mint_callback_code("alice", PendingCallbackKind::BindEmail);

        svc.on_account_binded_email(&code, true);
        let outbound: Vec<_> = svc.drain_outbound().collect();
        assert_eq!(
            outbound,
            vec![Outbound::ToDatabase(DbRequest::NotifyAccountBindedEmail {
                account_name: "alice".into(),
                success: true,
            })]
        );
    }

    #[test]
    fn main_thread_tick_releases_client_extra_on_ttl_expiry() {
        let mut svc = service();
        // A zero-ttl table expires an entry on the very next `process()` call, standing in for
        // the passage of real time.
        svc.create_pending = PendingRequestTable::new(0);
        svc.create_pending.add("frank", ClientKind::Desktop, Vec::new(), addr());
        svc.client_extra.insert(7, "frank".to_string());

        svc.on_main_thread_tick();

        assert!(!svc.client_extra.contains_key(&7));
    }

    #[test]
    fn dbmgr_init_completed_sets_leadership_and_digest() {
        let mut svc = service();
        assert!(!svc.directory().is_leader());

        svc.on_dbmgr_init_completed(1, vec![9, 9, 9]);

        assert!(svc.directory().is_leader());
        assert_eq!(svc.account_digest, vec![9, 9, 9]);
    }
}
