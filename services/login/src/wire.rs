//! Client-facing message catalog: everything a client can send to or receive from
//! `LoginService`, plus the self-describing bundle shipped by `importClientMessages`.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flux::contract::{AccountKind, ClientKind, ErrorCode};
use flux::error::{Deserialize, NetworkError, NetworkResult, Serialize, SizedRead, SizedWrite};
use std::io::Write;

const MAX_STRING_LEN: usize = 4096;

#[inline]
fn write_bytes<W: SizedWrite>(stream: &mut W, bytes: &[u8]) -> NetworkResult<()> {
    if stream.free_capacity() < 2 + bytes.len() {
        return Err(NetworkError::Wait);
    }

    stream.write_u16::<BigEndian>(bytes.len() as u16)?;
    stream.write_all(bytes)?;
    Ok(())
}

#[inline]
fn write_str<W: SizedWrite>(stream: &mut W, value: &str) -> NetworkResult<()> {
    write_bytes(stream, value.as_bytes())
}

#[inline]
fn read_bytes<R: SizedRead>(stream: &mut R) -> NetworkResult<Vec<u8>> {
    if stream.remaining_data() < 2 {
        return Err(NetworkError::Wait);
    }

    let len = stream.read_u16::<BigEndian>()? as usize;

    if len > MAX_STRING_LEN {
        return Err(NetworkError::Fatal(flux::error::ErrorType::PayloadTooLarge));
    }

    if stream.remaining_data() < len {
        return Err(NetworkError::Wait);
    }

    let mut buf = vec![0u8; len];
    std::io::Read::read_exact(stream, &mut buf)?;
    Ok(buf)
}

#[inline]
fn read_str<R: SizedRead>(stream: &mut R) -> NetworkResult<String> {
    let bytes = read_bytes(stream)?;
    String::from_utf8(bytes).map_err(|_| NetworkError::Fatal(flux::error::ErrorType::Serialization))
}

/// Message ids for the client-visible wire protocol. Stable across releases; new messages are
/// appended, never renumbered.
pub mod id {
    pub const HELLO: u16 = 1;
    pub const LOGIN: u16 = 2;
    pub const REQ_CREATE_ACCOUNT: u16 = 3;
    pub const REQ_CREATE_MAIL_ACCOUNT: u16 = 4;
    pub const REQ_ACCOUNT_RESET_PASSWORD: u16 = 5;
    pub const IMPORT_CLIENT_MESSAGES: u16 = 6;
    pub const IMPORT_SERVER_ERRORS_DESCR: u16 = 7;
    pub const ON_CLIENT_ACTIVE_TICK: u16 = 8;

    pub const ON_HELLO_CB: u16 = 101;
    pub const ON_VERSION_NOT_MATCH: u16 = 102;
    pub const ON_SCRIPT_VERSION_NOT_MATCH: u16 = 103;
    pub const ON_CREATE_ACCOUNT_RESULT: u16 = 104;
    pub const ON_LOGIN_FAILED: u16 = 105;
    pub const ON_LOGIN_SUCCESSFULLY: u16 = 106;
    pub const ON_REQ_ACCOUNT_RESET_PASSWORD_CB: u16 = 107;
    pub const ON_IMPORT_CLIENT_MESSAGES: u16 = 108;
    pub const ON_IMPORT_SERVER_ERRORS_DESCR: u16 = 109;
}

/// Every message a client may send to `LoginService`.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Hello {
        client_version: String,
        script_version: String,
        key_blob: Vec<u8>,
    },
    Login {
        client_kind: ClientKind,
        attached_data: Vec<u8>,
        login_name: String,
        password: String,
        client_digest: Vec<u8>,
    },
    ReqCreateAccount {
        kind: AccountKind,
        account_name: String,
        password: String,
        attached_data: Vec<u8>,
    },
    ReqCreateMailAccount {
        account_name: String,
        password: String,
        attached_data: Vec<u8>,
    },
    ReqAccountResetPassword {
        account_name: String,
    },
    ImportClientMessages,
    ImportServerErrorsDescr,
    OnClientActiveTick,
}

impl ClientMessage {
    fn msg_id(&self) -> u16 {
        match self {
            ClientMessage::Hello { .. } => id::HELLO,
            ClientMessage::Login { .. } => id::LOGIN,
            ClientMessage::ReqCreateAccount { .. } => id::REQ_CREATE_ACCOUNT,
            ClientMessage::ReqCreateMailAccount { .. } => id::REQ_CREATE_MAIL_ACCOUNT,
            ClientMessage::ReqAccountResetPassword { .. } => id::REQ_ACCOUNT_RESET_PASSWORD,
            ClientMessage::ImportClientMessages => id::IMPORT_CLIENT_MESSAGES,
            ClientMessage::ImportServerErrorsDescr => id::IMPORT_SERVER_ERRORS_DESCR,
            ClientMessage::OnClientActiveTick => id::ON_CLIENT_ACTIVE_TICK,
        }
    }
}

impl Serialize for ClientMessage {
    fn serialize<W: SizedWrite>(&self, stream: &mut W) -> NetworkResult<()> {
        if stream.free_capacity() < 2 {
            return Err(NetworkError::Wait);
        }
        stream.write_u16::<BigEndian>(self.msg_id())?;

        match self {
            ClientMessage::Hello {
                client_version,
                script_version,
                key_blob,
            } => {
                write_str(stream, client_version)?;
                write_str(stream, script_version)?;
                write_bytes(stream, key_blob)
            }
            ClientMessage::Login {
                client_kind,
                attached_data,
                login_name,
                password,
                client_digest,
            } => {
                stream.write_u8(*client_kind as u8)?;
                write_bytes(stream, attached_data)?;
                write_str(stream, login_name)?;
                write_str(stream, password)?;
                write_bytes(stream, client_digest)
            }
            ClientMessage::ReqCreateAccount {
                kind,
                account_name,
                password,
                attached_data,
            } => {
                stream.write_u8(*kind as u8)?;
                write_str(stream, account_name)?;
                write_str(stream, password)?;
                write_bytes(stream, attached_data)
            }
            ClientMessage::ReqCreateMailAccount {
                account_name,
                password,
                attached_data,
            } => {
                write_str(stream, account_name)?;
                write_str(stream, password)?;
                write_bytes(stream, attached_data)
            }
            ClientMessage::ReqAccountResetPassword { account_name } => write_str(stream, account_name),
            ClientMessage::ImportClientMessages
            | ClientMessage::ImportServerErrorsDescr
            | ClientMessage::OnClientActiveTick => Ok(()),
        }
    }
}

/// Every message `LoginService` may send back to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    OnHelloCB {
        server_version: String,
        server_script_version: String,
        message_digest: Vec<u8>,
        account_digest: Vec<u8>,
        component_kind: u8,
    },
    OnVersionNotMatch {
        server_version: String,
    },
    OnScriptVersionNotMatch {
        server_script_version: String,
    },
    OnCreateAccountResult {
        code: ErrorCode,
        data: Vec<u8>,
    },
    OnLoginFailed {
        code: ErrorCode,
        data: Vec<u8>,
    },
    OnLoginSuccessfully {
        account_name: String,
        host: String,
        port: u16,
        data: Vec<u8>,
    },
    OnReqAccountResetPasswordCB {
        code: ErrorCode,
    },
    OnImportClientMessages {
        bundle: Vec<u8>,
    },
    OnImportServerErrorsDescr {
        bundle: Vec<u8>,
    },
}

impl ServerMessage {
    fn msg_id(&self) -> u16 {
        match self {
            ServerMessage::OnHelloCB { .. } => id::ON_HELLO_CB,
            ServerMessage::OnVersionNotMatch { .. } => id::ON_VERSION_NOT_MATCH,
            ServerMessage::OnScriptVersionNotMatch { .. } => id::ON_SCRIPT_VERSION_NOT_MATCH,
            ServerMessage::OnCreateAccountResult { .. } => id::ON_CREATE_ACCOUNT_RESULT,
            ServerMessage::OnLoginFailed { .. } => id::ON_LOGIN_FAILED,
            ServerMessage::OnLoginSuccessfully { .. } => id::ON_LOGIN_SUCCESSFULLY,
            ServerMessage::OnReqAccountResetPasswordCB { .. } => id::ON_REQ_ACCOUNT_RESET_PASSWORD_CB,
            ServerMessage::OnImportClientMessages { .. } => id::ON_IMPORT_CLIENT_MESSAGES,
            ServerMessage::OnImportServerErrorsDescr { .. } => id::ON_IMPORT_SERVER_ERRORS_DESCR,
        }
    }
}

impl Serialize for ServerMessage {
    fn serialize<W: SizedWrite>(&self, stream: &mut W) -> NetworkResult<()> {
        if stream.free_capacity() < 2 {
            return Err(NetworkError::Wait);
        }
        stream.write_u16::<BigEndian>(self.msg_id())?;

        match self {
            ServerMessage::OnHelloCB {
                server_version,
                server_script_version,
                message_digest,
                account_digest,
                component_kind,
            } => {
                write_str(stream, server_version)?;
                write_str(stream, server_script_version)?;
                write_bytes(stream, message_digest)?;
                write_bytes(stream, account_digest)?;
                stream.write_u8(*component_kind)?;
                Ok(())
            }
            ServerMessage::OnVersionNotMatch { server_version } => write_str(stream, server_version),
            ServerMessage::OnScriptVersionNotMatch { server_script_version } => {
                write_str(stream, server_script_version)
            }
            ServerMessage::OnCreateAccountResult { code, data } => {
                stream.write_u8(*code as u8)?;
                write_bytes(stream, data)
            }
            ServerMessage::OnLoginFailed { code, data } => {
                stream.write_u8(*code as u8)?;
                write_bytes(stream, data)
            }
            ServerMessage::OnLoginSuccessfully {
                account_name,
                host,
                port,
                data,
            } => {
                write_str(stream, account_name)?;
                write_str(stream, host)?;
                stream.write_u16::<BigEndian>(*port)?;
                write_bytes(stream, data)
            }
            ServerMessage::OnReqAccountResetPasswordCB { code } => stream.write_u8(*code as u8).map_err(Into::into),
            ServerMessage::OnImportClientMessages { bundle } => write_bytes(stream, bundle),
            ServerMessage::OnImportServerErrorsDescr { bundle } => write_bytes(stream, bundle),
        }
    }
}

impl Deserialize for ServerMessage {
    fn deserialize<R: SizedRead>(stream: &mut R) -> NetworkResult<Self> {
        if stream.remaining_data() < 2 {
            return Err(NetworkError::Wait);
        }

        let msg_id = stream.read_u16::<BigEndian>()?;

        Ok(match msg_id {
            id::ON_HELLO_CB => ServerMessage::OnHelloCB {
                server_version: read_str(stream)?,
                server_script_version: read_str(stream)?,
                message_digest: read_bytes(stream)?,
                account_digest: read_bytes(stream)?,
                component_kind: stream.read_u8()?,
            },
            id::ON_VERSION_NOT_MATCH => ServerMessage::OnVersionNotMatch {
                server_version: read_str(stream)?,
            },
            id::ON_SCRIPT_VERSION_NOT_MATCH => ServerMessage::OnScriptVersionNotMatch {
                server_script_version: read_str(stream)?,
            },
            id::ON_CREATE_ACCOUNT_RESULT => ServerMessage::OnCreateAccountResult {
                code: error_code_from(stream.read_u8()?)?,
                data: read_bytes(stream)?,
            },
            id::ON_LOGIN_FAILED => ServerMessage::OnLoginFailed {
                code: error_code_from(stream.read_u8()?)?,
                data: read_bytes(stream)?,
            },
            id::ON_LOGIN_SUCCESSFULLY => ServerMessage::OnLoginSuccessfully {
                account_name: read_str(stream)?,
                host: read_str(stream)?,
                port: stream.read_u16::<BigEndian>()?,
                data: read_bytes(stream)?,
            },
            id::ON_REQ_ACCOUNT_RESET_PASSWORD_CB => ServerMessage::OnReqAccountResetPasswordCB {
                code: error_code_from(stream.read_u8()?)?,
            },
            id::ON_IMPORT_CLIENT_MESSAGES => ServerMessage::OnImportClientMessages {
                bundle: read_bytes(stream)?,
            },
            id::ON_IMPORT_SERVER_ERRORS_DESCR => ServerMessage::OnImportServerErrorsDescr {
                bundle: read_bytes(stream)?,
            },
            _ => return Err(NetworkError::Fatal(flux::error::ErrorType::Serialization)),
        })
    }
}

#[inline]
fn error_code_from(value: u8) -> NetworkResult<ErrorCode> {
    ErrorCode::from_u8(value).ok_or(NetworkError::Fatal(flux::error::ErrorType::Serialization))
}

impl Deserialize for ClientMessage {
    fn deserialize<R: SizedRead>(stream: &mut R) -> NetworkResult<Self> {
        if stream.remaining_data() < 2 {
            return Err(NetworkError::Wait);
        }

        let msg_id = stream.read_u16::<BigEndian>()?;

        Ok(match msg_id {
            id::HELLO => ClientMessage::Hello {
                client_version: read_str(stream)?,
                script_version: read_str(stream)?,
                key_blob: read_bytes(stream)?,
            },
            id::LOGIN => ClientMessage::Login {
                client_kind: ClientKind::from(stream.read_u8()?),
                attached_data: read_bytes(stream)?,
                login_name: read_str(stream)?,
                password: read_str(stream)?,
                client_digest: read_bytes(stream)?,
            },
            id::REQ_CREATE_ACCOUNT => ClientMessage::ReqCreateAccount {
                kind: account_kind_from(stream.read_u8()?)?,
                account_name: read_str(stream)?,
                password: read_str(stream)?,
                attached_data: read_bytes(stream)?,
            },
            id::REQ_CREATE_MAIL_ACCOUNT => ClientMessage::ReqCreateMailAccount {
                account_name: read_str(stream)?,
                password: read_str(stream)?,
                attached_data: read_bytes(stream)?,
            },
            id::REQ_ACCOUNT_RESET_PASSWORD => ClientMessage::ReqAccountResetPassword {
                account_name: read_str(stream)?,
            },
            id::IMPORT_CLIENT_MESSAGES => ClientMessage::ImportClientMessages,
            id::IMPORT_SERVER_ERRORS_DESCR => ClientMessage::ImportServerErrorsDescr,
            id::ON_CLIENT_ACTIVE_TICK => ClientMessage::OnClientActiveTick,
            _ => return Err(NetworkError::Fatal(flux::error::ErrorType::Serialization)),
        })
    }
}

#[inline]
fn account_kind_from(value: u8) -> NetworkResult<AccountKind> {
    match value {
        0 => Ok(AccountKind::Normal),
        1 => Ok(AccountKind::Mail),
        2 => Ok(AccountKind::Smart),
        _ => Err(NetworkError::Fatal(flux::error::ErrorType::Serialization)),
    }
}

/// One entry of the `importClientMessages` catalog: the message id, its human name and whether
/// it is variable-arity on the wire.
pub struct CatalogEntry {
    pub msg_id: u16,
    pub name: &'static str,
}

/// Client-visible message catalog, in the order `importClientMessages` ships them. Built once and
/// cached by the caller (see `service::LoginService::import_client_messages`).
pub const CLIENT_MESSAGE_CATALOG: &[CatalogEntry] = &[
    CatalogEntry { msg_id: id::HELLO, name: "hello" },
    CatalogEntry { msg_id: id::LOGIN, name: "login" },
    CatalogEntry {
        msg_id: id::REQ_CREATE_ACCOUNT,
        name: "reqCreateAccount",
    },
    CatalogEntry {
        msg_id: id::REQ_CREATE_MAIL_ACCOUNT,
        name: "reqCreateMailAccount",
    },
    CatalogEntry {
        msg_id: id::REQ_ACCOUNT_RESET_PASSWORD,
        name: "reqAccountResetPassword",
    },
    CatalogEntry {
        msg_id: id::IMPORT_CLIENT_MESSAGES,
        name: "importClientMessages",
    },
    CatalogEntry {
        msg_id: id::IMPORT_SERVER_ERRORS_DESCR,
        name: "importServerErrorsDescr",
    },
    CatalogEntry {
        msg_id: id::ON_CLIENT_ACTIVE_TICK,
        name: "onClientActiveTick",
    },
];

/// Serializes the client message catalog into the self-describing byte bundle shipped by
/// `importClientMessages`: a count followed by `(id, name_len, name)` tuples.
pub fn encode_client_message_catalog() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u16::<BigEndian>(CLIENT_MESSAGE_CATALOG.len() as u16).unwrap();

    for entry in CLIENT_MESSAGE_CATALOG {
        buf.write_u16::<BigEndian>(entry.msg_id).unwrap();
        let name = entry.name.replace("::", "_");
        buf.write_u16::<BigEndian>(name.len() as u16).unwrap();
        buf.write_all(name.as_bytes()).unwrap();
    }

    buf
}

const ERROR_CATALOG: &[(ErrorCode, &str)] = &[
    (ErrorCode::Success, "success"),
    (ErrorCode::Name, "invalid account name"),
    (ErrorCode::NameMail, "invalid account email"),
    (ErrorCode::Password, "invalid password"),
    (ErrorCode::OpFailed, "operation failed"),
    (ErrorCode::Busy, "request already in flight"),
    (ErrorCode::SrvNoReady, "server not ready"),
    (ErrorCode::SrvOverload, "server overloaded"),
    (ErrorCode::SrvStarting, "server starting"),
    (ErrorCode::InShuttingDown, "server shutting down"),
    (
        ErrorCode::AccountRegisterNotAvailable,
        "account registration disabled",
    ),
    (ErrorCode::AccountLock, "account locked"),
    (ErrorCode::AccountNotActivated, "account not activated"),
    (ErrorCode::AccountDeadline, "account expired"),
    (ErrorCode::EntityDefsNotMatch, "entity definitions mismatch"),
];

/// Serializes the error-code catalog into the bundle shipped by `importServerErrorsDescr`.
pub fn encode_error_catalog() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u16::<BigEndian>(ERROR_CATALOG.len() as u16).unwrap();

    for (code, descr) in ERROR_CATALOG {
        buf.write_u8(*code as u8).unwrap();
        buf.write_u16::<BigEndian>(descr.len() as u16).unwrap();
        buf.write_all(descr.as_bytes()).unwrap();
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux::error::PayloadBatch;
    use std::io::Cursor;

    #[test]
    fn hello_round_trips() {
        let msg = ClientMessage::Hello {
            client_version: "1.2.3".into(),
            script_version: "4.5.6".into(),
            key_blob: vec![1, 2, 3, 4],
        };

        let mut buf = [0u8; 256];
        {
            let mut cursor = Cursor::new(&mut buf[..]);
            msg.serialize(&mut cursor).unwrap();
        }

        let mut cursor = Cursor::new(&buf[..]);
        let parsed = ClientMessage::deserialize(&mut cursor).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn on_login_successfully_round_trips() {
        let msg = ServerMessage::OnLoginSuccessfully {
            account_name: "alice".into(),
            host: "10.0.0.5".into(),
            port: 20014,
            data: vec![9, 9, 9],
        };

        let mut buf = [0u8; 256];
        {
            let mut cursor = Cursor::new(&mut buf[..]);
            msg.serialize(&mut cursor).unwrap();
        }

        let mut cursor = Cursor::new(&buf[..]);
        let parsed = ServerMessage::deserialize(&mut cursor).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn on_login_failed_rejects_unknown_error_code() {
        let mut buf = [0u8; 16];
        {
            let mut cursor = Cursor::new(&mut buf[..]);
            cursor.write_u16::<BigEndian>(id::ON_LOGIN_FAILED).unwrap();
            cursor.write_u8(250).unwrap();
        }

        let mut cursor = Cursor::new(&buf[..]);
        assert!(ServerMessage::deserialize(&mut cursor).is_err());
    }

    #[test]
    fn catalog_is_idempotent() {
        assert_eq!(encode_client_message_catalog(), encode_client_message_catalog());
    }

    #[test]
    fn payload_batch_of_client_messages_round_trips() {
        let mut outgoing = PayloadBatch::new();
        outgoing.push(ClientMessage::ImportClientMessages);
        outgoing.push(ClientMessage::OnClientActiveTick);

        let mut buf = [0u8; 256];
        {
            let mut cursor = Cursor::new(&mut buf[..]);
            outgoing.write(&mut cursor).unwrap();
        }

        let mut cursor = Cursor::new(&buf[..]);
        assert_eq!(
            ClientMessage::deserialize(&mut cursor).unwrap(),
            ClientMessage::ImportClientMessages
        );
        assert_eq!(
            ClientMessage::deserialize(&mut cursor).unwrap(),
            ClientMessage::OnClientActiveTick
        );
    }
}
