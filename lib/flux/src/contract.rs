//! Wire-level contract shared between `ClientSession` and `LoginService`: the account/client
//! discriminants, account flags and bounds, and the error codes a login attempt can resolve to.

use serde_derive::{Deserialize, Serialize};

pub const ACCOUNT_NAME_MAX_LENGTH: usize = 64;
pub const ACCOUNT_PASSWD_MAX_LENGTH: usize = 64;
pub const ACCOUNT_DATA_MAX_LENGTH: usize = 256;
pub const CONNECTION_TOKEN_EXPIRY_SECS: u64 = 300;

/// Requested kind of account to create. `Smart` lets the server infer `Mail` vs `Normal` from
/// whether the supplied name is a syntactically valid email address.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AccountKind {
    Normal = 0,
    Mail = 1,
    Smart = 2,
}

/// Opaque identifier of the connecting client implementation. Out-of-range wire values are
/// normalized to `Unknown` rather than rejected.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ClientKind {
    Desktop = 0,
    Mobile = 1,
    Web = 2,
    Unknown = 255,
}

impl From<u8> for ClientKind {
    #[inline]
    fn from(value: u8) -> ClientKind {
        match value {
            0 => ClientKind::Desktop,
            1 => ClientKind::Mobile,
            2 => ClientKind::Web,
            _ => ClientKind::Unknown,
        }
    }
}

/// Account status bits carried back from the database on a login reply.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct AccountFlags(pub u32);

impl AccountFlags {
    pub const LOCK: u32 = 0b0000_0001;
    pub const NOT_ACTIVATED: u32 = 0b0000_0010;

    #[inline]
    pub fn is_locked(self) -> bool {
        self.0 & Self::LOCK != 0
    }

    #[inline]
    pub fn is_not_activated(self) -> bool {
        self.0 & Self::NOT_ACTIVATED != 0
    }
}

/// Wire-level error codes a create/login attempt can resolve to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorCode {
    Success = 0,
    Name,
    NameMail,
    Password,
    OpFailed,
    Busy,
    SrvNoReady,
    SrvOverload,
    SrvStarting,
    InShuttingDown,
    AccountRegisterNotAvailable,
    AccountLock,
    AccountNotActivated,
    AccountDeadline,
    EntityDefsNotMatch,
}

impl ErrorCode {
    pub fn from_u8(value: u8) -> Option<ErrorCode> {
        const CODES: [ErrorCode; 15] = [
            ErrorCode::Success,
            ErrorCode::Name,
            ErrorCode::NameMail,
            ErrorCode::Password,
            ErrorCode::OpFailed,
            ErrorCode::Busy,
            ErrorCode::SrvNoReady,
            ErrorCode::SrvOverload,
            ErrorCode::SrvStarting,
            ErrorCode::InShuttingDown,
            ErrorCode::AccountRegisterNotAvailable,
            ErrorCode::AccountLock,
            ErrorCode::AccountNotActivated,
            ErrorCode::AccountDeadline,
            ErrorCode::EntityDefsNotMatch,
        ];

        CODES.get(value as usize).copied()
    }
}
