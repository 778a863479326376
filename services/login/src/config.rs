//! Configuration surface for `LoginService`, loaded from a JSON file by `serde_json`, mirroring
//! the teacher's `authenticator::core::Config` / `gen_config.rs` pair.

use flux::contract::{ACCOUNT_DATA_MAX_LENGTH, ACCOUNT_NAME_MAX_LENGTH, ACCOUNT_PASSWD_MAX_LENGTH};
use flux::session::server::SessionKey;
use serde_derive::{Deserialize, Serialize};

fn default_account_type() -> String {
    "smart".to_string()
}

fn default_true() -> bool {
    true
}

fn default_game_update_hertz() -> u32 {
    50
}

fn default_http_cb_port() -> u16 {
    8080
}

fn default_start_group_order() -> u32 {
    1
}

fn default_account_name_max_len() -> usize {
    ACCOUNT_NAME_MAX_LENGTH
}

fn default_account_passwd_max_len() -> usize {
    ACCOUNT_PASSWD_MAX_LENGTH
}

fn default_account_data_max_len() -> usize {
    ACCOUNT_DATA_MAX_LENGTH
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub listen_address: String,

    /// Shared secret used to decrypt the client handshake's connection token.
    pub session_key: SessionKey,

    #[serde(default = "default_account_type")]
    pub account_type: String,

    #[serde(default = "default_true")]
    pub account_registration_enable: bool,

    #[serde(default)]
    pub allow_empty_digest: bool,

    #[serde(default = "default_game_update_hertz")]
    pub game_update_hertz: u32,

    /// `none` or `symmetric` — whether client channels are expected to carry an encryption key
    /// in their `hello`.
    #[serde(default = "default_true")]
    pub external_channel_encryption_enable: bool,

    pub external_address: String,

    #[serde(default = "default_http_cb_port")]
    pub http_cb_port: u16,

    /// This node's position in the login cluster's group order, normally announced by the
    /// database component on startup; operator-supplied here since this core runs without one.
    /// `1` means this node is the leader and owns the HTTP callback surface.
    #[serde(default = "default_start_group_order")]
    pub start_group_order: u32,

    /// Accepted but otherwise unused by this core; reserved for the excluded script-runtime
    /// subsystem.
    #[serde(default)]
    pub entry_script_file: String,

    #[serde(default = "default_account_name_max_len")]
    pub account_name_max_len: usize,

    #[serde(default = "default_account_passwd_max_len")]
    pub account_passwd_max_len: usize,

    #[serde(default = "default_account_data_max_len")]
    pub account_data_max_len: usize,
}

impl ServiceConfig {
    pub const PENDING_REQUEST_TTL_SECS: u64 = 30;
    pub const TICK_INTERVAL_MILLIS: u64 = 20;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let key = SessionKey::new([7u8; SessionKey::SIZE]);
        let json = serde_json::to_string(&ServiceConfig {
            listen_address: "0.0.0.0:20013".into(),
            session_key: key,
            account_type: "smart".into(),
            account_registration_enable: true,
            allow_empty_digest: false,
            game_update_hertz: 50,
            external_channel_encryption_enable: true,
            external_address: "login.example.com:20013".into(),
            http_cb_port: 8080,
            start_group_order: 1,
            entry_script_file: String::new(),
            account_name_max_len: ACCOUNT_NAME_MAX_LENGTH,
            account_passwd_max_len: ACCOUNT_PASSWD_MAX_LENGTH,
            account_data_max_len: ACCOUNT_DATA_MAX_LENGTH,
        })
        .unwrap();

        let parsed: ServiceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.listen_address, "0.0.0.0:20013");
        assert_eq!(parsed.account_name_max_len, ACCOUNT_NAME_MAX_LENGTH);
    }
}
