use clap::{App, Arg};
use flux::crypto;
use flux::session::server::SessionKey;
use login::config::ServiceConfig;
use std::fs;

fn main() {
    let matches = App::new("Config Generator")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Generates a login service config file with a fresh session key.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the config file to write")
                .required(true),
        )
        .arg(
            Arg::with_name("listen_address")
                .long("listen-address")
                .takes_value(true)
                .default_value("0.0.0.0:20013"),
        )
        .arg(
            Arg::with_name("external_address")
                .long("external-address")
                .takes_value(true)
                .required(true),
        )
        .get_matches();

    let config_file_path = matches.value_of("CONFIG_FILE").unwrap();

    let mut key = [0; SessionKey::SIZE];
    crypto::random_bytes(&mut key[..]);

    let config = ServiceConfig {
        listen_address: matches.value_of("listen_address").unwrap().to_string(),
        session_key: SessionKey::new(key),
        account_type: "smart".to_string(),
        account_registration_enable: true,
        allow_empty_digest: false,
        game_update_hertz: 50,
        external_channel_encryption_enable: true,
        external_address: matches.value_of("external_address").unwrap().to_string(),
        http_cb_port: 8080,
        start_group_order: 1,
        entry_script_file: String::new(),
        account_name_max_len: flux::contract::ACCOUNT_NAME_MAX_LENGTH,
        account_passwd_max_len: flux::contract::ACCOUNT_PASSWD_MAX_LENGTH,
        account_data_max_len: flux::contract::ACCOUNT_DATA_MAX_LENGTH,
    };

    let config_file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(config_file_path)
        .unwrap();

    serde_json::to_writer_pretty(config_file, &config).expect("Config serialization failed")
}
