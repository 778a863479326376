use clap::{App, Arg};
use flux::logging;
use login::config::ServiceConfig;
use login::http::{self, CallbackEvent};
use login::service::{DbRequest, GatewayRequest, LoginService, Outbound, WorkerTask};
use login::wire::ClientMessage;
use netcode::{ConnectionChange, Endpoint};
use std::fs;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

pub fn main() {
    let matches = App::new("Login Service")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Runs the login server.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the config file")
                .required(true),
        )
        .get_matches();

    let config_file_path = matches.value_of("CONFIG_FILE").unwrap();

    let config: ServiceConfig =
        serde_json::from_reader(fs::File::open(config_file_path).expect("Error opening config file"))
            .expect("Error parsing config file");

    let log = logging::init();
    logging::info!(log, "starting login service"; "listen_address" => config.listen_address.as_str());

    let listen_address = config.listen_address.clone();
    let session_key = *config.session_key;
    let http_cb_port = config.http_cb_port;
    let start_group_order = config.start_group_order;

    let mut service = LoginService::new(config, &log);
    // Normally announced by the database component once it connects; this core runs without
    // one, so the operator-supplied group order from the config file is applied directly at
    // startup instead.
    service.on_dbmgr_init_completed(start_group_order, Vec::new());
    let mut endpoint = Endpoint::new(&listen_address, session_key, flux::VERSION_ID, flux::PROTOCOL_ID, &log)
        .expect("Error creating endpoint");

    let (callback_tx, callback_rx) = mpsc::channel();
    http::spawn(http_cb_port, callback_tx);

    let tick_interval = Duration::from_millis(ServiceConfig::TICK_INTERVAL_MILLIS);
    let mut last_tick = Instant::now();

    loop {
        let now = Instant::now();
        endpoint.sync(now);

        for event in callback_rx.try_iter() {
            match event {
                CallbackEvent::AccountActivated { code, success } => {
                    service.on_account_activated(&code, success)
                }
                CallbackEvent::AccountBindedEmail { code, success } => {
                    service.on_account_binded_email(&code, success)
                }
                CallbackEvent::AccountResetPassword { code, success } => {
                    service.on_account_reset_password(&code, success)
                }
            }
        }

        for change in endpoint.changes() {
            match change {
                ConnectionChange::Connected(_, channel_id) => {
                    logging::debug!(log, "client connected"; "channel_id" => channel_id);
                }
                ConnectionChange::Disconnected(channel_id) => {
                    service.on_channel_closed(channel_id);
                }
            }
        }

        pull_and_dispatch(&mut endpoint, &mut service, &log);
        drain_outbound(&mut endpoint, &mut service, &log);

        if now.duration_since(last_tick) >= tick_interval {
            service.on_main_thread_tick();
            last_tick = now;
        }

        thread::sleep(Duration::from_millis(1));
    }
}

fn pull_and_dispatch(endpoint: &mut Endpoint, service: &mut LoginService, log: &logging::Logger) {
    // `Endpoint` doesn't expose the set of currently-live channel ids directly; a production
    // event loop would track it off `ConnectionChange` notifications. Channel ids are dense and
    // reused, so sweeping the addressable range is cheap and correct.
    for channel_id in 0..4096usize {
        let remote_addr = match endpoint.peer_addr(channel_id) {
            Some(addr) => addr,
            None => continue,
        };

        let mut batch = flux::error::PayloadBatch::<ClientMessage>::new();
        endpoint.pull(channel_id, &mut batch);

        for message in batch.drain() {
            dispatch(service, channel_id, message, remote_addr, log);
        }
    }
}

fn dispatch(
    service: &mut LoginService,
    channel_id: usize,
    message: ClientMessage,
    remote_addr: std::net::SocketAddr,
    log: &logging::Logger,
) {
    match message {
        ClientMessage::Hello {
            client_version,
            script_version,
            key_blob,
        } => service.on_hello(channel_id, &client_version, &script_version, &key_blob),
        ClientMessage::Login {
            client_kind,
            attached_data,
            login_name,
            password,
            client_digest,
        } => service.login(channel_id, client_kind, attached_data, &login_name, &password, &client_digest, remote_addr),
        ClientMessage::ReqCreateAccount {
            kind,
            account_name,
            password,
            attached_data,
        } => service.req_create_account(channel_id, kind, &account_name, &password, attached_data, remote_addr),
        ClientMessage::ReqCreateMailAccount {
            account_name,
            password,
            attached_data,
        } => service.req_create_mail_account(channel_id, &account_name, &password, attached_data, remote_addr),
        ClientMessage::ReqAccountResetPassword { account_name } => {
            service.req_account_reset_password(channel_id, &account_name)
        }
        ClientMessage::ImportClientMessages => service.import_client_messages(channel_id),
        ClientMessage::ImportServerErrorsDescr => service.import_server_errors_descr(channel_id),
        ClientMessage::OnClientActiveTick => service.on_client_active_tick(channel_id),
    };

    logging::trace!(log, "dispatched client message"; "channel_id" => channel_id);
}

/// Drains the effects `service` accumulated and performs them. `ToDatabase`/`ToGatewayManager`
/// requests and worker tasks are logged rather than sent anywhere further: this core doesn't
/// implement those peer components or a worker pool.
fn drain_outbound(endpoint: &mut Endpoint, service: &mut LoginService, log: &logging::Logger) {
    let effects: Vec<Outbound> = service.drain_outbound().collect();

    for effect in effects {
        match effect {
            Outbound::ToClient(channel_id, message) => {
                let mut batch = flux::error::PayloadBatch::new();
                batch.push(message);
                endpoint.push(channel_id, &mut batch);
            }
            Outbound::ToDatabase(request) => log_unrouted_db_request(log, &request),
            Outbound::ToGatewayManager(request) => log_unrouted_gateway_request(log, &request),
            Outbound::EnqueueWorkerTask(task) => log_worker_task(log, &task),
            Outbound::CloseClient(channel_id) => {
                logging::debug!(log, "closing client channel"; "channel_id" => channel_id);
            }
            Outbound::InstallExtraCipher(channel_id, key) => {
                endpoint.install_extra_cipher(channel_id, key);
            }
        }
    }
}

fn log_unrouted_db_request(log: &logging::Logger, request: &DbRequest) {
    logging::debug!(log, "database request"; "request" => ?request);
}

fn log_unrouted_gateway_request(log: &logging::Logger, request: &GatewayRequest) {
    logging::debug!(log, "gateway-manager request"; "request" => ?request);
}

fn log_worker_task(log: &logging::Logger, task: &WorkerTask) {
    logging::debug!(log, "worker task enqueued"; "task" => ?task);
}
