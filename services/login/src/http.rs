//! The HTTP callback surface used by account-activation, bind-email, and password-reset emails.
//! Only the group leader runs this; `LoginService`'s own `on_account_*` handlers already no-op
//! with a warning if invoked on a non-leader node, so starting the listener unconditionally is
//! harmless. Each route carries the code minted into the outgoing email/link by `LoginService`
//! and the outcome the mail provider (or a confirmation page) observed; `LoginService` validates
//! the code against its pending-callback table before acting on it.

use rocket::config::{Config as RocketConfig, Environment};
use rocket::{get, routes, State};
use std::sync::mpsc::Sender;
use std::thread;

#[derive(Debug, Clone)]
pub enum CallbackEvent {
    AccountActivated { code: String, success: bool },
    AccountBindedEmail { code: String, success: bool },
    AccountResetPassword { code: String, success: bool },
}

struct CallbackChannel(Sender<CallbackEvent>);

#[get("/activate/<code>/<success>")]
fn activate(code: String, success: bool, channel: State<CallbackChannel>) -> &'static str {
    let _ = channel.0.send(CallbackEvent::AccountActivated { code, success });
    "ok"
}

#[get("/bind_email/<code>/<success>")]
fn bind_email(code: String, success: bool, channel: State<CallbackChannel>) -> &'static str {
    let _ = channel.0.send(CallbackEvent::AccountBindedEmail { code, success });
    "ok"
}

#[get("/reset/<code>/<success>")]
fn reset_password(code: String, success: bool, channel: State<CallbackChannel>) -> &'static str {
    let _ = channel.0.send(CallbackEvent::AccountResetPassword { code, success });
    "ok"
}

/// Spawns the callback listener on its own thread, forwarding activation/bind-email/reset events
/// to `sender`.
pub fn spawn(port: u16, sender: Sender<CallbackEvent>) {
    thread::spawn(move || {
        let config = RocketConfig::build(Environment::Production)
            .port(port)
            .finalize()
            .expect("invalid rocket config");

        rocket::custom(config)
            .mount("/", routes![activate, bind_email, reset_password])
            .manage(CallbackChannel(sender))
            .launch();
    });
}
