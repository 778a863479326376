pub mod net;

pub use net::channel::{Channel, ChannelId, ChannelState, ConnectionToken};
pub use net::endpoint::{ConnectionChange, Endpoint};
pub use net::frame::{Category, ControlFrame, Frame};
