//! Framed, encrypted messaging between a client and any server-side component: the `Buffer`
//! ring queue, the `Frame`/`Category` wire layout, the `Channel` that ties them together with an
//! optional symmetric cipher, and the `Endpoint` event loop that drives many channels at once.

pub mod buffer;
pub mod channel;
pub mod endpoint;
pub mod frame;
pub mod support;
