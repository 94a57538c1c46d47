//! Native host backend (crate feature `host`).
//!
//! [`RusbTransport`] drives accessory negotiation through [`rusb`]. Once the [`Accessory`]
//! session reports a connection, [`channel`] turns its bulk endpoints into an asynchronous
//! sender and receiver pair.
//!
//! Errors returned from [`channel`] and the channel halves are [`std::io::Error`]s wrapping an
//! [`Error`](crate::Error).
//!
//! [`Accessory`]: crate::Accessory

mod channel;
mod guard;
mod native;

pub use channel::{channel, AccessoryReceiver, AccessorySender, AccessorySink, AccessoryStream};
pub use native::RusbTransport;
