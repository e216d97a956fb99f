//! `permessage-deflate` support: restartable flate codec wrappers and
//! handshake negotiation.

mod codec;
mod negotiate;

pub use codec::{FlateDecoder, FlateEncoder};
pub use negotiate::{DeflateParams, EXTENSION_NAME};
