//! Contact establishment between identities

pub mod handshake;

pub use handshake::{ContactView, HandshakeCoordinator, HandshakeOutcome, RequestFeed};
