//! `capsule-mail` — turns a capsule into an email and puts it on the wire.
//!
//! Composition ([`compose`]) is pure. Delivery goes through the [`Transport`]
//! trait so the delivery cycle can be driven by stubs in tests; [`SmtpMailer`]
//! is the production implementation.

pub mod compose;
pub mod error;
pub mod transport;

pub use compose::{compose, compose_test_message, compose_welcome, escape_html, ComposedMessage};
pub use error::TransportError;
pub use transport::{SmtpMailer, Transport};
