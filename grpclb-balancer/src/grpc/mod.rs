//! tonic based client handles
//!
//! [`GrpcClientFactory`] turns a resolved address into a [`Client`](crate::Client)
//! with a lazily connecting channel, optional TLS, an optional health probe and
//! a circuit breaker. Calls go through [`RawCodec`], so any unary method can be
//! invoked by name with pre-serialized payloads.

pub mod codec;
mod factory;
mod health;
mod transport;

pub use codec::RawCodec;
pub use factory::GrpcClientFactory;
pub use transport::GrpcTransport;
