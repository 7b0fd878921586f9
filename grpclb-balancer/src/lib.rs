//! Client-side load balancing over a resolved address set
//!
//! [`Balancer`] drives a [`grpclb_naming::Watcher`], keeps one [`Client`] per
//! resolved address and hands them out round robin. The [`grpc`] module holds
//! the `tonic` based [`ClientFactory`].

pub mod balancer;
pub mod client;
pub mod error;
pub mod grpc;

mod registry;

pub use balancer::{Balancer, BalancerState, ConstructionFailure, RegistryChanged};
pub use client::{Client, ClientFactory, Transport};
pub use error::{BalancerError, CallError, ClientError, Result};
pub use grpc::GrpcClientFactory;
