//! Name resolution for client-side load balancing
//!
//! A [`Resolver`] binds a target string to a [`Watcher`], and the watcher yields
//! ordered batches of [`Update`]s describing how the resolved address set changed.
//!
//! Provided resolvers:
//! - [`DnsResolver`] - periodic SRV lookups, diffed against the previous snapshot
//! - [`StaticResolver`] - a fixed comma-separated address list, delivered once
//! - [`ManualResolver`] - updates pushed by the caller

pub mod address;
pub mod dns;
pub mod error;
pub mod manual;
pub mod static_list;
pub mod watcher;

mod queue;

pub use address::{Address, Update, UpdateOp};
pub use dns::{DnsResolver, DnsWatcher, HickorySrvLookup, SrvLookup, DEFAULT_DNS_POLL_INTERVAL};
pub use error::{NamingError, Result};
pub use manual::{ManualResolver, ManualWatcher};
pub use static_list::{StaticResolver, StaticWatcher};
pub use watcher::{Resolver, Watcher};
