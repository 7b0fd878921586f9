//! Resolved endpoints and membership deltas

use std::fmt;

/// A resolved endpoint, identified by an opaque `host:port` string
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    pub addr: String,
}

impl Address {
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl From<&str> for Address {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr)
    }
}

/// Kind of membership change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateOp {
    Add,
    Del,
}

impl fmt::Display for UpdateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => f.write_str("ADD"),
            Self::Del => f.write_str("DEL"),
        }
    }
}

/// A single membership delta for one address
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Update {
    pub op: UpdateOp,
    pub addr: String,
}

impl Update {
    #[must_use]
    pub fn add(addr: impl Into<String>) -> Self {
        Self {
            op: UpdateOp::Add,
            addr: addr.into(),
        }
    }

    #[must_use]
    pub fn del(addr: impl Into<String>) -> Self {
        Self {
            op: UpdateOp::Del,
            addr: addr.into(),
        }
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op, self.addr)
    }
}
