//! Where absorbed faults go.
//!
//! The engine favors an uninterrupted audio path over surfacing transient failures: a
//! node that fails a tick is retried next tick, a failed analysis pass is followed by the
//! next one. Nothing is silently swallowed though. Every absorbed fault passes through
//! [`absorb`], which logs it with its site.

use core::fmt;
use std::any::Any;

use crate::node::NodeId;

/// The place a fault was absorbed.
#[derive(Clone, Copy, Debug)]
pub enum FaultSite<'a> {
    /// A node's `process` during a scheduler tick
    Node { id: NodeId, name: &'a str },
    /// One pass of an analyzer worker
    AnalysisPass { series: &'a str },
    /// Device teardown running from `Drop`, where nobody can receive the error
    Teardown { name: &'a str },
}

impl fmt::Display for FaultSite<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultSite::Node { id, name } => write!(f, "node {id} ({name})"),
            FaultSite::AnalysisPass { series } => write!(f, "analysis of `{series}`"),
            FaultSite::Teardown { name } => write!(f, "teardown of {name}"),
        }
    }
}

/// Record a fault that will not interrupt processing.
pub fn absorb(site: FaultSite<'_>, error: &dyn fmt::Display) {
    tracing::warn!(site = %site, error = %error, "fault absorbed");
}

/// Best-effort text for a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
