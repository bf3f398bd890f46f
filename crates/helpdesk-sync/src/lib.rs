//! Client-side realtime sync for the helpdesk: change-feed ingress, unread
//! counters, read acknowledgement, notifications and a typed signal broker,
//! tied together by [`SyncContext`].

pub mod ack;
pub mod alerts;
pub mod broker;
pub mod config;
pub mod context;
pub mod counters;
pub mod error;
pub mod feed;
pub mod http;
pub mod ingress;
pub mod memory;
pub mod notifications;
pub mod remote;
pub mod rules;

pub use broker::{Broker, ListenerId, SignalKind, SyncSignal};
pub use config::SyncConfig;
pub use context::{Session, SyncContext};
pub use error::{Result, SyncError};
pub use remote::Remote;
