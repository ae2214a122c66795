//! Trusted relayer as an alternate live source.
//!
//! A relayer that already indexes the protocol can serve a stream's records directly. The
//! pipeline uses it in place of its own log fetch, then merges and validates the result exactly
//! as it would chain-fetched records.

pub mod client;
pub mod types;

pub use client::{HttpRelayerApi, RelayerApi, RelayerEventClient, events_request};
pub use types::{EventsPage, EventsRequest, RelayerError, RelayerEvents, relayer_event_type};
