//! Runtime counters, exposed through the metriken registry so embedding
//! applications can scrape them alongside their own metrics.

use metriken::{Counter, metric};

#[metric(
    name = "reactline/connections/accepted",
    description = "Connections handed off to a worker loop"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "reactline/connections/closed",
    description = "Connections that completed the close sequence"
)]
pub static CONNECTIONS_CLOSED: Counter = Counter::new();

#[metric(
    name = "reactline/bytes/received",
    description = "Bytes read off connection sockets"
)]
pub static BYTES_RECEIVED: Counter = Counter::new();

#[metric(
    name = "reactline/bytes/sent",
    description = "Bytes written to connection sockets"
)]
pub static BYTES_SENT: Counter = Counter::new();
