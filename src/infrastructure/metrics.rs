//! Traffic counters for the protocol engine

use metrics::{counter, describe_counter};

pub const DATAGRAMS_SENT: &str = "turn_datagrams_sent_total";
pub const DATAGRAMS_RECEIVED: &str = "turn_datagrams_received_total";
pub const DATAGRAMS_DISCARDED: &str = "turn_datagrams_discarded_total";
pub const REQUESTS_RETRANSMITTED: &str = "turn_requests_retransmitted_total";

/// Register metric descriptions with the installed recorder
pub fn describe_metrics() {
    describe_counter!(DATAGRAMS_SENT, "Total number of datagrams sent to the server");
    describe_counter!(
        DATAGRAMS_RECEIVED,
        "Total number of datagrams received from the server"
    );
    describe_counter!(
        DATAGRAMS_DISCARDED,
        "Inbound datagrams dropped before dispatch, by reason"
    );
    describe_counter!(
        REQUESTS_RETRANSMITTED,
        "Requests resent after their retransmission timeout expired"
    );
}

/// Record an outbound datagram
pub fn record_datagram_sent() {
    counter!(DATAGRAMS_SENT).increment(1);
}

/// Record an inbound datagram
pub fn record_datagram_received() {
    counter!(DATAGRAMS_RECEIVED).increment(1);
}

/// Record a dropped inbound datagram
pub fn record_datagram_discarded(reason: &'static str) {
    counter!(DATAGRAMS_DISCARDED, "reason" => reason).increment(1);
}

/// Record a retransmitted request
pub fn record_retransmission(request: &'static str) {
    counter!(REQUESTS_RETRANSMITTED, "request" => request).increment(1);
}
