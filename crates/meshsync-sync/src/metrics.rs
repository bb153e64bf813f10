//! Replication metrics, recorded through the `metrics` facade.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

use meshsync_types::ResourceType;

pub const RESOURCES_SYNC: &str = "kds_resources_sync";
pub const RESPONSES_SENT: &str = "kds_responses_sent";
pub const ACKS_RECEIVED: &str = "kds_acks_received";
pub const NACKS_RECEIVED: &str = "kds_nacks_received";

/// Register metric descriptions with the installed recorder.
pub fn describe() {
    describe_histogram!(
        RESOURCES_SYNC,
        Unit::Seconds,
        "Time to compute and apply one reconciliation batch"
    );
    describe_counter!(RESPONSES_SENT, "Discovery responses sent to peers");
    describe_counter!(ACKS_RECEIVED, "Discovery responses acknowledged by peers");
    describe_counter!(NACKS_RECEIVED, "Discovery responses rejected by peers");
}

pub fn record_sync(resource_type: &ResourceType, elapsed: Duration) {
    histogram!(RESOURCES_SYNC, "type" => resource_type.to_string()).record(elapsed.as_secs_f64());
}

pub fn record_response_sent(resource_type: &ResourceType) {
    counter!(RESPONSES_SENT, "type" => resource_type.to_string()).increment(1);
}

pub fn record_ack(resource_type: &ResourceType) {
    counter!(ACKS_RECEIVED, "type" => resource_type.to_string()).increment(1);
}

pub fn record_nack(resource_type: &ResourceType) {
    counter!(NACKS_RECEIVED, "type" => resource_type.to_string()).increment(1);
}
