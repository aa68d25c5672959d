//! Prometheus metrics export

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

pub fn init_metrics(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    register_metrics();
    info!("Prometheus metrics server started on {}", addr);
    Ok(())
}

fn register_metrics() {
    // Outbound
    describe_counter!("playerlink_messages_sent_total", "Messages handed to the transport successfully");
    describe_counter!("playerlink_send_failures_total", "Sends rejected by the transport");
    describe_counter!("playerlink_messages_coalesced_total", "Queued messages superseded before a tick");

    // Inbound
    describe_counter!("playerlink_messages_received_total", "Inbound position messages dispatched");
    describe_counter!("playerlink_messages_filtered_total", "Inbound messages dropped by the router");

    // Connection
    describe_gauge!("playerlink_connected", "Broker connection status");
}

pub fn record_message_sent() {
    counter!("playerlink_messages_sent_total").increment(1);
}

pub fn record_send_failure() {
    counter!("playerlink_send_failures_total").increment(1);
}

pub fn record_coalesced(count: usize) {
    if count > 0 {
        counter!("playerlink_messages_coalesced_total").increment(count as u64);
    }
}

pub fn record_message_received() {
    counter!("playerlink_messages_received_total").increment(1);
}

pub fn record_message_filtered() {
    counter!("playerlink_messages_filtered_total").increment(1);
}

pub fn record_connection_status(connected: bool) {
    gauge!("playerlink_connected").set(if connected { 1.0 } else { 0.0 });
}
