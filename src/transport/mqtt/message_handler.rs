//! Pure routing of rumqttc events
//!
//! The event loop task hands every polled event or error to this module and
//! acts on the returned route. No I/O happens here.

use super::connection::return_code_value;
use rumqttc::{ConnectionError, Event, Outgoing, Packet, SubscribeReasonCode};

/// Pure routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    code: return_code_value(connack.code),
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                },
                Packet::Disconnect => EventRoute::BrokerDisconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    failures: suback
                        .return_codes
                        .iter()
                        .filter(|code| matches!(code, SubscribeReasonCode::Failure))
                        .count(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Route an event loop error. `connected` tells whether CONNACK was seen.
    pub fn route_error(error: &ConnectionError, connected: bool) -> ErrorRoute {
        match error {
            ConnectionError::ConnectionRefused(code) => ErrorRoute::Refused {
                code: return_code_value(*code),
            },
            other if !connected => ErrorRoute::ConnectFailed(other.to_string()),
            other => ErrorRoute::ConnectionLost(other.to_string()),
        }
    }

    /// Decode a payload as UTF-8 text
    pub fn decode_payload(payload: &[u8]) -> Result<&str, String> {
        std::str::from_utf8(payload).map_err(|e| format!("payload is not valid UTF-8: {e}"))
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// CONNACK received with the given return code
    ConnectionAcknowledged { code: u8 },
    /// Message received on subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Broker sent DISCONNECT
    BrokerDisconnected,
    /// Our DISCONNECT went out
    DisconnectSent,
    /// SUBACK with the number of refused filters
    SubscriptionConfirmed { packet_id: u16, failures: usize },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Routing decisions for event loop errors
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorRoute {
    /// Broker answered CONNACK with a refusal code
    Refused { code: u8 },
    /// Network failed before any CONNACK
    ConnectFailed(String),
    /// Established session dropped
    ConnectionLost(String),
}
