//! MQTT subscription over rumqttc

use super::Subscription;
use crate::error::TransportError;
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet,
    Publish, QoS, SubscribeReasonCode,
};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info};

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Request channel capacity of the rumqttc client
    pub channel_capacity: usize,
    /// Upper bound on each of the CONNACK and SUBACK waits
    pub ack_timeout: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "mqtteclipse.xetf.my.id".to_string(),
            port: 1883,
            topic: "data/sensordata".to_string(),
            client_id: "aqi-server".to_string(),
            keep_alive: Duration::from_secs(60),
            channel_capacity: 10,
            ack_timeout: Duration::from_secs(10),
        }
    }
}

struct Session {
    client: AsyncClient,
    eventloop: EventLoop,
}

/// QoS 0 subscription to a single topic
pub struct MqttSubscription {
    config: MqttConfig,
    session: Option<Session>,
    /// Publishes that arrived while waiting for the SUBACK
    pending: VecDeque<Vec<u8>>,
}

impl MqttSubscription {
    pub fn new(config: MqttConfig) -> Self {
        Self {
            config,
            session: None,
            pending: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &MqttConfig {
        &self.config
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(true);
        options
    }
}

fn connection_error(e: ConnectionError) -> TransportError {
    match e {
        ConnectionError::ConnectionRefused(code) => TransportError::Refused(format!("{:?}", code)),
        other => TransportError::Connect(other.to_string()),
    }
}

/// Payload of a publish on the subscribed topic
fn accept_publish(topic: &str, publish: &Publish) -> Option<Vec<u8>> {
    if publish.topic == topic {
        Some(publish.payload.to_vec())
    } else {
        debug!(topic = %publish.topic, "Ignoring message on unexpected topic");
        None
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match eventloop.poll().await.map_err(connection_error)? {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code != ConnectReturnCode::Success {
                    return Err(TransportError::Refused(format!("{:?}", ack.code)));
                }
                return Ok(());
            }
            event => debug!(?event, "MQTT event before CONNACK"),
        }
    }
}

/// Publishes that arrive before the SUBACK are kept in `pending`
async fn wait_for_suback(
    eventloop: &mut EventLoop,
    topic: &str,
    pending: &mut VecDeque<Vec<u8>>,
) -> Result<(), TransportError> {
    loop {
        match eventloop
            .poll()
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?
        {
            Event::Incoming(Packet::SubAck(ack)) => {
                if ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    return Err(TransportError::Subscribe(format!(
                        "broker rejected subscription to {}",
                        topic
                    )));
                }
                return Ok(());
            }
            Event::Incoming(Packet::Publish(publish)) => {
                pending.extend(accept_publish(topic, &publish));
            }
            event => debug!(?event, "MQTT event before SUBACK"),
        }
    }
}

#[async_trait]
impl Subscription for MqttSubscription {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.session = None;
        self.pending.clear();

        info!(
            host = %self.config.host,
            port = self.config.port,
            topic = %self.config.topic,
            "Connecting to MQTT broker"
        );

        let (client, mut eventloop) = AsyncClient::new(self.options(), self.config.channel_capacity);
        let ack_timeout = self.config.ack_timeout;

        tokio::time::timeout(ack_timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| TransportError::Timeout("CONNACK"))??;

        client
            .subscribe(self.config.topic.clone(), QoS::AtMostOnce)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;

        tokio::time::timeout(
            ack_timeout,
            wait_for_suback(&mut eventloop, &self.config.topic, &mut self.pending),
        )
        .await
        .map_err(|_| TransportError::Timeout("SUBACK"))??;

        info!(topic = %self.config.topic, "Subscribed to MQTT topic");
        self.session = Some(Session { client, eventloop });
        Ok(())
    }

    async fn next_payload(&mut self) -> Result<Vec<u8>, TransportError> {
        if let Some(payload) = self.pending.pop_front() {
            return Ok(payload);
        }

        let session = self.session.as_mut().ok_or(TransportError::Closed)?;
        loop {
            match session.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if let Some(payload) = accept_publish(&self.config.topic, &publish) {
                        return Ok(payload);
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    self.session = None;
                    return Err(TransportError::Disconnected(
                        "broker sent DISCONNECT".to_string(),
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    self.session = None;
                    return Err(TransportError::Disconnected(e.to_string()));
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.client.disconnect().await {
                debug!(error = %e, "MQTT disconnect request failed");
                return;
            }
            // Drive the event loop so the DISCONNECT packet is written
            let _ = tokio::time::timeout(Duration::from_secs(1), session.eventloop.poll()).await;
        }
    }
}
