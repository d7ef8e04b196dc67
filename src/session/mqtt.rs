//! MQTT session provider backed by rumqttc (MQTT v5)
//!
//! Option building and event routing are pure functions; the provider and
//! handle do the I/O. Each handle owns one event loop task that translates
//! broker events into [`SessionSignal`]s tagged with the handle's generation
//! and stops polling after the first disconnect or error, leaving reconnect
//! decisions to the session machine.

use super::error::SessionError;
use super::machine::SessionSignal;
use super::message::{Delivery, MessageId, OutboundMessage};
use super::transport::{SessionHandle, SessionProvider};
use crate::config::SessionSection;
use crate::supervisor::SignalSender;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use rumqttc::Outgoing;
use rumqttc::Transport as RumqttcTransport;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, Instrument};
use url::Url;

/// Grace period for a closed handle to flush its DISCONNECT
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Capacity of the rumqttc request channel
const REQUEST_CAPACITY: usize = 10;

/// Publishes handed to rumqttc, in submission order, awaiting a packet id
type Inflight = Arc<Mutex<VecDeque<(MessageId, Delivery)>>>;

/// Broker host and port from a `mqtt://` or `mqtts://` URL
pub fn broker_address(broker_url: &str) -> Result<(String, u16), SessionError> {
    let url =
        Url::parse(broker_url).map_err(|_| SessionError::InvalidBrokerUrl(broker_url.to_string()))?;

    let default_port = match url.scheme() {
        "mqtt" => 1883,
        "mqtts" => 8883,
        _ => return Err(SessionError::InvalidBrokerUrl(broker_url.to_string())),
    };

    let host = url
        .host_str()
        .ok_or_else(|| SessionError::InvalidBrokerUrl(broker_url.to_string()))?;

    Ok((host.to_string(), url.port().unwrap_or(default_port)))
}

/// Build MQTT options from the session configuration
pub fn configure_mqtt_options(
    device_id: &str,
    config: &SessionSection,
) -> Result<MqttOptions, SessionError> {
    let (host, port) = broker_address(&config.broker_url)?;

    let client_id = format!("{device_id}-{}", chrono::Utc::now().timestamp_millis());
    let mut options = MqttOptions::new(client_id, host, port);

    if config.broker_url.starts_with("mqtts://") {
        options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username_env) = &config.username_env {
        if let Ok(username) = std::env::var(username_env) {
            let password = config
                .password_env
                .as_ref()
                .and_then(|env_name| std::env::var(env_name).ok())
                .unwrap_or_default();
            options.set_credentials(username, password);
        }
    }

    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_start(true);

    Ok(options)
}

/// Routing decision for a broker event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRoute {
    ConnectionAcknowledged,
    MessageReceived { topic: String, payload: Vec<u8> },
    /// A publish left the client with this packet id (0 for QoS 0)
    PublishSent(u16),
    PublishAcknowledged(u16),
    Disconnected,
    Other(String),
}

/// Route a broker event (pure function)
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => EventRoute::ConnectionAcknowledged,
        Event::Incoming(Packet::Publish(publish)) => EventRoute::MessageReceived {
            topic: String::from_utf8_lossy(&publish.topic).to_string(),
            payload: publish.payload.to_vec(),
        },
        Event::Incoming(Packet::PubAck(ack)) => EventRoute::PublishAcknowledged(ack.pkid),
        Event::Incoming(Packet::Disconnect(_)) => EventRoute::Disconnected,
        Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishSent(*pkid),
        other => EventRoute::Other(format!("{other:?}")),
    }
}

/// Provider creating one rumqttc client and event loop per session attempt
pub struct MqttSessionProvider {
    options: MqttOptions,
    signals: SignalSender,
}

impl MqttSessionProvider {
    pub fn new(
        device_id: &str,
        config: &SessionSection,
        signals: SignalSender,
    ) -> Result<Self, SessionError> {
        Ok(Self {
            options: configure_mqtt_options(device_id, config)?,
            signals,
        })
    }
}

impl SessionProvider for MqttSessionProvider {
    type Handle = MqttSessionHandle;

    fn open(&mut self, generation: u64, delay: Duration) -> MqttSessionHandle {
        let (client, event_loop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        let inflight: Inflight = Arc::new(Mutex::new(VecDeque::new()));

        let task = tokio::spawn(
            drive_event_loop(
                event_loop,
                generation,
                delay,
                self.signals.clone(),
                inflight.clone(),
            )
            .instrument(crate::session_span!(generation)),
        );

        MqttSessionHandle {
            client,
            inflight,
            task: Some(task),
            generation,
        }
    }
}

async fn drive_event_loop(
    mut event_loop: EventLoop,
    generation: u64,
    delay: Duration,
    signals: SignalSender,
    inflight: Inflight,
) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    info!(generation, "Starting MQTT event loop");

    let mut awaiting_ack: HashMap<u16, MessageId> = HashMap::new();

    loop {
        let event = match event_loop.poll().await {
            Ok(event) => event,
            Err(e) => {
                signals.session(generation, SessionSignal::TransportError(e.to_string()));
                break;
            }
        };

        match route_event(&event) {
            EventRoute::ConnectionAcknowledged => {
                signals.session(generation, SessionSignal::Connected);
            }
            EventRoute::MessageReceived { topic, payload } => {
                signals.session(
                    generation,
                    SessionSignal::MessageReceived { topic, payload },
                );
            }
            EventRoute::PublishSent(pkid) => {
                let submitted = lock_inflight(&inflight).pop_front();
                if let Some((id, delivery)) = submitted {
                    if delivery.expects_ack() && pkid != 0 {
                        awaiting_ack.insert(pkid, id);
                    }
                }
            }
            EventRoute::PublishAcknowledged(pkid) => {
                if let Some(id) = awaiting_ack.remove(&pkid) {
                    signals.session(generation, SessionSignal::Acknowledged(id));
                } else {
                    debug!(generation, pkid, "PubAck for untracked packet id");
                }
            }
            EventRoute::Disconnected => {
                signals.session(generation, SessionSignal::Disconnected);
                break;
            }
            EventRoute::Other(description) => {
                trace!(target: "mqtt_transport", generation, "MQTT event: {}", description);
            }
        }
    }

    info!(generation, "MQTT event loop stopped");
}

fn lock_inflight(
    inflight: &Inflight,
) -> std::sync::MutexGuard<'_, VecDeque<(MessageId, Delivery)>> {
    inflight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to one rumqttc session attempt
pub struct MqttSessionHandle {
    client: AsyncClient,
    inflight: Inflight,
    task: Option<JoinHandle<()>>,
    generation: u64,
}

impl MqttSessionHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl SessionHandle for MqttSessionHandle {
    fn publish(&mut self, id: MessageId, message: OutboundMessage) -> Result<(), SessionError> {
        let delivery = message.delivery();
        lock_inflight(&self.inflight).push_back((id, delivery));

        let result = self.client.try_publish(
            message.topic().to_string(),
            delivery.qos(),
            message.retain(),
            message.payload().clone(),
        );

        if let Err(e) = result {
            lock_inflight(&self.inflight).pop_back();
            return Err(SessionError::PublishFailed(Box::new(e)));
        }
        Ok(())
    }

    fn subscribe(&mut self, filter: &str) -> Result<(), SessionError> {
        self.client
            .try_subscribe(filter.to_string(), QoS::AtLeastOnce)
            .map_err(|e| SessionError::SubscriptionFailed(Box::new(e)))
    }

    fn close(&mut self) {
        let _ = self.client.try_disconnect();

        if let Some(task) = self.task.take() {
            let generation = self.generation;
            tokio::spawn(async move {
                tokio::time::sleep(CLOSE_GRACE).await;
                task.abort();
                debug!(generation, "Closed MQTT session handle");
            });
        }
    }
}

impl Drop for MqttSessionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
