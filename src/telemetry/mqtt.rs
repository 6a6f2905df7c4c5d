//! MQTT-backed telemetry table.
//!
//! Each key is a retained message on `<prefix>/<key>`. A background thread
//! subscribes to `<prefix>/#` and mirrors the values it sees into a local
//! cache, so writes from the control system (and the pipeline's own writes)
//! are visible to `get`.
//!
//! Retained messages replayed on subscribe may predate this process. Until
//! the broker echoes a key this process wrote, replayed values for that key
//! are dropped so a stale `Shutdown=true` cannot undo the startup write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, Event, Incoming, MqttOptions};
use rumqttc::Transport;

use super::{TelemetryTable, TelemetryValue};
use crate::config::TelemetrySettings;

type ValueCache = Arc<Mutex<MirrorCache>>;

/// Local view of the table plus the local writes not yet seen on the broker.
#[derive(Debug, Default)]
struct MirrorCache {
    values: HashMap<String, TelemetryValue>,
    unconfirmed: HashMap<String, String>,
}

impl MirrorCache {
    fn get(&self, key: &str) -> Option<TelemetryValue> {
        self.values.get(key).cloned()
    }

    fn local_write(&mut self, key: &str, value: TelemetryValue, payload: &str) {
        self.unconfirmed.insert(key.to_string(), payload.to_string());
        self.values.insert(key.to_string(), value);
    }

    /// Apply a value received from the broker. Returns false when dropped.
    fn remote_write(&mut self, key: &str, payload: &str, retained: bool) -> bool {
        match self.unconfirmed.get(key) {
            Some(pending) if retained && pending != payload => return false,
            Some(_) => {
                self.unconfirmed.remove(key);
            }
            None => {}
        }
        self.values
            .insert(key.to_string(), TelemetryValue::from_payload(payload));
        true
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// Parse `host:port`, `[v6]:port`, or either with an `mqtt://`/`mqtts://` scheme.
pub fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
    let mut use_tls = false;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let (host, port) = split_host_port(remainder)?;
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port.parse().context("invalid MQTT port")?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    let port: u16 = port.parse().context("invalid MQTT port")?;
    Ok((host.to_string(), port))
}

fn key_from_topic<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    topic
        .strip_prefix(prefix)?
        .strip_prefix('/')
        .filter(|key| !key.is_empty())
}

pub struct MqttTable {
    client: Client,
    prefix: String,
    cache: ValueCache,
    closing: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttTable {
    pub fn connect(settings: &TelemetrySettings) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&settings.broker_addr)?;
        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(5));
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.as_deref().unwrap_or_default());
        }
        options.set_transport(if endpoint.use_tls {
            Transport::tls_with_default_config()
        } else {
            Transport::tcp()
        });

        let (client, connection) = Client::new(options, 64);
        let prefix = settings.topic_prefix.trim_end_matches('/').to_string();
        let cache: ValueCache = Arc::new(Mutex::new(MirrorCache::default()));
        let closing = Arc::new(AtomicBool::new(false));
        let handle = spawn_event_loop(
            client.clone(),
            connection,
            prefix.clone(),
            cache.clone(),
            closing.clone(),
        );

        log::info!(
            "telemetry table on MQTT {}:{} (TLS: {}, prefix: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            prefix
        );
        Ok(Self {
            client,
            prefix,
            cache,
            closing,
            connection_handle: Some(handle),
        })
    }

    fn topic(&self, key: &str) -> String {
        format!("{}/{}", self.prefix, key)
    }

    pub fn disconnect(mut self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        self.client.disconnect()?;
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        Ok(())
    }
}

impl TelemetryTable for MqttTable {
    fn get(&self, key: &str) -> Option<TelemetryValue> {
        self.cache.lock().ok()?.get(key)
    }

    fn put(&self, key: &str, value: TelemetryValue) -> Result<()> {
        let payload = value.to_payload();
        self.cache
            .lock()
            .map_err(|_| anyhow!("telemetry cache lock poisoned"))?
            .local_write(key, value, &payload);
        self.client
            .publish(self.topic(key), QoS::AtMostOnce, true, payload.into_bytes())
            .with_context(|| format!("failed to publish telemetry key '{}'", key))?;
        Ok(())
    }
}

fn spawn_event_loop(
    client: Client,
    mut connection: Connection,
    prefix: String,
    cache: ValueCache,
    closing: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let filter = format!("{}/#", prefix);
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    // Clean sessions drop subscriptions, so subscribe on every connect.
                    if let Err(e) = client.try_subscribe(filter.clone(), QoS::AtLeastOnce) {
                        log::warn!("MQTT subscribe to {} failed: {}", filter, e);
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    let topic = match std::str::from_utf8(&publish.topic) {
                        Ok(topic) => topic,
                        Err(e) => {
                            log::warn!("skipping publish with invalid topic: {}", e);
                            continue;
                        }
                    };
                    let Some(key) = key_from_topic(&prefix, topic) else {
                        continue;
                    };
                    let payload = String::from_utf8_lossy(&publish.payload);
                    if let Ok(mut values) = cache.lock() {
                        if !values.remote_write(key, &payload, publish.retain) {
                            log::debug!("ignoring stale retained value for '{}'", key);
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    if closing.load(Ordering::SeqCst) {
                        break;
                    }
                    log::warn!("MQTT connection error: {}. Reconnecting...", e);
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
        }
    })
}
