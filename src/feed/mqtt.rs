// src/feed/mqtt.rs
//! MQTT transport (rumqttc). One session per `connect()`; reconnection is
//! owned by the subscriber, so a dropped session is never revived here.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, NetworkOptions, Packet, QoS,
    SubscribeReasonCode, Transport,
};

use super::{FeedEvent, FeedTransport};
use crate::config::FeedConfig;

const REQUEST_CAPACITY: usize = 16;
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Tcp,
    Tls,
    Ws,
    Wss,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BrokerAddr {
    scheme: Scheme,
    host: String,
    port: u16,
}

/// `mqtt://host[:1883]`, `mqtts://host[:8883]`, `ws://host[:80]/path`,
/// `wss://host[:443]/path` (`tcp://` and `ssl://` are accepted aliases).
fn parse_broker_url(url: &str) -> Result<BrokerAddr> {
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| anyhow!("broker URL {url:?} has no scheme"))?;
    let (scheme, default_port) = match scheme.to_ascii_lowercase().as_str() {
        "mqtt" | "tcp" => (Scheme::Tcp, 1883),
        "mqtts" | "ssl" => (Scheme::Tls, 8883),
        "ws" => (Scheme::Ws, 80),
        "wss" => (Scheme::Wss, 443),
        other => bail!("unsupported broker URL scheme {other:?}"),
    };

    let authority = rest.split(['/', '?']).next().unwrap_or_default();
    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => {
            let port = p
                .parse::<u16>()
                .with_context(|| format!("invalid port in broker URL {url:?}"))?;
            (h, port)
        }
        None => (authority, default_port),
    };
    if host.is_empty() {
        bail!("broker URL {url:?} has no host");
    }

    Ok(BrokerAddr {
        scheme,
        host: host.to_string(),
        port,
    })
}

struct Session {
    // Kept alive for the session; dropping it ends the request stream.
    _client: AsyncClient,
    eventloop: EventLoop,
}

pub struct MqttTransport {
    broker_url: String,
    addr: BrokerAddr,
    client_id: String,
    topic: String,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    connect_timeout: Duration,
    session: Option<Session>,
}

impl MqttTransport {
    pub fn from_config(cfg: &FeedConfig) -> Result<Self> {
        let addr = parse_broker_url(&cfg.broker_url)?;
        let credentials = cfg
            .username
            .as_ref()
            .filter(|u| !u.is_empty())
            .map(|u| (u.clone(), cfg.password.clone().unwrap_or_default()));

        Ok(Self {
            broker_url: cfg.broker_url.clone(),
            addr,
            client_id: cfg.client_id.clone(),
            topic: cfg.topic.clone(),
            credentials,
            keep_alive: Duration::from_secs(cfg.keep_alive_secs).max(MIN_KEEP_ALIVE),
            connect_timeout: Duration::from_millis(cfg.connect_timeout_ms),
            session: None,
        })
    }

    fn options(&self) -> MqttOptions {
        let mut opts = match self.addr.scheme {
            Scheme::Tcp | Scheme::Tls => {
                MqttOptions::new(&self.client_id, &self.addr.host, self.addr.port)
            }
            // The websocket transports take the whole URL as the address.
            Scheme::Ws | Scheme::Wss => {
                MqttOptions::new(&self.client_id, &self.broker_url, self.addr.port)
            }
        };
        match self.addr.scheme {
            Scheme::Tcp => {}
            Scheme::Tls => {
                opts.set_transport(Transport::tls_with_default_config());
            }
            Scheme::Ws => {
                opts.set_transport(Transport::Ws);
            }
            Scheme::Wss => {
                opts.set_transport(Transport::wss_with_default_config());
            }
        }
        opts.set_keep_alive(self.keep_alive).set_clean_session(true);
        if let Some((user, pass)) = &self.credentials {
            opts.set_credentials(user, pass);
        }
        opts
    }

    /// rumqttc bounds the TCP/TLS/WS handshake on its own (5 s by default);
    /// align it with our connect timeout, rounded up to whole seconds.
    fn network_options(&self) -> NetworkOptions {
        let millis = self.connect_timeout.as_millis().max(1) as u64;
        let mut net = NetworkOptions::new();
        net.set_connection_timeout(millis.div_ceil(1000));
        net
    }
}

#[async_trait::async_trait]
impl FeedTransport for MqttTransport {
    async fn connect(&mut self) -> Result<()> {
        self.session = None;
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);
        eventloop.set_network_options(self.network_options());

        loop {
            let ev = eventloop.poll().await.context("mqtt handshake")?;
            if let Event::Incoming(Packet::ConnAck(ack)) = ev {
                if ack.code != ConnectReturnCode::Success {
                    bail!("broker refused connection: {:?}", ack.code);
                }
                break;
            }
        }

        client
            .subscribe(&self.topic, QoS::AtMostOnce)
            .await
            .context("queue subscribe")?;
        loop {
            let ev = eventloop.poll().await.context("mqtt subscribe")?;
            if let Event::Incoming(Packet::SubAck(ack)) = ev {
                if ack
                    .return_codes
                    .iter()
                    .any(|c| matches!(c, SubscribeReasonCode::Failure))
                {
                    bail!("broker rejected subscription to {:?}", self.topic);
                }
                break;
            }
        }

        tracing::debug!(
            target: "feed",
            host = %self.addr.host,
            port = self.addr.port,
            topic = %self.topic,
            "mqtt session established"
        );
        self.session = Some(Session {
            _client: client,
            eventloop,
        });
        Ok(())
    }

    async fn next_event(&mut self) -> Result<FeedEvent> {
        let Some(session) = self.session.as_mut() else {
            bail!("mqtt session not established");
        };
        loop {
            match session.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    return Ok(FeedEvent::Message(p.payload.to_vec()))
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    return Ok(FeedEvent::Disconnected("broker sent DISCONNECT".into()))
                }
                Ok(_) => continue,
                Err(e) => return Ok(FeedEvent::Disconnected(e.to_string())),
            }
        }
    }

    fn close(&mut self) {
        // Dropping the event loop tears down the socket without a DISCONNECT.
        self.session = None;
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}
