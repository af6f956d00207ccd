//! Relay transport pool.
//!
//! Each relay URL gets one long-lived connection task that multiplexes `REQ`
//! subscriptions by id. The pool never surfaces errors: an unreachable or
//! failing relay simply contributes nothing, and callers read an empty result
//! as "not found".

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::mpsc::{self, error::SendError, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::{sleep, timeout, timeout_at, Instant},
};
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::{
    client_async_tls,
    tungstenite::{client::IntoClientRequest, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};
use url::Url;

use crate::{event::Event, filter::Filter};

/// Connections with no open subscription are dropped after this long.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Tunables for [`RelayPool`].
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Upper bound on establishing a websocket.
    pub connect_timeout: Duration,
    /// How long [`RelayPool::query_sync`] waits for every relay's EOSE.
    pub eose_timeout: Duration,
    /// Optional SOCKS5 proxy (`host:port`) for all relay connections.
    pub tor_socks: Option<String>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            eose_timeout: Duration::from_secs(5),
            tor_socks: None,
        }
    }
}

/// Connection history for one relay, used to rank relays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayStats {
    pub successes: u32,
    pub failures: u32,
    pub last_latency: Option<Duration>,
}

impl RelayStats {
    /// Smoothed success rate; a relay never dialled scores 0.5.
    pub fn score(&self) -> f64 {
        f64::from(self.successes + 1) / f64::from(self.successes + self.failures + 2)
    }
}

type StatsMap = Arc<Mutex<HashMap<String, RelayStats>>>;
type ConnMap = Arc<Mutex<HashMap<String, RelayHandle>>>;
type Outbox = UnboundedSender<(String, Delivery)>;

/// What a relay reported for one subscription.
#[derive(Debug)]
enum Delivery {
    Event(Event),
    Eose,
    Closed,
}

enum Command {
    Req {
        sub_id: String,
        filter: Filter,
        outbox: Outbox,
    },
    Close {
        sub_id: String,
    },
}

#[derive(Clone)]
struct RelayHandle {
    id: u64,
    commands: UnboundedSender<Command>,
}

/// Outcome of a one-shot lookup.
#[derive(Debug, PartialEq)]
pub enum Lookup {
    Found(Event),
    /// At least one relay finished its stored events without a match.
    Missing,
    /// No relay answered before the deadline.
    Unreachable,
}

impl Lookup {
    pub fn into_event(self) -> Option<Event> {
        match self {
            Self::Found(ev) => Some(ev),
            Self::Missing | Self::Unreachable => None,
        }
    }
}

/// Messages a relay can send, reduced to what the pool acts on.
#[derive(Debug, PartialEq)]
enum RelayMessage {
    Event { sub_id: String, event: Event },
    Eose { sub_id: String },
    Closed { sub_id: String, reason: String },
    Notice(String),
}

fn parse_relay_message(txt: &str) -> Option<RelayMessage> {
    let val: Value = serde_json::from_str(txt).ok()?;
    let arr = val.as_array()?;
    let sub_id = || arr.get(1).and_then(|v| v.as_str()).map(str::to_string);
    match arr.first()?.as_str()? {
        "EVENT" => Some(RelayMessage::Event {
            sub_id: sub_id()?,
            event: serde_json::from_value(arr.get(2)?.clone()).ok()?,
        }),
        "EOSE" => Some(RelayMessage::Eose { sub_id: sub_id()? }),
        "CLOSED" => Some(RelayMessage::Closed {
            sub_id: sub_id()?,
            reason: arr
                .get(2)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
        "NOTICE" => Some(RelayMessage::Notice(
            arr.get(1)?.as_str().unwrap_or_default().to_string(),
        )),
        _ => None,
    }
}

/// Trim, drop non-websocket URLs and duplicates, keeping first-seen order.
pub fn normalize_relays(relays: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    relays
        .iter()
        .map(|r| r.trim().trim_end_matches('/').to_string())
        .filter(|r| {
            Url::parse(r)
                .map(|u| matches!(u.scheme(), "ws" | "wss") && u.host_str().is_some())
                .unwrap_or(false)
        })
        .filter(|r| seen.insert(r.clone()))
        .collect()
}

/// Shared pool of relay connections.
pub struct RelayPool {
    options: PoolOptions,
    connections: ConnMap,
    stats: StatsMap,
    next_sub: AtomicU64,
    next_conn: AtomicU64,
}

impl RelayPool {
    pub fn new(options: PoolOptions) -> Self {
        Self {
            options,
            connections: Arc::new(Mutex::new(HashMap::new())),
            stats: Arc::new(Mutex::new(HashMap::new())),
            next_sub: AtomicU64::new(0),
            next_conn: AtomicU64::new(0),
        }
    }

    /// First event matching `filter` from any relay, or `None` once every
    /// relay has finished or `wait` elapses.
    pub async fn get(&self, relays: &[String], filter: &Filter, wait: Duration) -> Option<Event> {
        self.lookup(relays, filter, wait).await.into_event()
    }

    /// [`RelayPool::get`], telling an empty answer apart from no answer.
    pub async fn lookup(&self, relays: &[String], filter: &Filter, wait: Duration) -> Lookup {
        let mut req = self.open(relays, filter);
        let deadline = Instant::now() + wait;
        let mut answered = false;
        while !req.pending.is_empty() {
            let Ok(Some((relay, delivery))) = timeout_at(deadline, req.rx.recv()).await else {
                break;
            };
            match delivery {
                Delivery::Event(ev) if filter.matches(&ev) => return Lookup::Found(ev),
                Delivery::Event(_) => {}
                Delivery::Eose => {
                    answered = true;
                    req.pending.remove(&relay);
                }
                Delivery::Closed => {
                    req.pending.remove(&relay);
                }
            }
        }
        if answered {
            Lookup::Missing
        } else {
            Lookup::Unreachable
        }
    }

    /// Every stored event matching `filter` across `relays`, deduplicated by
    /// id. Returns once all relays sent EOSE (or failed) or the EOSE timeout
    /// elapses, with whatever arrived by then.
    pub async fn query_sync(&self, relays: &[String], filter: &Filter) -> Vec<Event> {
        let mut req = self.open(relays, filter);
        let deadline = Instant::now() + self.options.eose_timeout;
        let mut seen = HashSet::new();
        let mut events = vec![];
        while !req.pending.is_empty() {
            let Ok(Some((relay, delivery))) = timeout_at(deadline, req.rx.recv()).await else {
                break;
            };
            match delivery {
                Delivery::Event(ev) => {
                    if filter.matches(&ev) && seen.insert(ev.id.clone()) {
                        events.push(ev);
                    }
                }
                Delivery::Eose | Delivery::Closed => {
                    req.pending.remove(&relay);
                }
            }
        }
        events
    }

    /// Stream every matching event, stored and live, into `on_event` until the
    /// returned [`Subscription`] is closed or dropped. Events are not
    /// deduplicated across relays.
    pub fn subscribe<F>(&self, relays: &[String], filter: &Filter, mut on_event: F) -> Subscription
    where
        F: FnMut(Event) + Send + 'static,
    {
        let mut req = self.open(relays, filter);
        let id = req.sub_id.clone();
        let targets = req.targets.clone();
        let task = tokio::spawn(async move {
            while let Some((_, delivery)) = req.rx.recv().await {
                if let Delivery::Event(ev) = delivery {
                    if req.filter.matches(&ev) {
                        on_event(ev);
                    }
                }
            }
        });
        Subscription {
            id,
            targets,
            task,
            closed: AtomicBool::new(false),
        }
    }

    /// Connection history for `url`, if it was ever dialled.
    #[cfg(test)]
    pub fn stats(&self, url: &str) -> Option<RelayStats> {
        let url = url.trim().trim_end_matches('/');
        lock(&self.stats).get(url).cloned()
    }

    /// Order `relays` best-first by connection history: higher smoothed
    /// success rate, then lower last connect latency.
    pub fn rank_relays(&self, relays: &[String]) -> Vec<String> {
        let stats = lock(&self.stats);
        let mut ranked: Vec<(String, RelayStats)> = normalize_relays(relays)
            .into_iter()
            .map(|url| {
                let s = stats.get(&url).cloned().unwrap_or_default();
                (url, s)
            })
            .collect();
        ranked.sort_by(|(_, a), (_, b)| {
            b.score().total_cmp(&a.score()).then_with(|| {
                let la = a.last_latency.unwrap_or(Duration::MAX);
                let lb = b.last_latency.unwrap_or(Duration::MAX);
                la.cmp(&lb)
            })
        });
        ranked.into_iter().map(|(url, _)| url).collect()
    }

    fn open(&self, relays: &[String], filter: &Filter) -> Request {
        let sub_id = format!("curatr-{}", self.next_sub.fetch_add(1, Ordering::Relaxed));
        let (outbox, rx) = mpsc::unbounded_channel();
        let mut targets = vec![];
        let mut pending = HashSet::new();
        for url in normalize_relays(relays) {
            let cmd = Command::Req {
                sub_id: sub_id.clone(),
                filter: filter.clone(),
                outbox: outbox.clone(),
            };
            if let Some(handle) = self.dispatch(&url, cmd) {
                targets.push(handle);
                pending.insert(url);
            }
        }
        Request {
            sub_id,
            filter: filter.clone(),
            targets,
            pending,
            rx,
        }
    }

    /// Queue `cmd` on the connection for `url`, dialling one if needed.
    ///
    /// Sends happen under the connection-map lock, which is also held by an
    /// idle connection while it retires, so a queued command is never
    /// stranded on a connection that is shutting down.
    fn dispatch(&self, url: &str, cmd: Command) -> Option<RelayHandle> {
        let mut conns = lock(&self.connections);
        let cmd = match conns.get(url) {
            Some(handle) => match handle.commands.send(cmd) {
                Ok(()) => return Some(handle.clone()),
                // The connection task exited after a failure.
                Err(SendError(cmd)) => cmd,
            },
            None => cmd,
        };
        let (commands, rx) = mpsc::unbounded_channel();
        let handle = RelayHandle {
            id: self.next_conn.fetch_add(1, Ordering::Relaxed),
            commands,
        };
        tokio::spawn(run_connection(
            url.to_string(),
            handle.id,
            self.options.clone(),
            rx,
            self.stats.clone(),
            self.connections.clone(),
        ));
        handle.commands.send(cmd).ok()?;
        conns.insert(url.to_string(), handle.clone());
        Some(handle)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One in-flight `REQ` fanned out to several relays.
struct Request {
    sub_id: String,
    filter: Filter,
    targets: Vec<RelayHandle>,
    /// Relays that have not yet sent EOSE or closed.
    pending: HashSet<String>,
    rx: UnboundedReceiver<(String, Delivery)>,
}

impl Drop for Request {
    fn drop(&mut self) {
        close_on(&self.targets, &self.sub_id);
    }
}

fn close_on(targets: &[RelayHandle], sub_id: &str) {
    for t in targets {
        let _ = t.commands.send(Command::Close {
            sub_id: sub_id.to_string(),
        });
    }
}

/// Handle to a streaming subscription opened with [`RelayPool::subscribe`].
pub struct Subscription {
    id: String,
    targets: Vec<RelayHandle>,
    task: JoinHandle<()>,
    closed: AtomicBool,
}

impl Subscription {
    /// Stop delivery and send `CLOSE` to every relay. Safe to call repeatedly.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        close_on(&self.targets, &self.id);
        self.task.abort();
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

fn record(stats: &StatsMap, url: &str, outcome: Option<Duration>) {
    let mut stats = lock(stats);
    let entry = stats.entry(url.to_string()).or_default();
    match outcome {
        Some(latency) => {
            entry.successes += 1;
            entry.last_latency = Some(latency);
        }
        None => entry.failures += 1,
    }
}

/// Stop accepting commands and tell every queued request this relay is done.
fn reject_pending(url: &str, commands: &mut UnboundedReceiver<Command>) {
    commands.close();
    while let Ok(cmd) = commands.try_recv() {
        if let Command::Req { outbox, .. } = cmd {
            let _ = outbox.send((url.to_string(), Delivery::Closed));
        }
    }
}

/// Take an idle connection out of the pool. Fails when a command was queued
/// since the connection went idle; the caller must serve it first.
fn retire(
    conns: &ConnMap,
    url: &str,
    id: u64,
    commands: &mut UnboundedReceiver<Command>,
) -> bool {
    let mut conns = lock(conns);
    if !commands.is_empty() {
        return false;
    }
    if conns.get(url).is_some_and(|h| h.id == id) {
        conns.remove(url);
    }
    commands.close();
    true
}

async fn run_connection(
    url: String,
    id: u64,
    options: PoolOptions,
    mut commands: UnboundedReceiver<Command>,
    stats: StatsMap,
    conns: ConnMap,
) {
    let started = Instant::now();
    let ws = match timeout(
        options.connect_timeout,
        connect_ws(&url, options.tor_socks.as_deref()),
    )
    .await
    {
        Ok(Ok(ws)) => {
            record(&stats, &url, Some(started.elapsed()));
            ws
        }
        Ok(Err(e)) => {
            debug!(relay = %url, error = %e, "relay connect failed");
            record(&stats, &url, None);
            reject_pending(&url, &mut commands);
            return;
        }
        Err(_) => {
            debug!(relay = %url, "relay connect timed out");
            record(&stats, &url, None);
            reject_pending(&url, &mut commands);
            return;
        }
    };
    debug!(relay = %url, "relay connected");
    let (mut sink, mut stream) = ws.split();
    let mut subs: HashMap<String, Outbox> = HashMap::new();

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    Command::Req { sub_id, filter, outbox } => {
                        let msg = json!(["REQ", sub_id, filter]);
                        if let Err(e) = sink.send(Message::Text(msg.to_string())).await {
                            debug!(relay = %url, error = %e, "relay write failed");
                            let _ = outbox.send((url.clone(), Delivery::Closed));
                            break;
                        }
                        subs.insert(sub_id, outbox);
                    }
                    Command::Close { sub_id } => {
                        if subs.remove(&sub_id).is_some() {
                            let msg = json!(["CLOSE", sub_id]);
                            if sink.send(Message::Text(msg.to_string())).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            msg = stream.next() => {
                let txt = match msg {
                    Some(Ok(Message::Text(txt))) => txt,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(relay = %url, error = %e, "relay read failed");
                        break;
                    }
                    Some(Ok(_)) => continue,
                };
                let Some(parsed) = parse_relay_message(&txt) else { continue };
                let (sub_id, delivery) = match parsed {
                    RelayMessage::Event { sub_id, event } => (sub_id, Delivery::Event(event)),
                    RelayMessage::Eose { sub_id } => (sub_id, Delivery::Eose),
                    RelayMessage::Closed { sub_id, reason } => {
                        debug!(
                            relay = %url,
                            sub = %sub_id,
                            %reason,
                            "subscription closed by relay"
                        );
                        if let Some(outbox) = subs.remove(&sub_id) {
                            let _ = outbox.send((url.clone(), Delivery::Closed));
                        }
                        continue;
                    }
                    RelayMessage::Notice(notice) => {
                        warn!(relay = %url, %notice, "relay notice");
                        continue;
                    }
                };
                let gone = subs
                    .get(&sub_id)
                    .is_some_and(|outbox| outbox.send((url.clone(), delivery)).is_err());
                if gone {
                    subs.remove(&sub_id);
                    let msg = json!(["CLOSE", sub_id]);
                    if sink.send(Message::Text(msg.to_string())).await.is_err() {
                        break;
                    }
                }
            }
            _ = sleep(IDLE_TIMEOUT), if subs.is_empty() => {
                if retire(&conns, &url, id, &mut commands) {
                    debug!(relay = %url, "closing idle relay connection");
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
    for (_, outbox) in subs.drain() {
        let _ = outbox.send((url.clone(), Delivery::Closed));
    }
    reject_pending(&url, &mut commands);
}

/// Establish a WebSocket connection, optionally via a SOCKS5 proxy.
async fn connect_ws(
    relay: &str,
    tor_socks: Option<&str>,
) -> Result<WebSocketStream<MaybeTlsStream<Box<dyn AsyncReadWrite + Unpin + Send>>>> {
    let url = Url::parse(relay)?;
    let host = url.host_str().ok_or_else(|| anyhow!("missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| anyhow!("missing port"))?;
    let req = relay.into_client_request()?;
    let stream: Box<dyn AsyncReadWrite + Unpin + Send> = if let Some(proxy) = tor_socks {
        Box::new(Socks5Stream::connect(proxy, (host, port)).await?)
    } else {
        Box::new(TcpStream::connect((host, port)).await?)
    };
    let (ws, _) = client_async_tls(req, stream).await?;
    Ok(ws)
}

/// Blanket trait for boxed async read/write streams.
trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{event, MockOptions, MockRelay, DEAD_RELAY};
    use std::sync::atomic::AtomicUsize;

    fn pool() -> RelayPool {
        RelayPool::new(PoolOptions {
            connect_timeout: Duration::from_secs(2),
            eose_timeout: Duration::from_secs(2),
            tor_socks: None,
        })
    }

    #[test]
    fn parses_relay_messages() {
        let ev = event("aa11", "p", 1, 5, &[]);
        let txt = json!(["EVENT", "s1", ev]).to_string();
        assert_eq!(
            parse_relay_message(&txt),
            Some(RelayMessage::Event {
                sub_id: "s1".into(),
                event: ev
            })
        );
        assert_eq!(
            parse_relay_message(r#"["EOSE","s1"]"#),
            Some(RelayMessage::Eose { sub_id: "s1".into() })
        );
        assert_eq!(
            parse_relay_message(r#"["CLOSED","s1","rate-limited"]"#),
            Some(RelayMessage::Closed {
                sub_id: "s1".into(),
                reason: "rate-limited".into()
            })
        );
        assert_eq!(
            parse_relay_message(r#"["NOTICE","hi"]"#),
            Some(RelayMessage::Notice("hi".into()))
        );
        assert_eq!(parse_relay_message(r#"["EVENT","s1",{"bad":1}]"#), None);
        assert_eq!(parse_relay_message("not json"), None);
    }

    #[test]
    fn normalizes_relay_lists() {
        let relays = vec![
            " wss://relay.one/ ".to_string(),
            "wss://relay.one".to_string(),
            "https://not-a-relay".to_string(),
            "".to_string(),
            "ws://127.0.0.1:7000".to_string(),
        ];
        assert_eq!(
            normalize_relays(&relays),
            vec!["wss://relay.one", "ws://127.0.0.1:7000"]
        );
    }

    #[tokio::test]
    async fn get_returns_first_match() {
        let relay = MockRelay::start(vec![
            event("aa11", "p1", 1, 10, &[]),
            event("bb22", "p2", 1, 20, &[]),
        ])
        .await;
        let pool = pool();
        let got = pool
            .get(
                &[relay.url.clone()],
                &Filter::new().author("p2"),
                Duration::from_secs(2),
            )
            .await;
        assert_eq!(got.unwrap().id, "bb22");
    }

    #[tokio::test]
    async fn get_is_none_when_nothing_matches_or_relay_down() {
        let relay = MockRelay::start(vec![event("aa11", "p1", 1, 10, &[])]).await;
        let pool = pool();
        let started = Instant::now();
        let miss = pool
            .get(
                &[relay.url.clone(), DEAD_RELAY.to_string()],
                &Filter::new().author("nobody"),
                Duration::from_secs(2),
            )
            .await;
        assert!(miss.is_none());
        // EOSE from the live relay plus the refused dial end the wait early.
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(pool
            .get(&[], &Filter::new(), Duration::from_secs(1))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn get_times_out_on_silent_relay() {
        let relay = MockRelay::start_with(
            vec![],
            MockOptions {
                silent: true,
                ..Default::default()
            },
        )
        .await;
        let pool = pool();
        let got = pool
            .get(
                &[relay.url.clone()],
                &Filter::new(),
                Duration::from_millis(300),
            )
            .await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn query_sync_unions_relays_by_id() {
        let shared = event("aa11", "p1", 1, 10, &[]);
        let r1 = MockRelay::start(vec![shared.clone(), event("bb22", "p1", 1, 20, &[])]).await;
        let r2 = MockRelay::start(vec![shared, event("cc33", "p1", 1, 30, &[])]).await;
        let pool = pool();
        let mut ids: Vec<String> = pool
            .query_sync(
                &[r1.url.clone(), r2.url.clone(), DEAD_RELAY.to_string()],
                &Filter::new().kind(1),
            )
            .await
            .into_iter()
            .map(|e| e.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["aa11", "bb22", "cc33"]);
    }

    #[tokio::test]
    async fn connections_are_reused() {
        let relay = MockRelay::start(vec![event("aa11", "p1", 1, 10, &[])]).await;
        let pool = pool();
        for _ in 0..3 {
            pool.query_sync(&[relay.url.clone()], &Filter::new().kind(1))
                .await;
        }
        assert_eq!(relay.connections(), 1);
        assert_eq!(relay.requests().len(), 3);
    }

    #[tokio::test]
    async fn subscribe_streams_backlog_and_live_until_closed() {
        let relay = MockRelay::start_with(
            vec![event("aa11", "p1", 30311, 10, &[])],
            MockOptions {
                live: vec![event("bb22", "p1", 30311, 20, &[])],
                ..Default::default()
            },
        )
        .await;
        let pool = pool();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sub = pool.subscribe(&[relay.url.clone()], &Filter::new().kind(30311), move |ev| {
            let _ = tx.send(ev.id);
        });
        let first = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        let second = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(first.as_deref(), Some("aa11"));
        assert_eq!(second.as_deref(), Some("bb22"));

        sub.close();
        sub.close();
        assert!(sub.is_closed());
        // The forwarding task is gone, so the channel drains and closes.
        assert!(timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .is_none());
        sleep(Duration::from_millis(100)).await;
        assert_eq!(relay.closes(), 1);
    }

    #[tokio::test]
    async fn subscribe_filters_non_matching_events() {
        let relay = MockRelay::start_with(
            vec![],
            MockOptions {
                unfiltered: vec![event("zz99", "p9", 1, 1, &[])],
                ..Default::default()
            },
        )
        .await;
        let pool = pool();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let sub = pool.subscribe(&[relay.url.clone()], &Filter::new().kind(30311), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sleep(Duration::from_millis(300)).await;
        sub.close();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn lookup_separates_missing_from_unreachable() {
        let relay = MockRelay::start(vec![]).await;
        let pool = pool();
        let wait = Duration::from_secs(1);
        let filter = Filter::new().author("nobody");
        let live = [relay.url.clone(), DEAD_RELAY.to_string()];
        assert_eq!(pool.lookup(&live, &filter, wait).await, Lookup::Missing);
        let dead = [DEAD_RELAY.to_string()];
        assert_eq!(pool.lookup(&dead, &filter, wait).await, Lookup::Unreachable);
        assert_eq!(pool.lookup(&[], &filter, wait).await, Lookup::Unreachable);
    }

    #[test]
    fn idle_connection_serves_requests_queued_before_retiring() {
        let conns: ConnMap = Arc::default();
        let (commands, mut rx) = mpsc::unbounded_channel();
        let handle = RelayHandle { id: 7, commands };
        lock(&conns).insert("ws://r".into(), handle.clone());

        let (outbox, _deliveries) = mpsc::unbounded_channel();
        handle
            .commands
            .send(Command::Req {
                sub_id: "s".into(),
                filter: Filter::new(),
                outbox,
            })
            .unwrap();
        assert!(!retire(&conns, "ws://r", 7, &mut rx));
        assert!(lock(&conns).contains_key("ws://r"));
        assert!(!handle.commands.is_closed());

        assert!(matches!(rx.try_recv(), Ok(Command::Req { .. })));
        assert!(retire(&conns, "ws://r", 7, &mut rx));
        assert!(lock(&conns).is_empty());
        assert!(handle.commands.is_closed());
    }

    #[test]
    fn retiring_leaves_a_newer_connection_in_place() {
        let conns: ConnMap = Arc::default();
        let (newer, _newer_rx) = mpsc::unbounded_channel();
        lock(&conns).insert("ws://r".into(), RelayHandle { id: 2, commands: newer });
        let (_old, mut old_rx) = mpsc::unbounded_channel::<Command>();
        assert!(retire(&conns, "ws://r", 1, &mut old_rx));
        assert_eq!(lock(&conns).get("ws://r").map(|h| h.id), Some(2));
    }

    #[tokio::test]
    async fn ranking_prefers_reachable_relays() {
        let relay = MockRelay::start(vec![]).await;
        let pool = pool();
        let relays = vec![DEAD_RELAY.to_string(), relay.url.clone()];
        pool.query_sync(&relays, &Filter::new()).await;
        assert_eq!(pool.stats(DEAD_RELAY).unwrap().failures, 1);
        assert_eq!(pool.stats(&relay.url).unwrap().successes, 1);
        let never = "wss://never.example".to_string();
        let ranked = pool.rank_relays(&[DEAD_RELAY.to_string(), never.clone(), relay.url.clone()]);
        assert_eq!(ranked, vec![relay.url.clone(), never, DEAD_RELAY.to_string()]);
    }
}
