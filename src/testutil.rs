//! In-process relay and event builders shared by unit tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_tungstenite::{accept_async, tungstenite::Message as TMsg};

use crate::{
    event::{Event, Tag},
    filter::Filter,
};

/// Serializes tests that mutate process environment variables.
pub static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Nothing listens on the discard port, so dials fail immediately.
pub const DEAD_RELAY: &str = "ws://127.0.0.1:9";

pub fn event(id: &str, pubkey: &str, kind: u32, created_at: u64, tags: &[&[&str]]) -> Event {
    Event {
        id: id.into(),
        pubkey: pubkey.into(),
        kind,
        created_at,
        tags: tags.iter().map(|t| Tag::new(t.iter().copied())).collect(),
        content: String::new(),
        sig: String::new(),
    }
}

/// 64-hex pubkey made of one repeated byte.
pub fn pubkey(byte: u8) -> String {
    hex::encode([byte; 32])
}

/// 64-hex event id derived from `n`.
pub fn hex_id(n: u64) -> String {
    format!("{n:064x}")
}

#[derive(Default, Clone)]
pub struct MockOptions {
    /// Sent after EOSE when they match the subscription filter.
    pub live: Vec<Event>,
    /// Sent on every REQ before anything else, ignoring the filter.
    pub unfiltered: Vec<Event>,
    /// Accept subscriptions but never answer them.
    pub silent: bool,
}

#[derive(Default)]
struct MockState {
    events: Vec<Event>,
    options: MockOptions,
    connections: AtomicUsize,
    closes: AtomicUsize,
    requests: Mutex<Vec<Filter>>,
}

/// Minimal NIP-01 relay serving a fixed event set.
pub struct MockRelay {
    pub url: String,
    state: Arc<MockState>,
    task: JoinHandle<()>,
}

impl MockRelay {
    pub async fn start(events: Vec<Event>) -> Self {
        Self::start_with(events, MockOptions::default()).await
    }

    pub async fn start_with(events: Vec<Event>, options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::launch(listener, events, options)
    }

    /// Serve on a fixed local port, e.g. one a client already failed to reach.
    pub async fn start_on(port: u16, events: Vec<Event>) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        Self::launch(listener, events, MockOptions::default())
    }

    fn launch(listener: TcpListener, events: Vec<Event>, options: MockOptions) -> Self {
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState {
            events,
            options,
            ..Default::default()
        });
        let accept_state = state.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    if let Ok(ws) = accept_async(stream).await {
                        state.connections.fetch_add(1, Ordering::SeqCst);
                        serve(ws, state).await;
                    }
                });
            }
        });
        Self {
            url: format!("ws://{addr}"),
            state,
            task,
        }
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Filter> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    state: Arc<MockState>,
) {
    while let Some(Ok(msg)) = ws.next().await {
        let TMsg::Text(txt) = msg else { continue };
        let Ok(val) = serde_json::from_str::<Value>(&txt) else {
            continue;
        };
        match val.get(0).and_then(|v| v.as_str()) {
            Some("REQ") => {
                let sub = val[1].as_str().unwrap_or_default().to_string();
                let filter: Filter = serde_json::from_value(val[2].clone()).unwrap_or_default();
                state.requests.lock().unwrap().push(filter.clone());
                if state.options.silent {
                    continue;
                }
                let mut out: Vec<&Event> = state.options.unfiltered.iter().collect();
                let mut stored: Vec<&Event> =
                    state.events.iter().filter(|e| filter.matches(e)).collect();
                stored.sort_by_key(|e| std::cmp::Reverse(e.created_at));
                if let Some(limit) = filter.limit {
                    stored.truncate(limit);
                }
                out.extend(stored);
                for ev in out {
                    let msg = json!(["EVENT", sub, ev]).to_string();
                    if ws.send(TMsg::Text(msg)).await.is_err() {
                        return;
                    }
                }
                let eose = json!(["EOSE", sub]).to_string();
                if ws.send(TMsg::Text(eose)).await.is_err() {
                    return;
                }
                for ev in state.options.live.iter().filter(|e| filter.matches(e)) {
                    let msg = json!(["EVENT", sub, ev]).to_string();
                    if ws.send(TMsg::Text(msg)).await.is_err() {
                        return;
                    }
                }
            }
            Some("CLOSE") => {
                state.closes.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}
