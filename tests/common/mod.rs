//! Scripted provider shared by the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use lmbridge::provider::{ChatMessage, RequestOptions, TextStream};
use lmbridge::{ChatModel, ChatProvider, ModelSelector, ProviderError, Relay, Server, bridge};

/// What the fake model does when asked.
#[derive(Clone)]
pub enum Script {
    Reply(Vec<&'static str>),
    HostError { code: &'static str, message: &'static str },
    Unavailable,
}

pub struct FakeProvider {
    script: Script,
    calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    /// Number of `select_model` calls, i.e. relay invocations.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct FakeModel {
    script: Script,
}

#[async_trait]
impl ChatModel for FakeModel {
    fn id(&self) -> &str {
        "fake-gpt-4o"
    }

    fn vendor(&self) -> &str {
        "copilot"
    }

    fn family(&self) -> &str {
        "gpt-4o"
    }

    async fn send(
        &self,
        _messages: Vec<ChatMessage>,
        _options: RequestOptions,
        _cancel: CancellationToken,
    ) -> Result<TextStream, ProviderError> {
        match &self.script {
            Script::Reply(parts) => {
                let parts: Vec<Result<String, ProviderError>> =
                    parts.iter().map(|p| Ok((*p).to_owned())).collect();
                Ok(futures_util::stream::iter(parts).boxed())
            }
            Script::HostError { code, message } => {
                Err(ProviderError::language_model(*code, *message))
            }
            Script::Unavailable => unreachable!("no model is ever selected"),
        }
    }
}

#[async_trait]
impl ChatProvider for FakeProvider {
    fn capability_name(&self) -> &str {
        "fake.lm"
    }

    async fn select_model(
        &self,
        _selector: &ModelSelector,
    ) -> Result<Option<Arc<dyn ChatModel>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(match self.script {
            Script::Unavailable => None,
            ref script => Some(Arc::new(FakeModel {
                script: script.clone(),
            }) as Arc<dyn ChatModel>),
        })
    }
}

pub fn relay(provider: Arc<FakeProvider>) -> Relay {
    Relay::new(provider, ModelSelector::new("copilot", "gpt-4o"))
}

/// Starts the bridge on an ephemeral port and returns its address.
pub async fn spawn_bridge(provider: Arc<FakeProvider>) -> SocketAddr {
    let router = Arc::new(bridge::router(Arc::new(relay(provider)), None));
    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    tokio::spawn(server.run(move |request| {
        let router = Arc::clone(&router);
        async move { router.route(request).await }
    }));
    addr
}

pub struct RawResponse {
    pub status: u16,
    pub head: String,
    pub body: String,
}

impl RawResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

/// Sends one request with `Connection: close` and reads the whole reply.
pub async fn send(addr: SocketAddr, method: &str, path: &str, body: Option<&str>) -> RawResponse {
    let mut raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
    if let Some(body) = body {
        raw.push_str(&format!(
            "Content-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        ));
    } else {
        raw.push_str("\r\n");
    }
    send_raw(addr, raw.as_bytes()).await
}

pub async fn send_raw(addr: SocketAddr, bytes: &[u8]) -> RawResponse {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(bytes).await.unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();

    let (head, body) = out.split_once("\r\n\r\n").unwrap();
    let status = head
        .split(' ')
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap();
    RawResponse {
        status,
        head: head.to_owned(),
        body: body.to_owned(),
    }
}
