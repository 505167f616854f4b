//! Scripted stand-ins for the serial port and the RPC gateway

#![allow(dead_code)]

use async_trait::async_trait;
use scalebridge_core::device::{
    DeviceError, DeviceLink, DeviceSettings, PortControl, PortEvent, PortHandle, SerialTransport,
};
use scalebridge_core::gateway::{
    ClientOptions, Credentials, GatewayClient, GatewaySettings, RpcBackend, RpcClient,
    TransportError, OP_REQUEST, OP_RESPONSE,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// How the next `open` behaves
#[derive(Debug, Clone)]
pub enum OpenBehavior {
    /// Opens; lines are pushed by the test through [`ScriptedTransport::sender`]
    Silent,
    /// Opens and repeats these lines every 100ms
    Stream(Vec<String>),
    /// Fails with an open error
    Fail(String),
    /// Never completes
    Hang,
}

#[derive(Default)]
struct PortScript {
    behaviors: Mutex<VecDeque<OpenBehavior>>,
    senders: Mutex<Vec<mpsc::Sender<PortEvent>>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    fail_close: AtomicBool,
}

/// Serial transport driven by the test
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<PortScript>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(behaviors: Vec<OpenBehavior>) -> Self {
        let transport = Self::new();
        for b in behaviors {
            transport.push(b);
        }
        transport
    }

    /// Queue the behaviour of a later `open`; once the queue is empty opens are `Silent`
    pub fn push(&self, behavior: OpenBehavior) {
        self.script.behaviors.lock().unwrap().push_back(behavior);
    }

    /// Event sender of the most recently opened port
    pub fn sender(&self) -> mpsc::Sender<PortEvent> {
        self.script
            .senders
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no port opened yet")
    }

    pub fn opens(&self) -> usize {
        self.script.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.script.closes.load(Ordering::SeqCst)
    }

    pub fn fail_close(&self) {
        self.script.fail_close.store(true, Ordering::SeqCst);
    }
}

struct ScriptedControl {
    script: Arc<PortScript>,
}

#[async_trait]
impl PortControl for ScriptedControl {
    async fn close(&self) -> Result<(), DeviceError> {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_close.load(Ordering::SeqCst) {
            return Err(DeviceError::Close {
                port: "COM2".to_string(),
                message: "device busy".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SerialTransport for ScriptedTransport {
    async fn open(&self, _settings: &DeviceSettings) -> Result<PortHandle, DeviceError> {
        self.script.opens.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .script
            .behaviors
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(OpenBehavior::Silent);

        let (tx, rx) = mpsc::channel(64);
        match behavior {
            OpenBehavior::Fail(message) => return Err(DeviceError::Open(message)),
            OpenBehavior::Hang => std::future::pending::<()>().await,
            OpenBehavior::Silent => {}
            OpenBehavior::Stream(lines) => {
                let tx = tx.clone();
                tokio::spawn(async move {
                    loop {
                        for line in &lines {
                            tokio::time::sleep(Duration::from_millis(100)).await;
                            if tx.send(PortEvent::Line(line.clone())).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        }

        self.script.senders.lock().unwrap().push(tx);
        Ok(PortHandle::new(
            rx,
            Box::new(ScriptedControl {
                script: Arc::clone(&self.script),
            }),
        ))
    }
}

pub fn device_link(transport: &ScriptedTransport) -> Arc<DeviceLink> {
    Arc::new(DeviceLink::new(
        DeviceSettings::default(),
        Arc::new(transport.clone()),
    ))
}

/// A reply announcing a pending request
pub fn pending_reply(param_id: &str, datum: &str, uzeit: &str) -> Value {
    json!({
        "SUBRC": 0,
        "REQUEST": {"PARAMID": param_id, "DATUM": datum, "UZEIT": uzeit}
    })
}

#[derive(Default)]
struct GatewayScript {
    /// `create_client` failures still to produce
    connect_failures: AtomicUsize,
    reject_credentials: AtomicBool,
    poll_replies: Mutex<VecDeque<Result<Value, TransportError>>>,
    response_failures: AtomicUsize,
    connect_attempts: Mutex<Vec<Instant>>,
    calls: Mutex<Vec<(String, Value)>>,
}

/// RPC backend driven by the test
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<GatewayScript>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connects(&self, n: usize) {
        self.script.connect_failures.store(n, Ordering::SeqCst);
    }

    pub fn reject_credentials(&self) {
        self.script.reject_credentials.store(true, Ordering::SeqCst);
    }

    /// Queue a poll reply; once the queue is empty polls answer SUBRC 4
    pub fn push_poll(&self, reply: Result<Value, TransportError>) {
        self.script.poll_replies.lock().unwrap().push_back(reply);
    }

    pub fn fail_responses(&self, n: usize) {
        self.script.response_failures.store(n, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.script.connect_attempts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.script.calls.lock().unwrap().clone()
    }

    /// Arguments of every response call, in order
    pub fn responses(&self) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(op, _)| op == OP_RESPONSE)
            .map(|(_, args)| args)
            .collect()
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl RpcBackend for ScriptedBackend {
    async fn create_client(
        &self,
        _descriptor: &str,
        _options: &ClientOptions,
    ) -> Result<Box<dyn RpcClient>, TransportError> {
        self.script
            .connect_attempts
            .lock()
            .unwrap()
            .push(Instant::now());
        if take_one(&self.script.connect_failures) {
            return Err(TransportError::Http("connection refused".to_string()));
        }
        Ok(Box::new(ScriptedClient {
            script: Arc::clone(&self.script),
        }))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedClient {
    script: Arc<GatewayScript>,
}

#[async_trait]
impl RpcClient for ScriptedClient {
    fn set_basic_auth(&mut self, credentials: &Credentials) -> Result<(), TransportError> {
        if self.script.reject_credentials.load(Ordering::SeqCst) {
            return Err(TransportError::Credentials(format!(
                "{} is locked",
                credentials.user
            )));
        }
        Ok(())
    }

    async fn invoke(&self, operation: &str, args: Value) -> Result<Value, TransportError> {
        self.script
            .calls
            .lock()
            .unwrap()
            .push((operation.to_string(), args));
        match operation {
            OP_REQUEST => self
                .script
                .poll_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(json!({"SUBRC": 4}))),
            OP_RESPONSE => {
                if take_one(&self.script.response_failures) {
                    Err(TransportError::Http("gateway timeout".to_string()))
                } else {
                    Ok(json!({}))
                }
            }
            other => Err(TransportError::UnknownOperation(other.to_string())),
        }
    }
}

pub fn gateway_settings() -> GatewaySettings {
    GatewaySettings {
        endpoint: "https://sap.example.com/sap/bc/srt/rfc".to_string(),
        credentials: Some(Credentials::new("RFC_USER", "secret")),
        ..GatewaySettings::default()
    }
}

pub fn gateway_client(backend: &ScriptedBackend) -> Arc<GatewayClient> {
    Arc::new(GatewayClient::new(
        gateway_settings(),
        Arc::new(backend.clone()),
    ))
}
