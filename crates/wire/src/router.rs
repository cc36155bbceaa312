// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process message router.
//!
//! Services register a name and receive every request whose topic falls
//! under it. Clients hold a [`Handle`] with a unique route id; responses
//! come back through per-matchtag channels, so a streaming RPC is just a
//! channel that keeps yielding until the service sends a terminal error
//! (`Nodata` for a natural end).

use crate::message::{Cred, Message, RpcError};
use flux_core::Errnum;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

type ResponseTx = mpsc::UnboundedSender<Result<Value, RpcError>>;

#[derive(Default)]
struct RouterInner {
    services: Vec<(String, mpsc::UnboundedSender<Message>)>,
    // route -> matchtag -> response channel
    pending: HashMap<String, HashMap<u32, ResponseTx>>,
    next_route: u64,
}

/// Shared in-process message fabric.
#[derive(Clone, Default)]
pub struct Router {
    inner: Arc<Mutex<RouterInner>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client handle with the given credentials.
    pub fn handle(&self, cred: Cred) -> Handle {
        let route = {
            let mut inner = self.inner.lock();
            inner.next_route += 1;
            format!("route-{}", inner.next_route)
        };
        Handle {
            router: self.clone(),
            route,
            cred,
            next_matchtag: Arc::new(AtomicU32::new(1)),
        }
    }

    fn route_message(&self, msg: Message) -> Result<(), RpcError> {
        let inner = self.inner.lock();
        let best = inner
            .services
            .iter()
            .filter(|(name, _)| {
                msg.topic == *name || msg.topic.strip_prefix(name).is_some_and(|r| r.starts_with('.'))
            })
            .max_by_key(|(name, _)| name.len());
        match best {
            Some((_, tx)) => tx
                .send(msg)
                .map_err(|_| RpcError::new(Errnum::Nosys, Some("service unloaded"))),
            None => Err(RpcError::new(Errnum::Nosys, Some("no service matches topic"))),
        }
    }

    fn deliver(&self, route: &str, matchtag: u32, result: Result<Value, RpcError>) {
        let terminal = result.is_err();
        let mut inner = self.inner.lock();
        let Some(tags) = inner.pending.get_mut(route) else {
            debug!(route, matchtag, "response for vanished client dropped");
            return;
        };
        if let Some(tx) = tags.get(&matchtag) {
            let _ = tx.send(result);
        }
        if terminal {
            tags.remove(&matchtag);
        }
    }
}

/// A client (or service host) bound to the router.
#[derive(Clone)]
pub struct Handle {
    router: Router,
    route: String,
    cred: Cred,
    next_matchtag: Arc<AtomicU32>,
}

/// Delivery flags for [`Handle::rpc`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcFlags {
    pub streaming: bool,
    pub noresponse: bool,
}

impl RpcFlags {
    pub const STREAMING: RpcFlags = RpcFlags { streaming: true, noresponse: false };
    pub const NORESPONSE: RpcFlags = RpcFlags { streaming: false, noresponse: true };
}

impl Handle {
    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn cred(&self) -> Cred {
        self.cred
    }

    /// Send a request. The returned [`Rpc`] yields one `Ok` per response
    /// and ends with the terminal error (`Nodata` at a stream's natural
    /// end). For `noresponse` requests the stream yields nothing.
    pub fn rpc(&self, topic: &str, payload: Value, flags: RpcFlags) -> Rpc {
        let matchtag = self.next_matchtag.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        if !flags.noresponse {
            self.router
                .inner
                .lock()
                .pending
                .entry(self.route.clone())
                .or_default()
                .insert(matchtag, tx.clone());
        }
        let msg = Message {
            topic: topic.to_string(),
            sender: self.route.clone(),
            matchtag,
            streaming: flags.streaming,
            noresponse: flags.noresponse,
            cred: self.cred,
            payload,
        };
        if let Err(e) = self.router.route_message(msg) {
            let _ = tx.send(Err(e));
        }
        Rpc { rx, matchtag, done: false }
    }

    /// Register a service. Requests with topic `<name>` or `<name>.<m>`
    /// arrive on the returned handle.
    pub fn service(&self, name: &str) -> ServiceHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.router.inner.lock().services.push((name.to_string(), tx));
        ServiceHandle { name: name.to_string(), rx }
    }

    /// Remove a service registration. In-flight requests already queued
    /// on the service channel are unaffected.
    pub fn unregister(&self, name: &str) {
        self.router.inner.lock().services.retain(|(n, _)| n != name);
    }

    pub fn respond(&self, msg: &Message, payload: Value) {
        if msg.noresponse {
            return;
        }
        self.router.deliver(&msg.sender, msg.matchtag, Ok(payload));
    }

    pub fn respond_error(&self, msg: &Message, errnum: Errnum, text: Option<&str>) {
        if msg.noresponse {
            return;
        }
        self.router
            .deliver(&msg.sender, msg.matchtag, Err(RpcError::new(errnum, text)));
    }

    /// Announce this client's departure: every service receives a
    /// `<name>.disconnect` with this handle's route, and all pending
    /// response channels are torn down.
    pub fn disconnect(&self) {
        let services: Vec<(String, mpsc::UnboundedSender<Message>)> = {
            let mut inner = self.router.inner.lock();
            inner.pending.remove(&self.route);
            inner.services.clone()
        };
        for (name, tx) in services {
            let _ = tx.send(Message {
                topic: format!("{name}.disconnect"),
                sender: self.route.clone(),
                matchtag: 0,
                streaming: false,
                noresponse: true,
                cred: self.cred,
                payload: Value::Null,
            });
        }
    }
}

/// Receiving side of a service registration.
pub struct ServiceHandle {
    name: String,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl ServiceHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

/// Response stream of one RPC.
pub struct Rpc {
    rx: mpsc::UnboundedReceiver<Result<Value, RpcError>>,
    matchtag: u32,
    done: bool,
}

impl Rpc {
    pub fn matchtag(&self) -> u32 {
        self.matchtag
    }

    /// Next response. After the terminal error has been yielded (or the
    /// client was torn down) every further call returns `Nodata`.
    pub async fn next(&mut self) -> Result<Value, RpcError> {
        if self.done {
            return Err(RpcError::nodata());
        }
        match self.rx.recv().await {
            Some(Ok(v)) => Ok(v),
            Some(Err(e)) => {
                self.done = true;
                Err(e)
            }
            None => {
                self.done = true;
                Err(RpcError::nodata())
            }
        }
    }

    /// Collect a single (non-streaming) response.
    pub async fn get(mut self) -> Result<Value, RpcError> {
        self.next().await
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
