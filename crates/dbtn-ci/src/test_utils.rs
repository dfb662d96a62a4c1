//! Scriptable CI server for tests
//!
//! [`StubCi`] is both the [`CiClientFactory`] and the shared backend every
//! client it creates talks to, so tests can script responses and count calls
//! across client swaps.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use dbtn_core::prelude::*;
use dbtn_core::CiConfig;

use crate::client::{CiApi, CiClientFactory};

#[derive(Debug, Default)]
struct StubState {
    busy: AtomicBool,
    trigger_error: Mutex<Option<String>>,
    next_build_id: AtomicU64,
    statuses: Mutex<VecDeque<Option<String>>>,
    fallback_status: Mutex<Option<String>>,
    trigger_gate: Mutex<Option<Arc<Notify>>>,
    queue_checks: AtomicUsize,
    trigger_calls: AtomicUsize,
    status_polls: Mutex<Vec<String>>,
    created: Mutex<Vec<CiConfig>>,
}

/// In-memory CI backend and client factory
#[derive(Debug, Clone, Default)]
pub struct StubCi {
    state: Arc<StubState>,
}

impl StubCi {
    /// Idle server; builds get ids from 100 upward and report `RUNNING`
    pub fn new() -> Self {
        let stub = Self::default();
        stub.state.next_build_id.store(100, Ordering::SeqCst);
        stub.set_fallback_status(Some("RUNNING"));
        stub
    }

    /// Report a build as already queued or running
    pub fn set_busy(&self, busy: bool) {
        self.state.busy.store(busy, Ordering::SeqCst);
    }

    /// Make `trigger_build` fail with a non-success status
    pub fn fail_trigger(&self, body: &str) {
        *lock(&self.state.trigger_error) = Some(body.to_string());
    }

    /// Queue a status for the next poll
    pub fn push_status(&self, status: Option<&str>) {
        lock(&self.state.statuses).push_back(status.map(str::to_string));
    }

    /// Status returned once the queued ones run out
    pub fn set_fallback_status(&self, status: Option<&str>) {
        *lock(&self.state.fallback_status) = status.map(str::to_string);
    }

    /// Block `trigger_build` until the returned `Notify` is signalled
    pub fn hold_triggers(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *lock(&self.state.trigger_gate) = Some(Arc::clone(&gate));
        gate
    }

    pub fn queue_checks(&self) -> usize {
        self.state.queue_checks.load(Ordering::SeqCst)
    }

    pub fn trigger_calls(&self) -> usize {
        self.state.trigger_calls.load(Ordering::SeqCst)
    }

    /// Base URL of the client that made each status poll, in order
    pub fn status_polls(&self) -> Vec<String> {
        lock(&self.state.status_polls).clone()
    }

    pub fn status_poll_count(&self) -> usize {
        lock(&self.state.status_polls).len()
    }

    /// Every configuration a client was created for
    pub fn created_configs(&self) -> Vec<CiConfig> {
        lock(&self.state.created).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Client bound to one configuration, backed by a [`StubCi`]
#[derive(Debug)]
pub struct StubCiClient {
    state: Arc<StubState>,
    config: CiConfig,
}

impl StubCiClient {
    pub fn config(&self) -> &CiConfig {
        &self.config
    }
}

impl CiApi for StubCiClient {
    async fn is_queued_or_running(&self) -> bool {
        self.state.queue_checks.fetch_add(1, Ordering::SeqCst);
        self.state.busy.load(Ordering::SeqCst)
    }

    async fn trigger_build(&self) -> Result<String> {
        self.state.trigger_calls.fetch_add(1, Ordering::SeqCst);

        let gate = lock(&self.state.trigger_gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(body) = lock(&self.state.trigger_error).clone() {
            return Err(Error::ci_status(500, body));
        }

        let id = self.state.next_build_id.fetch_add(1, Ordering::SeqCst);
        Ok(id.to_string())
    }

    async fn get_build_status(&self, _build_id: &str) -> Option<String> {
        lock(&self.state.status_polls).push(self.config.base_url.clone());
        let queued = lock(&self.state.statuses).pop_front();
        match queued {
            Some(status) => status,
            None => lock(&self.state.fallback_status).clone(),
        }
    }
}

impl CiClientFactory for StubCi {
    type Client = StubCiClient;

    fn create(&self, config: &CiConfig) -> Result<StubCiClient> {
        lock(&self.state.created).push(config.clone());
        Ok(StubCiClient {
            state: Arc::clone(&self.state),
            config: config.clone(),
        })
    }
}
