//! Request broker for LLM completions.
//!
//! Every outbound completion goes through [`RequestBroker::fetch_completion`].
//! The broker answers from its cache when it can, attaches callers to an
//! identical request that is already running, and otherwise issues a new
//! request that is retried with exponential backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::constants;
use crate::error::{AttemptError, CompletionError};
use crate::gemini::CompletionTransport;

type PendingCompletion = Shared<BoxFuture<'static, Result<String, CompletionError>>>;

/// When an in-flight entry stops absorbing duplicate callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InFlightEviction {
    /// Removed as soon as the request chain resolves.
    OnCompletion,
    /// Removed a fixed time after registration, whether or not the request
    /// has resolved. A slow request can then be duplicated.
    AfterWindow(Duration),
}

impl InFlightEviction {
    /// Fixed-window eviction with the default debounce window.
    pub fn debounce_window() -> Self {
        InFlightEviction::AfterWindow(Duration::from_millis(constants::DEBOUNCE_MS))
    }
}

/// Configuration for retry and de-duplication behavior
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Total attempts per request chain, including the first one
    pub max_attempts: u32,
    /// Wait after the first failed attempt; doubles after each further failure
    pub backoff_base: Duration,
    pub eviction: InFlightEviction,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::MAX_ATTEMPTS,
            backoff_base: Duration::from_millis(constants::BACKOFF_BASE_MS),
            eviction: InFlightEviction::OnCompletion,
        }
    }
}

impl BrokerConfig {
    /// Delay before retrying after `failed_attempt` (1-based) failed:
    /// 1s, 2s, 4s, 8s, ... with the default base.
    pub fn backoff_for(&self, failed_attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(failed_attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor)
    }
}

struct InFlight {
    id: u64,
    pending: PendingCompletion,
}

#[derive(Default)]
struct BrokerState {
    cache: HashMap<String, String>,
    in_flight: HashMap<String, InFlight>,
    next_id: u64,
}

impl BrokerState {
    // Only the registration that created the entry may remove it.
    fn evict(&mut self, prompt: &str, id: u64) -> bool {
        match self.in_flight.get(prompt) {
            Some(entry) if entry.id == id => {
                self.in_flight.remove(prompt);
                true
            }
            _ => false,
        }
    }
}

struct Inner<T> {
    transport: T,
    config: BrokerConfig,
    state: Mutex<BrokerState>,
}

/// Single entry point for completions. Cheap to clone; clones share the
/// same cache and in-flight map.
pub struct RequestBroker<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for RequestBroker<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: CompletionTransport> RequestBroker<T> {
    pub fn new(transport: T, config: BrokerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                state: Mutex::new(BrokerState::default()),
            }),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.inner.config
    }

    /// Return the completion for `prompt`.
    ///
    /// The prompt text is the cache key, byte for byte. Callers that ask for
    /// a prompt while a request for it is outstanding share that request's
    /// outcome, success or failure.
    pub async fn fetch_completion(&self, prompt: &str) -> Result<String, CompletionError> {
        let pending = {
            let mut state = self.inner.state.lock().await;

            if let Some(text) = state.cache.get(prompt) {
                debug!(prompt_len = prompt.len(), "Completion cache hit");
                return Ok(text.clone());
            }

            let joined = state.in_flight.get(prompt).map(|entry| {
                debug!(request_id = entry.id, "Joining in-flight completion request");
                entry.pending.clone()
            });

            match joined {
                Some(pending) => pending,
                None => self.register(&mut state, prompt),
            }
        };

        pending.await
    }

    /// The cached completion for `prompt`, if one exists.
    pub async fn cached(&self, prompt: &str) -> Option<String> {
        self.inner.state.lock().await.cache.get(prompt).cloned()
    }

    pub async fn is_in_flight(&self, prompt: &str) -> bool {
        self.inner.state.lock().await.in_flight.contains_key(prompt)
    }

    pub async fn cache_len(&self) -> usize {
        self.inner.state.lock().await.cache.len()
    }

    fn register(&self, state: &mut BrokerState, prompt: &str) -> PendingCompletion {
        let id = state.next_id;
        state.next_id += 1;

        info!(request_id = id, prompt_len = prompt.len(), "Starting completion request");

        let inner = Arc::clone(&self.inner);
        let key = prompt.to_string();
        let pending = async move { inner.run(key, id).await }.boxed().shared();

        state.in_flight.insert(
            prompt.to_string(),
            InFlight {
                id,
                pending: pending.clone(),
            },
        );

        if let InFlightEviction::AfterWindow(window) = self.inner.config.eviction {
            let inner = Arc::clone(&self.inner);
            let key = prompt.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                if inner.state.lock().await.evict(&key, id) {
                    debug!(request_id = id, "Debounce window elapsed, in-flight entry removed");
                }
            });
        }

        pending
    }
}

impl<T: CompletionTransport> Inner<T> {
    async fn run(self: Arc<Self>, prompt: String, id: u64) -> Result<String, CompletionError> {
        let result = self.attempt_with_backoff(&prompt, id).await;

        let mut state = self.state.lock().await;
        if let Ok(text) = &result {
            state.cache.insert(prompt.clone(), text.clone());
        }
        if self.config.eviction == InFlightEviction::OnCompletion {
            state.evict(&prompt, id);
        }

        result
    }

    async fn attempt_with_backoff(&self, prompt: &str, id: u64) -> Result<String, CompletionError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let cause: AttemptError = match self.transport.complete(prompt).await {
                Ok(text) => {
                    debug!(request_id = id, attempt, "Completion succeeded");
                    return Ok(text);
                }
                Err(cause) => cause,
            };

            if attempt >= max_attempts {
                error!(request_id = id, attempts = attempt, %cause, "Completion failed, retries exhausted");
                return Err(CompletionError {
                    attempts: attempt,
                    cause,
                });
            }

            let wait = self.config.backoff_for(attempt);
            warn!(
                request_id = id,
                "Completion attempt {}/{} failed, retrying in {}s: {}",
                attempt,
                max_attempts,
                wait.as_secs_f64(),
                cause
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}
