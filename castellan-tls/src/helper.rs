//! Component G: the HTTP helper pool contract (§6 "HTTP helper protocol
//! (consumed, not defined)"). This crate owns only the trait boundary —
//! the real pool talking to the SNI/OCSP helper services over HTTP lives
//! in the data-plane crate this repository does not own. What's here is
//! the trait itself plus a deterministic in-memory test double, grounded
//! in the `futures-util` `Shared`-future dedup pattern the teacher's own
//! ACME polling (`ferron/src/acme.rs`) and HTTP proxy (`ferron-common`)
//! code already lean on for "don't do the same expensive thing twice".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use tokio::sync::Mutex as AsyncMutex;

/// Runtime failure talking to the SNI/OCSP helper service. Never a
/// startup (`CastellanError`) failure — per §7, helper failures degrade
/// the handshake gracefully instead of propagating.
#[derive(thiserror::Error, Debug, Clone)]
pub enum HelperError {
  #[error("helper request to {host}:{port} timed out after {elapsed:?}")]
  Timeout { host: String, port: u16, elapsed: Duration },

  #[error("helper request to {host}:{port} failed: {message}")]
  Upstream { host: String, port: u16, message: String },
}

/// The contract the resolver (§4.E) and the stapling collaborator (§4.F)
/// expect from the HTTP client pool: a single `GET` against
/// `query_fmt` with its one `%s` replaced by the URL-encoded `argument`,
/// with a per-request timeout and at-most-one-in-flight deduplication
/// keyed on `(host, port, query)`.
#[async_trait::async_trait]
pub trait HelperPool: Send + Sync {
  async fn get(&self, host: &str, port: u16, query_fmt: &str, argument: &str, timeout: Duration) -> Result<Bytes, HelperError>;
}

/// Substitutes the single `%s` in `query_fmt` with the URL-encoded
/// `argument`, the wire format every `HelperPool` implementation is
/// expected to honor (§6).
pub fn format_query(query_fmt: &str, argument: &str) -> String {
  query_fmt.replacen("%s", &urlencoding::encode(argument), 1)
}

type PendingFuture = Shared<BoxFuture<'static, Result<Bytes, HelperError>>>;

/// Wraps any `HelperPool` with the at-most-one-in-flight semantics §6
/// requires, keyed on `(host, port, formatted query)`. Concurrent
/// callers asking for the same key while a request is in flight all
/// observe the same eventual result instead of triggering duplicate
/// fetches.
pub struct DedupingHelperPool<P: HelperPool> {
  inner: Arc<P>,
  in_flight: AsyncMutex<HashMap<(String, u16, String), PendingFuture>>,
}

impl<P: HelperPool + 'static> DedupingHelperPool<P> {
  pub fn new(inner: P) -> Self {
    Self {
      inner: Arc::new(inner),
      in_flight: AsyncMutex::new(HashMap::new()),
    }
  }
}

#[async_trait::async_trait]
impl<P: HelperPool + 'static> HelperPool for DedupingHelperPool<P> {
  async fn get(&self, host: &str, port: u16, query_fmt: &str, argument: &str, timeout: Duration) -> Result<Bytes, HelperError> {
    let key = (host.to_string(), port, format_query(query_fmt, argument));

    let shared = {
      let mut in_flight = self.in_flight.lock().await;
      in_flight
        .entry(key.clone())
        .or_insert_with(|| {
          let inner = self.inner.clone();
          let (host, query_fmt, argument) = (host.to_string(), query_fmt.to_string(), argument.to_string());
          async move { inner.get(&host, port, &query_fmt, &argument, timeout).await }.boxed().shared()
        })
        .clone()
    };

    let result = shared.await;
    self.in_flight.lock().await.remove(&key);
    result
  }
}

/// A deterministic in-memory test double: canned responses keyed by the
/// formatted query string, with an optional artificial delay so tests
/// can exercise the timeout-then-fallback path (§5 "HTTP pool
/// collaborator provides a per-request timeout").
pub struct StaticHelperPool {
  responses: std::collections::HashMap<String, Bytes>,
  delay: Option<Duration>,
}

impl StaticHelperPool {
  pub fn new() -> Self {
    Self {
      responses: std::collections::HashMap::new(),
      delay: None,
    }
  }

  pub fn with_response(mut self, query: impl Into<String>, body: impl Into<Bytes>) -> Self {
    self.responses.insert(query.into(), body.into());
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = Some(delay);
    self
  }
}

impl Default for StaticHelperPool {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait::async_trait]
impl HelperPool for StaticHelperPool {
  async fn get(&self, host: &str, port: u16, query_fmt: &str, argument: &str, timeout: Duration) -> Result<Bytes, HelperError> {
    let query = format_query(query_fmt, argument);

    let fetch = async {
      if let Some(delay) = self.delay {
        tokio::time::sleep(delay).await;
      }
      self.responses.get(&query).cloned().ok_or_else(|| HelperError::Upstream {
        host: host.to_string(),
        port,
        message: format!("no canned response for query {query:?}"),
      })
    };

    match tokio::time::timeout(timeout, fetch).await {
      Ok(result) => result,
      Err(_) => Err(HelperError::Timeout {
        host: host.to_string(),
        port,
        elapsed: timeout,
      }),
    }
  }
}
