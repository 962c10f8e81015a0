//! SNI resolver (component E, §4.E).
//!
//! Grounded directly in `ferron/src/tls_util.rs::CustomSniResolver` and
//! `project-karpacz/src/util/sni.rs::CustomSniResolver` — both map onto
//! rustls' `ResolvesServerCert::resolve()` hook. That mapping works when
//! every identity shares one `ServerConfig`; here each `Context` owns its
//! own (see `context.rs`), so `CastellanResolver` no longer implements
//! `ResolvesServerCert` itself. Instead it exposes [`CastellanResolver::select`],
//! which a data-plane collaborator calls after peeking the `ClientHello`'s
//! server name (e.g. via `rustls::server::Acceptor`) to decide which
//! `Context` — and therefore which `ServerConfig` — to hand the
//! connection to.
//!
//! Because that selection happens before the handshake proper, the
//! asynchronous SNI flow (§4.E, §5, §9 redesign flag) is realized as a
//! two-phase callback: a miss against an unknown name spawns a detached
//! lookup and returns `Selection::Pending` for *this* attempt; the
//! collaborator is expected to retry the accept once the transient
//! context has been published. This boundary is recorded in DESIGN.md.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use castellan_common::config::FrontendConfig;
use castellan_common::logging::Logger;
use rustls::SupportedProtocolVersion;
use serde::Deserialize;

use tokio::sync::RwLock;

use crate::builder::build_context_from_pem;
use crate::context::{Context, ContextSet};
use crate::helper::HelperPool;
use crate::ocsp_refresh::{self, OcspRefreshConfig};
use crate::trust_store::TrustStore;

/// The JSON shape an SNI helper response body is expected to decode as:
/// PEM certificate chain, PEM private key, and the optional per-name NPN
/// override the distilled spec's §4.E mentions ("optional per-name
/// parameters"). The decoder is this crate's concern per §6 — the HTTP
/// transport itself is not.
#[derive(Debug, Deserialize)]
struct SniHelperResponse {
  cert: String,
  key: String,
  #[serde(default)]
  npn: Vec<String>,
  #[serde(default)]
  ciphers: Option<String>,
  #[serde(default)]
  ecdh: Option<String>,
}

/// Configuration the resolver needs to perform the asynchronous SNI
/// lookup (§4.E "when `sni.enabled`"): the helper's address, the query
/// template, and a fetch timeout, plus what a transient `Context` needs
/// to build its own `ServerConfig` (§4.D steps 4-5 apply to a
/// helper-resolved identity exactly as they do to an on-disk one).
pub struct AsyncSniConfig {
  pub host: String,
  pub port: u16,
  pub query: String,
  pub timeout: Duration,
  pub helper: Arc<dyn HelperPool>,
  pub frontend: FrontendConfig,
  pub protocol_versions: &'static [&'static SupportedProtocolVersion],
  pub trust_store: Arc<dyn TrustStore>,
}

/// One entry in the transient-context map: either a lookup already in
/// flight, or its resolved result. Keyed by lowercased server name —
/// rustls' `ClientHello` carries no connection identifier a resolver can
/// thread through, so this crate keys on hostname instead of the
/// per-connection id SPEC_FULL.md's design notes describe, sharing one
/// resolved context across concurrent handshakes for the same unknown
/// name. See DESIGN.md for this simplification.
enum Pending {
  Fetching,
  Resolved(Arc<Context>),
}

/// What [`CastellanResolver::select`] hands back to its caller: the
/// `Context` to use for this connection, or `Pending` when the name is
/// unknown and an asynchronous lookup was just triggered (or was already
/// in flight).
pub enum Selection {
  Context(Arc<Context>),
  Pending,
}

/// Local SNI selection (§4.E), asynchronous SNI (when configured), and
/// OCSP staple refresh triggering (§4.F, via `Context::certified_key` at
/// handshake time and `ocsp_refresh::spawn_refresh` here).
pub struct CastellanResolver {
  contexts: Arc<ContextSet>,
  async_sni: Option<AsyncSniConfig>,
  ocsp_refresh: Option<Arc<OcspRefreshConfig>>,
  // `tokio::sync::RwLock`: the asynchronous publish path (`attach_resolved`,
  // the spawned lookup in `spawn_async_lookup`) needs to `.await` a write
  // lock, while the synchronous `select()` call path only ever uses the
  // non-blocking `try_read`/`try_write` this type also provides.
  pending: Arc<RwLock<HashMap<String, Pending>>>,
  logger: Arc<Logger>,
}

impl std::fmt::Debug for CastellanResolver {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CastellanResolver").finish_non_exhaustive()
  }
}

impl CastellanResolver {
  pub fn new(contexts: Arc<ContextSet>, async_sni: Option<AsyncSniConfig>, ocsp_refresh: Option<Arc<OcspRefreshConfig>>, logger: Arc<Logger>) -> Self {
    Self {
      contexts,
      async_sni,
      ocsp_refresh,
      pending: Arc::new(RwLock::new(HashMap::new())),
      logger,
    }
  }

  /// Selects the `Context` a connection for `server_name` should be
  /// handed (§4.E "Handshake-time callback"), triggering an OCSP staple
  /// refresh for it if one is due (§4.F) and, on a local/async miss, the
  /// asynchronous SNI lookup (§4.E).
  pub fn select(&self, server_name: Option<&str>) -> Selection {
    let Some(name) = server_name else {
      // §4.E: no SNI sent, succeed without changing context.
      let context = self.contexts.default_context().clone();
      self.maybe_refresh_stapling(&context);
      return Selection::Context(context);
    };

    match self.resolve_name(name) {
      ResolveOutcome::Found(context) => {
        self.maybe_refresh_stapling(&context);
        Selection::Context(context)
      }
      ResolveOutcome::TriggerAsync(name) => {
        self.spawn_async_lookup(name);
        Selection::Pending
      }
    }
  }

  /// Starts the OCSP refresh for `context`'s staple if the state machine
  /// says one is due (§4.F "Unknown/Failed → Fetching"). A no-op when the
  /// context carries no `Stapling` or no `ocsp_refresh` config was
  /// supplied — the caller still gets whatever staple is already cached.
  fn maybe_refresh_stapling(&self, context: &Arc<Context>) {
    let Some(stapling) = &context.stapling else { return };
    if !stapling.entry.begin_fetch_if_needed() {
      return;
    }
    let Some(ocsp_refresh) = &self.ocsp_refresh else { return };
    ocsp_refresh::spawn_refresh(stapling.clone(), ocsp_refresh.clone(), self.logger.clone());
  }

  /// Performs local selection, consulting any already-resolved transient
  /// context first (§4.E "Handshake-time callback").
  fn resolve_name(&self, name: &str) -> ResolveOutcome {
    let lowered = name.to_ascii_lowercase();
    if let Ok(pending) = self.pending.try_read() {
      if let Some(Pending::Resolved(context)) = pending.get(&lowered) {
        return ResolveOutcome::Found(context.clone());
      }
    }

    let index = self.contexts.resolve_local(name);
    if index != 0 {
      return ResolveOutcome::Found(self.contexts.contexts[index].clone());
    }

    match &self.async_sni {
      Some(_) => ResolveOutcome::TriggerAsync(lowered),
      None => ResolveOutcome::Found(self.contexts.default_context().clone()),
    }
  }

  /// Spawns the asynchronous SNI lookup (§4.E): fetches PEM material
  /// from the SNI helper, builds a transient `Context`, and publishes it
  /// so a retried handshake for the same name picks it up. Any failure
  /// — timeout, malformed response — clears the pending marker so the
  /// next handshake attempt retries rather than wedging forever.
  ///
  /// Gated on the pending map's own `Fetching` marker: a miss against a
  /// name whose lookup is already in flight does not spawn a second one,
  /// since `resolve_name`'s `TriggerAsync` branch re-triggers on every
  /// single miss with no other gate of its own.
  fn spawn_async_lookup(&self, name: String) {
    let Some(async_sni) = &self.async_sni else { return };

    {
      let mut pending = match self.pending.try_write() {
        Ok(pending) => pending,
        Err(_) => return,
      };
      if matches!(pending.get(&name), Some(Pending::Fetching)) {
        return;
      }
      pending.insert(name.clone(), Pending::Fetching);
    }

    let helper = async_sni.helper.clone();
    let host = async_sni.host.clone();
    let port = async_sni.port;
    let query = async_sni.query.clone();
    let timeout = async_sni.timeout;
    let frontend = async_sni.frontend.clone();
    let protocol_versions = async_sni.protocol_versions;
    let trust_store = async_sni.trust_store.clone();
    let pending = self.pending.clone();
    let logger = self.logger.clone();

    tokio::spawn(async move {
      let result = helper.get(&host, port, &query, &name, timeout).await;
      match result {
        Ok(bytes) => match build_transient_context(&name, &bytes, &frontend, protocol_versions, trust_store.as_ref()) {
          Ok(context) => {
            pending.write().await.insert(name.clone(), Pending::Resolved(context));
          }
          Err(err) => {
            logger.warn(format!("SNI helper response for {name:?} could not be decoded: {err}"));
            pending.write().await.remove(&name);
          }
        },
        Err(err) => {
          logger.warn(format!("SNI helper lookup for {name:?} failed: {err}"));
          pending.write().await.remove(&name);
        }
      }
    });
  }

  /// Publishes a transient `Context` resolved out-of-band (e.g. by the
  /// data-plane collaborator once it has built one from the helper's
  /// response), so the next `select()` call for this name picks it up.
  pub async fn attach_resolved(&self, name: &str, context: Arc<Context>) {
    self.pending.write().await.insert(name.to_ascii_lowercase(), Pending::Resolved(context));
  }

  pub async fn mark_fetching(&self, name: &str) {
    self.pending.write().await.insert(name.to_ascii_lowercase(), Pending::Fetching);
  }

  pub async fn is_fetching(&self, name: &str) -> bool {
    matches!(self.pending.read().await.get(&name.to_ascii_lowercase()), Some(Pending::Fetching))
  }
}

/// Decodes the helper's JSON response body and builds a transient
/// `Context` from the PEM material it carries (§4.E "materialized into a
/// transient Context (built by §4.D)").
fn build_transient_context(
  name: &str,
  body: &bytes::Bytes,
  frontend: &FrontendConfig,
  protocol_versions: &'static [&'static SupportedProtocolVersion],
  trust_store: &dyn TrustStore,
) -> anyhow::Result<Arc<Context>> {
  let response: SniHelperResponse = serde_json::from_slice(body)?;
  let context = build_context_from_pem(
    name,
    response.cert.as_bytes(),
    response.key.as_bytes(),
    &response.npn,
    response.ciphers.as_deref(),
    response.ecdh.as_deref(),
    frontend,
    protocol_versions,
    trust_store,
  )?;
  Ok(context)
}

enum ResolveOutcome {
  Found(Arc<Context>),
  TriggerAsync(String),
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::test_support::{fake_context, test_protocol_versions};
  use crate::helper::StaticHelperPool;
  use castellan_common::logging::Level;
  use rcgen::{CertificateParams, KeyPair};

  fn test_logger() -> Arc<Logger> {
    Arc::new(Logger::new(Level::Error, false))
  }

  fn test_async_sni(helper: Arc<dyn HelperPool>) -> AsyncSniConfig {
    AsyncSniConfig {
      host: "127.0.0.1".to_string(),
      port: 9000,
      query: "/bud/sni/%s".to_string(),
      timeout: Duration::from_secs(1),
      helper,
      frontend: FrontendConfig::default(),
      protocol_versions: test_protocol_versions(),
      trust_store: Arc::new(crate::trust_store::EmptyTrustStore),
    }
  }

  #[tokio::test]
  async fn async_disabled_miss_resolves_to_default() {
    let contexts = Arc::new(ContextSet::new(fake_context(None, "default.test"), Vec::new()));
    let resolver = CastellanResolver::new(contexts.clone(), None, None, test_logger());
    match resolver.resolve_name("unknown.test") {
      ResolveOutcome::Found(ctx) => assert!(ctx.server_name.is_none()),
      ResolveOutcome::TriggerAsync(_) => panic!("expected immediate default fallback"),
    }
  }

  #[tokio::test]
  async fn async_enabled_miss_triggers_lookup() {
    let contexts = Arc::new(ContextSet::new(fake_context(None, "default.test"), Vec::new()));
    let async_sni = test_async_sni(Arc::new(StaticHelperPool::new()));
    let resolver = CastellanResolver::new(contexts, Some(async_sni), None, test_logger());
    match resolver.resolve_name("unknown.test") {
      ResolveOutcome::TriggerAsync(name) => assert_eq!(name, "unknown.test"),
      ResolveOutcome::Found(_) => panic!("expected an async trigger"),
    }
  }

  #[tokio::test]
  async fn attached_transient_context_is_observed_on_next_resolve() {
    let contexts = Arc::new(ContextSet::new(fake_context(None, "default.test"), Vec::new()));
    let async_sni = test_async_sni(Arc::new(StaticHelperPool::new()));
    let resolver = CastellanResolver::new(contexts, Some(async_sni), None, test_logger());
    let transient = fake_context(Some("unknown.test"), "unknown.test");
    resolver.attach_resolved("unknown.test", transient.clone()).await;

    match resolver.resolve_name("unknown.test") {
      ResolveOutcome::Found(ctx) => assert_eq!(ctx.server_name.as_deref(), Some("unknown.test")),
      ResolveOutcome::TriggerAsync(_) => panic!("expected the attached transient context"),
    }
  }

  #[tokio::test]
  async fn local_hit_is_case_insensitive() {
    let configured = fake_context(Some("Example.COM"), "Example.COM");
    let contexts = Arc::new(ContextSet::new(fake_context(None, "default.test"), vec![configured]));
    let resolver = CastellanResolver::new(contexts, None, None, test_logger());
    match resolver.resolve_name("example.com") {
      ResolveOutcome::Found(ctx) => assert_eq!(ctx.server_name.as_deref(), Some("Example.COM")),
      ResolveOutcome::TriggerAsync(_) => panic!("expected a local hit"),
    }
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn async_lookup_materializes_and_publishes_a_transient_context() {
    let key_pair = KeyPair::generate().unwrap();
    let params = CertificateParams::new(vec!["unknown.test".to_string()]).unwrap();
    let cert = params.self_signed(&key_pair).unwrap();

    let response = serde_json::json!({
      "cert": cert.pem(),
      "key": key_pair.serialize_pem(),
    })
    .to_string();

    let contexts = Arc::new(ContextSet::new(fake_context(None, "default.test"), Vec::new()));
    let helper = Arc::new(StaticHelperPool::new().with_response("/bud/sni/unknown.test", response));
    let async_sni = test_async_sni(helper);
    let resolver = Arc::new(CastellanResolver::new(contexts, Some(async_sni), None, test_logger()));

    resolver.spawn_async_lookup("unknown.test".to_string());

    for _ in 0..50 {
      if !matches!(resolver.resolve_name("unknown.test"), ResolveOutcome::TriggerAsync(_)) {
        break;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }

    match resolver.resolve_name("unknown.test") {
      ResolveOutcome::Found(ctx) => assert_eq!(ctx.server_name.as_deref(), Some("unknown.test")),
      ResolveOutcome::TriggerAsync(_) => panic!("transient context was never published"),
    }
  }

  /// §4.E "no SNI sent" plus §4.F: selecting the default context with no
  /// server name still drives the OCSP refresh trigger the same way a
  /// name hit would.
  #[tokio::test]
  async fn select_with_no_server_name_returns_default_context() {
    let contexts = Arc::new(ContextSet::new(fake_context(None, "default.test"), Vec::new()));
    let resolver = CastellanResolver::new(contexts.clone(), None, None, test_logger());
    match resolver.select(None) {
      Selection::Context(ctx) => assert!(Arc::ptr_eq(&ctx, contexts.default_context())),
      Selection::Pending => panic!("expected the default context"),
    }
  }

  #[tokio::test]
  async fn select_on_async_miss_returns_pending() {
    let contexts = Arc::new(ContextSet::new(fake_context(None, "default.test"), Vec::new()));
    let async_sni = test_async_sni(Arc::new(StaticHelperPool::new()));
    let resolver = CastellanResolver::new(contexts, Some(async_sni), None, test_logger());
    assert!(matches!(resolver.select(Some("unknown.test")), Selection::Pending));
  }
}
