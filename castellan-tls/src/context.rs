//! `Context` / `ContextSet`: one TLS server identity per configured
//! server name, plus the default (§3 Data Model).
//!
//! Unlike `castellan-tls`'s earlier shape, each `Context` here owns its
//! own `rustls::ServerConfig` rather than sharing one across the whole
//! listening port. rustls centralizes cipher-suite/ECDH-curve selection
//! at the `ServerConfig`/`CryptoProvider` level (see `builder.rs`), and
//! §4.D steps 4-5 require a per-context override to actually change the
//! live handshake parameters for that one identity — the only way to
//! honor that with rustls is to give each identity its own provider and
//! therefore its own config, mirroring the C original's `SSL_set_SSL_CTX`
//! whole-context switch more closely than a single shared resolver could.
//! A data-plane collaborator picks which `Context` (and therefore which
//! `ServerConfig`) to hand to a connection by peeking the `ClientHello`
//! before the handshake proper begins (e.g. via `rustls::server::Acceptor`)
//! and calling [`CastellanResolver::select`](crate::sni::CastellanResolver::select).

use std::sync::{Arc, Weak};

use castellan_common::error::{CastellanError, Result};
use castellan_ocsp::Stapling;
use rustls::server::{ClientHello, NoServerSessionStorage, ResolvesServerCert};
use rustls::sign::{CertifiedKey, SigningKey};
use rustls::{ServerConfig, SupportedProtocolVersion};
use rustls_pki_types::CertificateDer;

/// A fully configured TLS server identity: leaf + chain, signing key,
/// advertised NPN/ALPN names, OCSP stapling derivations (when an issuer
/// was found), and its own `ServerConfig`. `server_name` is `None` for
/// the default context.
pub struct Context {
  pub server_name: Option<String>,
  pub cert_chain: Vec<CertificateDer<'static>>,
  pub signing_key: Arc<dyn SigningKey>,
  pub npn_wire: Option<Vec<u8>>,
  pub stapling: Option<Arc<Stapling>>,
  pub server_config: Arc<ServerConfig>,
}

impl Context {
  pub fn leaf_der(&self) -> &CertificateDer<'static> {
    &self.cert_chain[0]
  }

  /// Mints a `CertifiedKey` for this identity, stapling whatever OCSP
  /// response is currently `Valid` for it. Called on every resolve rather
  /// than cached, since the staple can change underneath a long-lived
  /// `Context` (§4.F state machine) while the chain and key never do.
  pub fn certified_key(&self) -> CertifiedKey {
    let mut certified_key = CertifiedKey::new(self.cert_chain.clone(), self.signing_key.clone());
    if let Some(stapling) = &self.stapling {
      if let Some(response) = stapling.entry.current_response() {
        certified_key.ocsp = Some(response);
      }
    }
    certified_key
  }

  /// Builds a `Context` together with its own `ServerConfig`, whose
  /// `CryptoProvider` the caller has already resolved against this
  /// identity's own cipher/ECDH override (§4.D steps 4-5, see
  /// `builder::crypto_provider_for`). Session resumption is disabled
  /// (§3 Invariant — "no on-disk session cache... resumption is
  /// explicitly not supported").
  ///
  /// The `ServerConfig`'s own cert resolver needs to read this same
  /// `Context`'s live OCSP staple on every handshake, which is the
  /// circular part: the config is built through `Arc::new_cyclic` so the
  /// resolver can hold a `Weak<Context>` back to the value it is itself
  /// embedded in, rather than duplicating cert/key/staple state.
  #[allow(clippy::too_many_arguments)]
  pub fn build(
    server_name: Option<String>,
    cert_chain: Vec<CertificateDer<'static>>,
    signing_key: Arc<dyn SigningKey>,
    npn_wire: Option<Vec<u8>>,
    stapling: Option<Arc<Stapling>>,
    crypto_provider: rustls::crypto::CryptoProvider,
    protocol_versions: &'static [&'static SupportedProtocolVersion],
    locus: &str,
  ) -> Result<Arc<Context>> {
    let alpn_protocols = npn_wire.as_deref().map(split_npn_wire).unwrap_or_default();

    let builder = ServerConfig::builder_with_provider(Arc::new(crypto_provider))
      .with_protocol_versions(protocol_versions)
      .map_err(|source| CastellanError::UnsupportedProtocolVersion {
        locus: locus.to_string(),
        version: source.to_string(),
      })?;

    Ok(Arc::new_cyclic(move |weak: &Weak<Context>| {
      let resolver: Arc<dyn ResolvesServerCert> = Arc::new(SelfResolver(weak.clone()));
      let mut server_config = builder.with_no_client_auth().with_cert_resolver(resolver);
      server_config.session_storage = Arc::new(NoServerSessionStorage {});
      server_config.alpn_protocols = alpn_protocols;

      Context {
        server_name,
        cert_chain,
        signing_key,
        npn_wire,
        stapling,
        server_config: Arc::new(server_config),
      }
    }))
  }
}

/// Resolves every handshake on a `Context`'s own `ServerConfig` back to
/// that same `Context`, ignoring the `ClientHello`'s own server name —
/// selection between contexts already happened upstream of which
/// `ServerConfig` got handed to this connection (see module docs).
struct SelfResolver(Weak<Context>);

impl ResolvesServerCert for SelfResolver {
  fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
    let context = self.0.upgrade()?;
    Some(Arc::new(context.certified_key()))
  }
}

/// Unpacks a length-prefixed NPN wire buffer into the list of byte
/// strings `ServerConfig::alpn_protocols` expects, so an ALPN-only
/// client still negotiates a protocol using this context's own
/// configured names (rustls has no NPN support of its own).
fn split_npn_wire(wire: &[u8]) -> Vec<Vec<u8>> {
  let mut names = Vec::new();
  let mut i = 0;
  while i < wire.len() {
    let len = wire[i] as usize;
    names.push(wire[i + 1..i + 1 + len].to_vec());
    i += 1 + len;
  }
  names
}

/// The default context at index 0 followed by configured contexts,
/// matching Invariant 1 in SPEC_FULL.md §3: exactly one default exists.
pub struct ContextSet {
  pub contexts: Vec<Arc<Context>>,
}

impl ContextSet {
  pub fn new(default: Arc<Context>, configured: Vec<Arc<Context>>) -> Self {
    let mut contexts = Vec::with_capacity(1 + configured.len());
    contexts.push(default);
    contexts.extend(configured);
    Self { contexts }
  }

  pub fn default_context(&self) -> &Arc<Context> {
    &self.contexts[0]
  }

  /// Local SNI selection (§4.E): scans `contexts[1..]` for the first
  /// case-insensitive, length-matched `server_name`. Returns `0` (the
  /// default) when nothing matches.
  pub fn resolve_local(&self, name: &str) -> usize {
    for (index, context) in self.contexts.iter().enumerate().skip(1) {
      let Some(configured_name) = &context.server_name else {
        continue;
      };
      if configured_name.len() == name.len() && configured_name.eq_ignore_ascii_case(name) {
        return index;
      }
    }
    0
  }
}

#[cfg(test)]
pub(crate) mod test_support {
  use super::*;
  use rcgen::{CertificateParams, KeyPair};
  use rustls::crypto::aws_lc_rs::sign::any_supported_type;

  pub(crate) fn test_protocol_versions() -> &'static [&'static SupportedProtocolVersion] {
    &[&rustls::version::TLS12, &rustls::version::TLS13]
  }

  /// A minimal, self-signed `Context` for tests that only care about SNI
  /// selection or OCSP-staple plumbing, not real chain validation.
  pub(crate) fn fake_context(server_name: Option<&str>, name_for_cert: &str) -> Arc<Context> {
    let key_pair = KeyPair::generate().unwrap();
    let params = CertificateParams::new(vec![name_for_cert.to_string()]).unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = rustls_pki_types::PrivateKeyDer::try_from(key_pair.serialize_der()).unwrap();
    let signing_key = any_supported_type(&key_der).unwrap();
    let crypto_provider = rustls::crypto::aws_lc_rs::default_provider();

    Context::build(
      server_name.map(|s| s.to_string()),
      vec![cert_der],
      signing_key,
      None,
      None,
      crypto_provider,
      test_protocol_versions(),
      "test",
    )
    .unwrap()
  }
}
