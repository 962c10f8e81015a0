//! TLS context builder (component D, §4.D): crypto provider selection
//! (ciphers, ECDH curve, protocol versions) per context, `ContextSet`
//! construction with fatal-on-error rollback, and the `ServerConfig`
//! that construction yields for each identity (see `context.rs`).
//!
//! Grounded in `ferron/src/setup/tls_single.rs` (cipher suite / ECDH
//! curve filtering on a `CryptoProvider`, protocol version selection via
//! `ConfigBuilder<ServerConfig, WantsVersions>`) and `ferron/src/server.rs`
//! (`builder_with_provider` → `with_no_client_auth` → `with_cert_resolver`).

use std::sync::Arc;

use castellan_common::addr::npn_wire_encode;
use castellan_common::config::{Config, ContextConfig, FrontendConfig, SecurityMethod};
use castellan_common::error::{CastellanError, Result};
use castellan_ocsp::Stapling;
use rustls::crypto::aws_lc_rs::cipher_suite::*;
use rustls::crypto::aws_lc_rs::default_provider;
use rustls::crypto::CryptoProvider;
use rustls::version::{TLS12, TLS13};
use rustls::SupportedProtocolVersion;

use crate::chain::{load_chain, IssuerMaterial};
use crate::context::{Context, ContextSet};
use crate::ecdh;
use crate::trust_store::TrustStore;

/// OpenSSL-style cipher-suite name → `aws-lc-rs` suite, matching the
/// subset `ferron/src/setup/tls_single.rs::set_cipher_suites` filters
/// on. Unrecognized names are *dropped*, never an error, matching the
/// Open Question in SPEC_FULL.md §9 ("cipher list is not validated...
/// becomes a silent no-op").
fn cipher_suite_by_name(name: &str) -> Option<rustls::SupportedCipherSuite> {
  match name {
    "TLS_AES_128_GCM_SHA256" => Some(TLS13_AES_128_GCM_SHA256),
    "TLS_AES_256_GCM_SHA384" => Some(TLS13_AES_256_GCM_SHA384),
    "TLS_CHACHA20_POLY1305_SHA256" => Some(TLS13_CHACHA20_POLY1305_SHA256),
    "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256" => Some(TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256),
    "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384" => Some(TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384),
    "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256" => Some(TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256),
    "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256" => Some(TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256),
    "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384" => Some(TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384),
    "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256" => Some(TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256),
    _ => None,
  }
}

/// Builds a `CryptoProvider` from an explicit cipher list and ECDH curve
/// name, the shared tail of both the frontend-level provider and every
/// per-context override (§4.D steps 4-5: "per-context override wins,
/// else frontend.*"). `ciphers` is `None` when neither the context nor
/// the frontend configured one, which leaves the provider's default
/// suite list untouched.
fn crypto_provider_for(ciphers: Option<&str>, ecdh_name: &str, locus: &str) -> Result<CryptoProvider> {
  let mut provider = default_provider();

  if let Some(ciphers) = ciphers {
    let selected: Vec<_> = ciphers.split(':').filter_map(cipher_suite_by_name).collect();
    if !selected.is_empty() {
      provider.cipher_suites = selected;
    }
  }

  let curve = ecdh::lookup(ecdh_name).ok_or_else(|| CastellanError::EcdhNotFound {
    locus: locus.to_string(),
    name: ecdh_name.to_string(),
  })?;
  provider.kx_groups = vec![curve];

  Ok(provider)
}

/// Builds the `CryptoProvider` for `frontend.*` alone — the default
/// context's own provider, and the base a per-context override layers
/// over. Kept as a standalone public entry point since it is also what
/// a data-plane collaborator would use to preview the listener-wide
/// defaults before any per-context override is applied.
pub fn build_crypto_provider(config: &Config) -> Result<CryptoProvider> {
  crypto_provider_for(config.frontend.ciphers.as_deref(), &config.frontend.ecdh, "frontend.ecdh")
}

/// Resolves `frontend.security` (§4.B table) to the `rustls` protocol
/// version list to negotiate. `Tls12`/`Negotiate` both resolve to
/// TLS 1.2‑and‑1.3 negotiation; `Ssl3`/`Tls10`/`Tls11` are rejected here
/// because rustls 0.23 cannot speak them (SPEC_FULL.md §4.D, §9). There
/// is no per-context override for `security` in `ContextConfig`, so this
/// applies uniformly to every context in a `ContextSet`.
pub fn protocol_versions(method: SecurityMethod, locus: &str) -> Result<&'static [&'static SupportedProtocolVersion]> {
  match method {
    SecurityMethod::Tls12 | SecurityMethod::Negotiate => Ok(&[&TLS12, &TLS13]),
    SecurityMethod::Tls10 => Err(CastellanError::UnsupportedProtocolVersion {
      locus: locus.to_string(),
      version: "tls1.0".to_string(),
    }),
    SecurityMethod::Tls11 => Err(CastellanError::UnsupportedProtocolVersion {
      locus: locus.to_string(),
      version: "tls1.1".to_string(),
    }),
    SecurityMethod::Ssl3 => Err(CastellanError::UnsupportedProtocolVersion {
      locus: locus.to_string(),
      version: "ssl3".to_string(),
    }),
  }
}

struct ContextSpec<'a> {
  server_name: Option<&'a str>,
  cert_path: &'a str,
  key_path: &'a str,
  npn: &'a [String],
  ciphers: Option<&'a str>,
  ecdh: Option<&'a str>,
  locus: String,
}

/// Loads the chain, private key, and OCSP stapling derivations for one
/// context (§4.C, §4.D steps 4-5 and 10, §4.F), producing a fully built
/// `Context` with its own `ServerConfig`. Fatal on any I/O/parse/crypto
/// error — the caller is a `Vec::push` inside a function that returns
/// `Result`, so an error here drops whatever contexts were already
/// built (§7 rollback).
fn build_context(spec: &ContextSpec, frontend: &FrontendConfig, protocol_versions: &'static [&'static SupportedProtocolVersion], trust_store: &dyn TrustStore) -> Result<Arc<Context>> {
  let ciphers = spec.ciphers.or(frontend.ciphers.as_deref());
  let ecdh_name = spec.ecdh.unwrap_or(&frontend.ecdh);
  let crypto_provider = crypto_provider_for(ciphers, ecdh_name, &spec.locus)?;

  let loaded = load_chain(spec.cert_path, &spec.locus, trust_store)?;
  let key_der = crate::chain::load_private_key(spec.key_path, &spec.locus)?;
  build_context_from_loaded(loaded, key_der, spec.server_name, spec.npn, &spec.locus, crypto_provider, protocol_versions)
}

/// Builds a `Context` from an already-loaded chain, key, and resolved
/// `CryptoProvider` — the shared tail of both the on-disk path (§4.D
/// step 10) and the in-memory, SNI-helper-response path (§4.E transient
/// context construction).
fn build_context_from_loaded(
  loaded: crate::chain::LoadedChain,
  key_der: rustls_pki_types::PrivateKeyDer<'static>,
  server_name: Option<&str>,
  npn: &[String],
  locus: &str,
  crypto_provider: CryptoProvider,
  protocol_versions: &'static [&'static SupportedProtocolVersion],
) -> Result<Arc<Context>> {
  let signing_key = crypto_provider
    .key_provider
    .load_private_key(key_der)
    .map_err(|source| CastellanError::ParseKey {
      locus: locus.to_string(),
      path: locus.to_string(),
      source: std::io::Error::new(std::io::ErrorKind::InvalidData, source.to_string()),
    })?;

  let mut cert_chain = vec![loaded.leaf.clone()];
  cert_chain.extend(loaded.extra_chain.iter().cloned());

  let stapling = match &loaded.issuer {
    Some(IssuerMaterial::Full(issuer_der)) => Stapling::new(loaded.leaf.as_ref(), issuer_der.as_ref()).map(Arc::new),
    Some(IssuerMaterial::Parts { subject_der, public_key_bits }) => Stapling::from_issuer_parts(loaded.leaf.as_ref(), subject_der, public_key_bits).map(Arc::new),
    None => None,
  };

  let npn_wire = npn_wire_encode(npn, locus)?;

  Context::build(
    server_name.map(|s| s.to_string()),
    cert_chain,
    signing_key,
    npn_wire,
    stapling,
    crypto_provider,
    protocol_versions,
    locus,
  )
}

/// Builds a transient `Context` (§4.E) from a PEM cert/key pair that
/// arrived in an SNI helper response body rather than from disk. Used by
/// [`crate::sni::CastellanResolver`] once the asynchronous lookup
/// completes. `ciphers`/`ecdh` follow the same override-then-frontend
/// rule as an on-disk context (§4.D steps 4-5); the helper response may
/// carry neither, in which case the frontend's own values apply.
#[allow(clippy::too_many_arguments)]
pub fn build_context_from_pem(
  server_name: &str,
  cert_pem: &[u8],
  key_pem: &[u8],
  npn: &[String],
  ciphers: Option<&str>,
  ecdh: Option<&str>,
  frontend: &FrontendConfig,
  protocol_versions: &'static [&'static SupportedProtocolVersion],
  trust_store: &dyn TrustStore,
) -> Result<Arc<Context>> {
  let crypto_provider = crypto_provider_for(ciphers.or(frontend.ciphers.as_deref()), ecdh.unwrap_or(&frontend.ecdh), server_name)?;
  let loaded = crate::chain::load_chain_from_pem(cert_pem, server_name, trust_store)?;
  let key_der = crate::chain::load_private_key_from_pem(key_pem, server_name)?;
  build_context_from_loaded(loaded, key_der, Some(server_name), npn, server_name, crypto_provider, protocol_versions)
}

/// Builds the full `ContextSet`: the default context from `frontend.*`
/// followed by one context per `contexts[]` entry, in order (§3
/// Lifecycle), each with its own per-identity crypto provider and
/// `ServerConfig`. Any failure aborts construction; the partially filled
/// `Vec` this function accumulates into is simply dropped, which *is*
/// "free already-built contexts" — see SPEC_FULL.md §7.
pub fn build_context_set(config: &Config, trust_store: &dyn TrustStore) -> Result<ContextSet> {
  let versions = protocol_versions(config.frontend.security, "frontend.security")?;

  let default_spec = ContextSpec {
    server_name: None,
    cert_path: &config.frontend.cert,
    key_path: &config.frontend.key,
    npn: &config.frontend.npn,
    ciphers: None,
    ecdh: None,
    locus: "default".to_string(),
  };
  let default_context = build_context(&default_spec, &config.frontend, versions, trust_store)?;

  let mut configured = Vec::with_capacity(config.contexts.len());
  for ctx_config in &config.contexts {
    let spec = context_spec_for(ctx_config, config);
    configured.push(build_context(&spec, &config.frontend, versions, trust_store)?);
  }

  Ok(ContextSet::new(default_context, configured))
}

fn context_spec_for<'a>(ctx_config: &'a ContextConfig, config: &'a Config) -> ContextSpec<'a> {
  ContextSpec {
    server_name: Some(&ctx_config.servername),
    cert_path: &ctx_config.cert,
    key_path: &ctx_config.key,
    npn: ctx_config.npn.as_ref().unwrap_or(&config.frontend.npn),
    ciphers: ctx_config.ciphers.as_deref(),
    ecdh: ctx_config.ecdh.as_deref(),
    locus: ctx_config.servername.clone(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::trust_store::EmptyTrustStore;
  use castellan_common::config::{Config, ContextConfig, FrontendConfig};
  use rcgen::{CertificateParams, KeyPair};
  use std::io::Write;
  use std::sync::atomic::{AtomicU64, Ordering};

  static TEST_FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

  struct TempCert {
    cert_path: std::path::PathBuf,
    key_path: std::path::PathBuf,
  }

  impl Drop for TempCert {
    fn drop(&mut self) {
      let _ = std::fs::remove_file(&self.cert_path);
      let _ = std::fs::remove_file(&self.key_path);
    }
  }

  fn write_self_signed(name: &str) -> TempCert {
    let key_pair = KeyPair::generate().unwrap();
    let params = CertificateParams::new(vec![name.to_string()]).unwrap();
    let cert = params.self_signed(&key_pair).unwrap();

    let unique = TEST_FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut cert_path = std::env::temp_dir();
    cert_path.push(format!("castellan-test-{}-{}-{}.cert.pem", std::process::id(), unique, name));
    let mut key_path = std::env::temp_dir();
    key_path.push(format!("castellan-test-{}-{}-{}.key.pem", std::process::id(), unique, name));

    std::fs::File::create(&cert_path).unwrap().write_all(cert.pem().as_bytes()).unwrap();
    std::fs::File::create(&key_path).unwrap().write_all(key_pair.serialize_pem().as_bytes()).unwrap();

    TempCert { cert_path, key_path }
  }

  fn base_config(default: &TempCert) -> Config {
    Config {
      frontend: FrontendConfig {
        cert: default.cert_path.to_str().unwrap().to_string(),
        key: default.key_path.to_str().unwrap().to_string(),
        ..FrontendConfig::default()
      },
      ..Config::default()
    }
  }

  #[test]
  fn crypto_provider_rejects_unknown_ecdh_curve() {
    let default = write_self_signed("default.test");
    let mut config = base_config(&default);
    config.frontend.ecdh = "not-a-curve".to_string();
    let err = build_crypto_provider(&config).unwrap_err();
    assert!(matches!(err, CastellanError::EcdhNotFound { .. }));
  }

  #[test]
  fn empty_contexts_yields_default_only_set() {
    let default = write_self_signed("default.test");
    let config = base_config(&default);
    let context_set = build_context_set(&config, &EmptyTrustStore).unwrap();
    assert_eq!(context_set.contexts.len(), 1);
    assert_eq!(context_set.resolve_local("anything.test"), 0);
  }

  #[test]
  fn bad_frontend_ecdh_rolls_back_without_building_any_context() {
    let default = write_self_signed("default.test");
    let mut config = base_config(&default);
    config.frontend.ecdh = "bogus".to_string();
    let err = build_context_set(&config, &EmptyTrustStore).unwrap_err();
    assert!(matches!(err, CastellanError::EcdhNotFound { .. }));
  }

  #[test]
  fn configured_contexts_are_locally_resolvable() {
    let default = write_self_signed("default.test");
    let a = write_self_signed("a.test");
    let mut config = base_config(&default);
    config.contexts.push(ContextConfig {
      servername: "a.test".to_string(),
      cert: a.cert_path.to_str().unwrap().to_string(),
      key: a.key_path.to_str().unwrap().to_string(),
      ciphers: None,
      ecdh: None,
      npn: None,
    });
    let context_set = build_context_set(&config, &EmptyTrustStore).unwrap();
    assert_eq!(context_set.contexts.len(), 2);
    assert_eq!(context_set.resolve_local("A.TEST"), 1);
    assert_eq!(context_set.resolve_local("c.test"), 0);
  }

  #[test]
  fn unsupported_protocol_version_is_rejected_at_build_time() {
    let default = write_self_signed("default.test");
    let mut config = base_config(&default);
    config.frontend.security = SecurityMethod::Ssl3;
    assert!(matches!(
      protocol_versions(config.frontend.security, "frontend.security"),
      Err(CastellanError::UnsupportedProtocolVersion { .. })
    ));
  }

  #[test]
  fn per_context_bad_ecdh_fails_without_building_the_whole_set() {
    let default = write_self_signed("default.test");
    let a = write_self_signed("a.test");
    let mut config = base_config(&default);
    config.contexts.push(ContextConfig {
      servername: "a.test".to_string(),
      cert: a.cert_path.to_str().unwrap().to_string(),
      key: a.key_path.to_str().unwrap().to_string(),
      ciphers: None,
      ecdh: Some("bogus".to_string()),
      npn: None,
    });
    let err = build_context_set(&config, &EmptyTrustStore).unwrap_err();
    assert!(matches!(err, CastellanError::EcdhNotFound { .. }));
  }

  /// §4.D steps 4-5: a per-context `ecdh` override must actually change
  /// that context's own live handshake parameters rather than being
  /// silently dropped, while contexts without an override keep using
  /// `frontend.ecdh`.
  #[test]
  fn per_context_ecdh_override_wins_over_frontend_default() {
    let default = write_self_signed("default.test");
    let a = write_self_signed("a.test");
    let mut config = base_config(&default);
    config.contexts.push(ContextConfig {
      servername: "a.test".to_string(),
      cert: a.cert_path.to_str().unwrap().to_string(),
      key: a.key_path.to_str().unwrap().to_string(),
      ciphers: None,
      ecdh: Some("secp384r1".to_string()),
      npn: None,
    });
    let context_set = build_context_set(&config, &EmptyTrustStore).unwrap();

    let default_kx = context_set.contexts[0].server_config.crypto_provider().kx_groups[0].name();
    let override_kx = context_set.contexts[1].server_config.crypto_provider().kx_groups[0].name();

    assert_eq!(default_kx, rustls::NamedGroup::secp256r1);
    assert_eq!(override_kx, rustls::NamedGroup::secp384r1);
  }
}
