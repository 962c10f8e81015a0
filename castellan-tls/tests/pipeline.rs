//! End-to-end wiring tests: a real JSON configuration file, loaded through
//! `castellan_common::config::load_config`, driven all the way through
//! crypto provider selection and `ContextSet` construction, plus the
//! `HelperPool` contract's timeout fallback path exercised from outside
//! the crate the way a data-plane collaborator would use it.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use castellan_common::config::load_config;
use castellan_tls::build_context_set;
use rcgen::{CertificateParams, KeyPair};

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
  cert_path.push(format!("castellan-pipeline-test-{}-{}-{}.cert.pem", std::process::id(), unique, name));
  let mut key_path = std::env::temp_dir();
  key_path.push(format!("castellan-pipeline-test-{}-{}-{}.key.pem", std::process::id(), unique, name));

  std::fs::File::create(&cert_path).unwrap().write_all(cert.pem().as_bytes()).unwrap();
  std::fs::File::create(&key_path).unwrap().write_all(key_pair.serialize_pem().as_bytes()).unwrap();

  TempCert { cert_path, key_path }
}

/// `Config` on disk → `load_config` → `build_context_set` → SNI
/// selection, for the local-SNI scenarios (case-insensitive hit, miss
/// falls back to default).
#[test]
fn config_file_to_context_set_resolves_configured_and_default_names() {
  let default = write_self_signed("default.pipeline.test");
  let a = write_self_signed("a.pipeline.test");

  let unique = TEST_FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
  let config_path = std::env::temp_dir().join(format!("castellan-pipeline-test-{}-{}.json", std::process::id(), unique));
  let config_json = serde_json::json!({
    "frontend": {
      "cert": default.cert_path.to_str().unwrap(),
      "key": default.key_path.to_str().unwrap(),
    },
    "contexts": [{
      "servername": "a.pipeline.test",
      "cert": a.cert_path.to_str().unwrap(),
      "key": a.key_path.to_str().unwrap(),
    }],
  });
  std::fs::write(&config_path, config_json.to_string()).unwrap();

  let config = load_config(&config_path).unwrap();
  let context_set = build_context_set(&config, &castellan_tls::trust_store::EmptyTrustStore).unwrap();

  assert_eq!(context_set.contexts.len(), 2);
  assert_eq!(context_set.resolve_local("A.PIPELINE.TEST"), 1);
  assert_eq!(context_set.resolve_local("unconfigured.test"), 0);

  let _ = std::fs::remove_file(&config_path);
}

/// A `HelperPool` consumer outside the crate observes the same
/// timeout-then-fallback behavior the resolver relies on when a helper
/// never answers in time.
#[tokio::test]
async fn helper_pool_timeout_is_observable_from_outside_the_crate() {
  let pool: Arc<dyn castellan_tls::HelperPool> = Arc::new(
    castellan_tls::StaticHelperPool::new()
      .with_response("/bud/sni/slow.test", bytes::Bytes::from_static(b"too-late"))
      .with_delay(Duration::from_millis(50)),
  );

  let result = pool
    .get("127.0.0.1", 9000, "/bud/sni/%s", "slow.test", Duration::from_millis(5))
    .await;

  assert!(matches!(result, Err(castellan_tls::HelperError::Timeout { .. })));
}
