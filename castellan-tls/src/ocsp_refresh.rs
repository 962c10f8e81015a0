//! OCSP staple refresh (§4.F): the asynchronous half of the fetch state
//! machine in `castellan_ocsp::state`.
//!
//! `OcspEntry::begin_fetch_if_needed` only flips `Unknown`/`Failed` to
//! `Fetching` — the actual network round trip to the stapling helper has
//! to happen somewhere. Mirrors `sni::spawn_async_lookup`'s shape: a
//! detached `tokio::spawn` task that calls the shared `HelperPool` and
//! resolves the entry to `Valid` or `Failed` on completion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use castellan_common::logging::Logger;
use castellan_ocsp::Stapling;

use crate::helper::HelperPool;

/// How long a freshly fetched staple is considered `Valid` for. The raw
/// OCSP response DER carries its own `nextUpdate` field, but parsing it
/// back out of `rasn-ocsp`'s nested `BasicOcspResponse`/`SingleResponse`
/// structure is not attempted here — see DESIGN.md. A fixed TTL still
/// guarantees the entry eventually re-enters `Fetching` rather than
/// staying `Valid` forever on a stale response.
const OCSP_STAPLE_TTL: Duration = Duration::from_secs(3600);

/// Configuration the resolver needs to refresh an OCSP staple (§4.F):
/// the helper's address, the query template, and a fetch timeout —
/// structurally identical to `sni::AsyncSniConfig`'s helper fields.
pub struct OcspRefreshConfig {
  pub host: String,
  pub port: u16,
  pub query: String,
  pub timeout: Duration,
  pub helper: Arc<dyn HelperPool>,
}

/// Spawns the asynchronous fetch for one `Stapling`'s entry. Expected to
/// be called right after `begin_fetch_if_needed()` returns `true`, so the
/// entry is already `Fetching` and will not be double-fetched by a
/// concurrent handshake for the same context.
pub fn spawn_refresh(stapling: Arc<Stapling>, config: Arc<OcspRefreshConfig>, logger: Arc<Logger>) {
  let Some(argument) = stapling.id_base64().map(|s| s.to_string()) else {
    stapling.entry.fail_fetch();
    return;
  };

  tokio::spawn(async move {
    let result = config.helper.get(&config.host, config.port, &config.query, &argument, config.timeout).await;
    match result {
      Ok(bytes) => {
        stapling.entry.complete_fetch(bytes.to_vec(), Instant::now() + OCSP_STAPLE_TTL);
      }
      Err(err) => {
        logger.warn(format!("OCSP staple refresh for {argument:?} failed: {err}"));
        stapling.entry.fail_fetch();
      }
    }
  });
}
