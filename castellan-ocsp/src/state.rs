//! The per-context OCSP entry state machine (§4.F).

use std::time::Instant;

/// `Unknown → Fetching → Valid | Failed`, with `Valid → Fetching` once the
/// cached response's `expiry` has passed. `parking_lot::Mutex` guards this
/// because it is read and transitioned from the synchronous
/// `ResolvesServerCert::resolve()` call path — a `tokio` lock would
/// require an async context that call site doesn't have.
#[derive(Debug, Clone)]
pub enum OcspState {
  Unknown,
  Fetching,
  Valid { response: Vec<u8>, expiry: Instant },
  Failed,
}

impl Default for OcspState {
  fn default() -> Self {
    OcspState::Unknown
  }
}

pub struct OcspEntry {
  state: parking_lot::Mutex<OcspState>,
}

impl OcspEntry {
  pub fn new() -> Self {
    Self {
      state: parking_lot::Mutex::new(OcspState::Unknown),
    }
  }

  /// Returns the currently stapleable response, if any, without
  /// triggering a fetch. A `Valid` entry past its `expiry` is treated as
  /// stale and yields `None`.
  pub fn current_response(&self) -> Option<Vec<u8>> {
    match &*self.state.lock() {
      OcspState::Valid { response, expiry } if *expiry > Instant::now() => Some(response.clone()),
      _ => None,
    }
  }

  /// Attempts to transition into `Fetching`, returning `true` only if this
  /// call won the race — i.e. no other fetch for this context is already
  /// in flight (§4.F "exactly one `Fetching` per context at a time").
  pub fn begin_fetch_if_needed(&self) -> bool {
    let mut state = self.state.lock();
    let needs_fetch = match &*state {
      OcspState::Unknown | OcspState::Failed => true,
      OcspState::Valid { expiry, .. } => *expiry <= Instant::now(),
      OcspState::Fetching => false,
    };
    if needs_fetch {
      *state = OcspState::Fetching;
    }
    needs_fetch
  }

  pub fn complete_fetch(&self, response: Vec<u8>, expiry: Instant) {
    *self.state.lock() = OcspState::Valid { response, expiry };
  }

  pub fn fail_fetch(&self) {
    *self.state.lock() = OcspState::Failed;
  }
}

impl Default for OcspEntry {
  fn default() -> Self {
    Self::new()
  }
}
