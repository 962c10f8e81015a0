//! `Stapling`: the per-context bundle of memoized OCSP derivations plus
//! the live fetch state machine (§4.F).

use std::sync::OnceLock;

use rasn_ocsp::CertId;

use crate::certid::{build_cert_id, build_cert_id_from_parts, encode_cert_id, encode_ocsp_request, extract_ocsp_urls};
use crate::state::OcspEntry;

/// Everything a `Context` needs to participate in OCSP stapling. Absent
/// entirely when no issuer could be resolved for the owning certificate
/// (Invariant 3 in SPEC_FULL.md §3).
pub struct Stapling {
  cert_id: CertId,
  id_der: OnceLock<Vec<u8>>,
  id_b64: OnceLock<String>,
  url: OnceLock<Option<String>>,
  request: OnceLock<Option<Vec<u8>>>,
  leaf_der: Vec<u8>,
  pub entry: OcspEntry,
}

impl Stapling {
  /// Builds the stapling state for a leaf/issuer pair. Returns `None` if
  /// `CertID` derivation fails for any reason (malformed DER, unsupported
  /// fields) — the context simply has no `Stapling`, matching "stapling
  /// will be disabled for that context".
  pub fn new(leaf_der: &[u8], issuer_der: &[u8]) -> Option<Self> {
    let cert_id = build_cert_id(leaf_der, issuer_der)?;
    Some(Self {
      cert_id,
      id_der: OnceLock::new(),
      id_b64: OnceLock::new(),
      url: OnceLock::new(),
      request: OnceLock::new(),
      leaf_der: leaf_der.to_vec(),
      entry: OcspEntry::new(),
    })
  }

  /// Builds stapling state when the issuer came from a trust-store lookup
  /// (§4.C) rather than the certificate file's own chain — only the
  /// issuer's subject DN and raw public-key bits are available in that
  /// case, which is all `CertID` derivation needs.
  pub fn from_issuer_parts(leaf_der: &[u8], issuer_subject_der: &[u8], issuer_pubkey_bits: &[u8]) -> Option<Self> {
    let cert_id = build_cert_id_from_parts(leaf_der, issuer_subject_der, issuer_pubkey_bits)?;
    Some(Self {
      cert_id,
      id_der: OnceLock::new(),
      id_b64: OnceLock::new(),
      url: OnceLock::new(),
      request: OnceLock::new(),
      leaf_der: leaf_der.to_vec(),
      entry: OcspEntry::new(),
    })
  }

  fn id_der(&self) -> Option<&[u8]> {
    let der = self.id_der.get_or_init(|| encode_cert_id(&self.cert_id).unwrap_or_default());
    if der.is_empty() {
      None
    } else {
      Some(der.as_slice())
    }
  }

  /// `ocsp_id_base64` (§4.F): stable, memoized base64 of `DER(ocsp_id)`.
  pub fn id_base64(&self) -> Option<&str> {
    let der = self.id_der()?;
    if der.is_empty() {
      return None;
    }
    Some(self.id_b64.get_or_init(|| castellan_common::addr::base64_encode(der)))
  }

  /// `ocsp_request` (§4.F), first half: the cached responder URL. `None`
  /// if the leaf's AIA extension carries no `id-ad-ocsp` access
  /// description.
  pub fn responder_url(&self) -> Option<&str> {
    self
      .url
      .get_or_init(|| extract_ocsp_urls(&self.leaf_der).into_iter().next())
      .as_deref()
  }

  /// `ocsp_request` (§4.F), second half: the DER-encoded `OCSPRequest`
  /// wrapping the cached `CertID`. Cached alongside the URL so repeated
  /// calls avoid re-encoding.
  pub fn request_der(&self) -> Option<&[u8]> {
    self
      .request
      .get_or_init(|| encode_ocsp_request(&self.cert_id))
      .as_deref()
  }
}
