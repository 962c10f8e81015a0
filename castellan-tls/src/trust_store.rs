//! Fallback issuer lookup against a trust store, used when the
//! certificate file's own PEM stream carries no issuer (§4.C).

use x509_parser::prelude::{FromDer, X509Certificate};
use x509_parser::x509::SubjectPublicKeyInfo;

/// A found issuer's subject DN and raw `subjectPublicKey` BIT STRING
/// payload — enough for OCSP `CertID` derivation (§4.F) even though a
/// trust anchor doesn't carry a reconstructable full certificate the way
/// a chain-supplied issuer does. `public_key_bits` must be the bare BIT
/// STRING contents (no AlgorithmIdentifier, no tag/length/unused-bits
/// byte), matching what `certid::raw_public_key_bits` hashes for the
/// in-chain path — the full `SubjectPublicKeyInfo` DER hashes to a
/// different, non-interoperable `issuer_key_hash`.
#[derive(Clone)]
pub struct TrustAnchorIssuer {
  pub subject_der: Vec<u8>,
  pub public_key_bits: Vec<u8>,
}

/// Abstracts the "consult the configured trust store" step in §4.C so
/// tests can substitute a small fixed set of anchors instead of the
/// platform's real trust store.
pub trait TrustStore: Send + Sync {
  fn find_issuer(&self, leaf_issuer_subject_der: &[u8]) -> Option<TrustAnchorIssuer>;
}

/// The production trust store: the Mozilla root set bundled by
/// `webpki-roots`. Ships no disk or syscall dependency, which keeps a
/// worker process's startup path hermetic — the same tradeoff
/// `rustls-native-certs`' own docs describe against parsing the OS store.
/// Use [`NativeCertsTrustStore`] instead when a deployment wants the
/// platform trust store.
pub struct WebPkiTrustStore;

impl TrustStore for WebPkiTrustStore {
  fn find_issuer(&self, leaf_issuer_subject_der: &[u8]) -> Option<TrustAnchorIssuer> {
    let anchor = webpki_roots::TLS_SERVER_ROOTS
      .iter()
      .find(|anchor| anchor.subject.as_ref() == leaf_issuer_subject_der)?;

    // `anchor.subject_public_key_info` is the full SPKI DER (AlgorithmIdentifier
    // + BIT STRING); parse it so only the BIT STRING payload is hashed, the
    // same input `certid::raw_public_key_bits` takes from an in-chain issuer.
    let (_, spki) = SubjectPublicKeyInfo::from_der(anchor.subject_public_key_info.as_ref()).ok()?;

    Some(TrustAnchorIssuer {
      subject_der: anchor.subject.as_ref().to_vec(),
      public_key_bits: spki.subject_public_key.data.as_ref().to_vec(),
    })
  }
}

/// Loads the OS-provided trust anchors once at construction via
/// `rustls-native-certs`, then serves lookups out of that in-memory
/// snapshot — a process that wants the platform trust store instead of
/// the bundled Mozilla set picks this over [`WebPkiTrustStore`].
/// Anchors that fail to parse as X.509 are skipped rather than rejecting
/// the whole load, since one malformed OS certificate store entry
/// shouldn't take down every other anchor.
pub struct NativeCertsTrustStore {
  anchors: Vec<TrustAnchorIssuer>,
}

impl NativeCertsTrustStore {
  /// Loads the OS trust store. A cert the platform store can't hand back
  /// as parseable X.509 is dropped from the anchor set rather than
  /// failing the whole load — `rustls-native-certs` itself already
  /// tolerates unreadable individual entries in `CertificateResult::errors`.
  pub fn load() -> Self {
    let result = rustls_native_certs::load_native_certs();
    let anchors = result
      .certs
      .iter()
      .filter_map(|cert| {
        let (_, parsed) = X509Certificate::from_der(cert.as_ref()).ok()?;
        Some(TrustAnchorIssuer {
          subject_der: parsed.subject().as_raw().to_vec(),
          public_key_bits: parsed.public_key().subject_public_key.data.as_ref().to_vec(),
        })
      })
      .collect();
    Self { anchors }
  }
}

impl TrustStore for NativeCertsTrustStore {
  fn find_issuer(&self, leaf_issuer_subject_der: &[u8]) -> Option<TrustAnchorIssuer> {
    self.anchors.iter().find(|anchor| anchor.subject_der == leaf_issuer_subject_der).cloned()
  }
}

/// A trust store with no anchors — every lookup misses. Useful as the
/// default in tests that don't care about trust-store fallback.
pub struct EmptyTrustStore;

impl TrustStore for EmptyTrustStore {
  fn find_issuer(&self, _leaf_issuer_subject_der: &[u8]) -> Option<TrustAnchorIssuer> {
    None
  }
}
