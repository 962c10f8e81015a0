//! Certificate chain and private key loading (component C, §4.C).

use std::fs::File;
use std::io::{BufRead, BufReader};

use castellan_common::error::{CastellanError, Result};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::trust_store::TrustStore;

/// The result of loading one context's certificate material: the leaf,
/// whatever extra chain certificates followed it in the same file, and
/// (if one could be found) the issuer's raw DER plus, separately, the
/// subject/pubkey pair to use for OCSP `CertID` derivation when the
/// issuer came from a trust store instead of the file itself.
pub struct LoadedChain {
  pub leaf: CertificateDer<'static>,
  pub extra_chain: Vec<CertificateDer<'static>>,
  pub issuer: Option<IssuerMaterial>,
}

/// Either a full issuer certificate pulled out of the same PEM stream as
/// the leaf, or just the subject/pubkey pair a trust-store lookup
/// yields — both are sufficient for OCSP `CertID` derivation (§4.F).
pub enum IssuerMaterial {
  Full(CertificateDer<'static>),
  Parts { subject_der: Vec<u8>, public_key_bits: Vec<u8> },
}

/// Loads a public certificate chain from `path`. The leaf is the first
/// certificate in the file; everything after it is the extra chain
/// `rustls_pemfile::certs()` streamed out before running dry. Any parse
/// error surfacing from the iterator is fatal, matching "propagate the
/// first Err yielded by the iterator, if any, as kParseCert".
pub fn load_certs(path: &str, locus: &str) -> Result<Vec<CertificateDer<'static>>> {
  let file = File::open(path).map_err(|source| CastellanError::LoadCert {
    locus: locus.to_string(),
    path: path.to_string(),
    source,
  })?;
  let mut reader = BufReader::new(file);
  load_certs_from_reader(&mut reader, locus, path)
}

/// Reads a PEM certificate stream from any `BufRead`, draining it the
/// way `load_certs` drains a file — used both for on-disk certificate
/// files and for an in-memory PEM body handed back by the SNI helper
/// (§4.E asynchronous SNI, transient `Context` construction).
fn load_certs_from_reader(reader: &mut dyn BufRead, locus: &str, path: &str) -> Result<Vec<CertificateDer<'static>>> {
  rustls_pemfile::certs(reader)
    .collect::<std::io::Result<Vec<_>>>()
    .map_err(|source| CastellanError::ParseCert {
      locus: locus.to_string(),
      path: path.to_string(),
      source,
    })
}

/// Loads a private key from `path`, matching
/// `ferron/src/tls_util.rs::load_private_key`'s "no key found" handling.
pub fn load_private_key(path: &str, locus: &str) -> Result<PrivateKeyDer<'static>> {
  let file = File::open(path).map_err(|source| CastellanError::LoadCert {
    locus: locus.to_string(),
    path: path.to_string(),
    source,
  })?;
  let mut reader = BufReader::new(file);
  load_private_key_from_reader(&mut reader, locus, path)
}

fn load_private_key_from_reader(reader: &mut dyn BufRead, locus: &str, path: &str) -> Result<PrivateKeyDer<'static>> {
  match rustls_pemfile::private_key(reader) {
    Ok(Some(key)) => Ok(key),
    Ok(None) => Err(CastellanError::ParseKey {
      locus: locus.to_string(),
      path: path.to_string(),
      source: std::io::Error::new(std::io::ErrorKind::InvalidData, "no private key found in file"),
    }),
    Err(source) => Err(CastellanError::ParseKey {
      locus: locus.to_string(),
      path: path.to_string(),
      source,
    }),
  }
}

/// Loads the full chain for one context and resolves its issuer, first by
/// scanning the extra chain certificates already in the file, falling
/// back to `trust_store` keyed by the leaf's issuer subject DN.
pub fn load_chain(path: &str, locus: &str, trust_store: &dyn TrustStore) -> Result<LoadedChain> {
  let certs = load_certs(path, locus)?;
  assemble_chain(certs, locus, path, trust_store)
}

/// The in-memory counterpart of [`load_chain`]: parses a PEM certificate
/// stream that was never written to disk (the SNI helper's response
/// body), resolving its issuer exactly the same way.
pub fn load_chain_from_pem(pem: &[u8], locus: &str, trust_store: &dyn TrustStore) -> Result<LoadedChain> {
  let mut reader = std::io::BufReader::new(pem);
  let certs = load_certs_from_reader(&mut reader, locus, "<sni-helper response>")?;
  assemble_chain(certs, locus, "<sni-helper response>", trust_store)
}

/// The in-memory counterpart of [`load_private_key`].
pub fn load_private_key_from_pem(pem: &[u8], locus: &str) -> Result<PrivateKeyDer<'static>> {
  let mut reader = std::io::BufReader::new(pem);
  load_private_key_from_reader(&mut reader, locus, "<sni-helper response>")
}

fn assemble_chain(mut certs: Vec<CertificateDer<'static>>, locus: &str, path: &str, trust_store: &dyn TrustStore) -> Result<LoadedChain> {
  if certs.is_empty() {
    return Err(CastellanError::ParseCert {
      locus: locus.to_string(),
      path: path.to_string(),
      source: std::io::Error::new(std::io::ErrorKind::InvalidData, "no certificates found in file"),
    });
  }
  let leaf = certs.remove(0);
  let extra_chain = certs;

  let issuer = find_issuer_in_chain(&leaf, &extra_chain)
    .map(IssuerMaterial::Full)
    .or_else(|| find_issuer_in_trust_store(&leaf, trust_store));

  Ok(LoadedChain { leaf, extra_chain, issuer })
}

/// Scans `extra_chain` for the certificate whose subject matches the
/// leaf's issuer DN — the "is issued by" predicate from §4.C realized as
/// subject/issuer DN comparison, refined by authority/subject key
/// identifier matching when both certificates carry one.
fn find_issuer_in_chain(leaf: &CertificateDer<'static>, extra_chain: &[CertificateDer<'static>]) -> Option<CertificateDer<'static>> {
  let (_, leaf_parsed) = X509Certificate::from_der(leaf.as_ref()).ok()?;
  extra_chain
    .iter()
    .find(|candidate| {
      let Ok((_, candidate_parsed)) = X509Certificate::from_der(candidate.as_ref()) else {
        return false;
      };
      is_issuer_of(&leaf_parsed, &candidate_parsed)
    })
    .cloned()
}

/// True if `candidate`'s subject matches `leaf`'s issuer DN, and — when
/// both extensions are present — `candidate`'s subject key identifier
/// matches `leaf`'s authority key identifier.
fn is_issuer_of(leaf: &X509Certificate, candidate: &X509Certificate) -> bool {
  if leaf.issuer() != candidate.subject() {
    return false;
  }
  match (authority_key_id(leaf), subject_key_id(candidate)) {
    (Some(akid), Some(skid)) => akid == skid,
    _ => true,
  }
}

fn authority_key_id(cert: &X509Certificate) -> Option<Vec<u8>> {
  cert.extensions().iter().find_map(|ext| match ext.parsed_extension() {
    x509_parser::extensions::ParsedExtension::AuthorityKeyIdentifier(akid) => akid.key_identifier.as_ref().map(|kid| kid.0.to_vec()),
    _ => None,
  })
}

fn subject_key_id(cert: &X509Certificate) -> Option<Vec<u8>> {
  cert.extensions().iter().find_map(|ext| match ext.parsed_extension() {
    x509_parser::extensions::ParsedExtension::SubjectKeyIdentifier(skid) => Some(skid.0.to_vec()),
    _ => None,
  })
}

fn find_issuer_in_trust_store(leaf: &CertificateDer<'static>, trust_store: &dyn TrustStore) -> Option<IssuerMaterial> {
  let (_, leaf_parsed) = X509Certificate::from_der(leaf.as_ref()).ok()?;
  let anchor = trust_store.find_issuer(leaf_parsed.issuer().as_raw())?;
  Some(IssuerMaterial::Parts {
    subject_der: anchor.subject_der,
    public_key_bits: anchor.public_key_bits,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::trust_store::{EmptyTrustStore, TrustAnchorIssuer};
  use rcgen::{CertificateParams, KeyPair};
  use std::io::Write;

  fn write_pem_chain(certs: &[String]) -> tempfile_path::TempPemFile {
    tempfile_path::TempPemFile::new(certs.join("\n"))
  }

  mod tempfile_path {
    use std::io::Write;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    pub struct TempPemFile {
      pub path: std::path::PathBuf,
    }

    impl TempPemFile {
      /// The pid alone is constant for the whole test binary, so every
      /// test that wants its own file needs a second, per-call
      /// discriminant — an atomic counter, which stays unique even across
      /// tests racing in parallel on the same thread pool.
      pub fn new(contents: String) -> Self {
        let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut path = std::env::temp_dir();
        path.push(format!("castellan-test-{}-{}.pem", std::process::id(), unique));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        Self { path }
      }
    }

    impl Drop for TempPemFile {
      fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
      }
    }
  }

  /// A trust store fixture returning a fixed issuer for one known subject
  /// DN, exercising the trust-store-hit path a bare `EmptyTrustStore`
  /// never reaches.
  struct FixedTrustStore {
    subject_der: Vec<u8>,
    public_key_bits: Vec<u8>,
  }

  impl crate::trust_store::TrustStore for FixedTrustStore {
    fn find_issuer(&self, leaf_issuer_subject_der: &[u8]) -> Option<TrustAnchorIssuer> {
      if leaf_issuer_subject_der == self.subject_der.as_slice() {
        Some(TrustAnchorIssuer {
          subject_der: self.subject_der.clone(),
          public_key_bits: self.public_key_bits.clone(),
        })
      } else {
        None
      }
    }
  }

  fn self_signed_chain_pem() -> (String, String) {
    let issuer_key = KeyPair::generate().unwrap();
    let issuer_params = CertificateParams::new(vec!["issuer.test".to_string()]).unwrap();
    let issuer_cert = issuer_params.self_signed(&issuer_key).unwrap();

    let leaf_key = KeyPair::generate().unwrap();
    let mut leaf_params = CertificateParams::new(vec!["leaf.test".to_string()]).unwrap();
    leaf_params.is_ca = rcgen::IsCa::NoCa;
    let leaf_cert = leaf_params.signed_by(&leaf_key, &issuer_cert, &issuer_key).unwrap();

    (leaf_cert.pem(), issuer_cert.pem())
  }

  #[test]
  fn missing_file_yields_load_cert_error() {
    let result = load_certs("/nonexistent/path/to/cert.pem", "default");
    assert!(matches!(result, Err(CastellanError::LoadCert { .. })));
  }

  #[test]
  fn chain_with_issuer_in_file_resolves_full_issuer() {
    let (leaf_pem, issuer_pem) = self_signed_chain_pem();
    let file = write_pem_chain(&[leaf_pem, issuer_pem]);
    let loaded = load_chain(file.path.to_str().unwrap(), "default", &EmptyTrustStore).unwrap();
    assert_eq!(loaded.extra_chain.len(), 1);
    assert!(matches!(loaded.issuer, Some(IssuerMaterial::Full(_))));
  }

  #[test]
  fn chain_without_issuer_and_empty_trust_store_has_no_issuer() {
    let (leaf_pem, _issuer_pem) = self_signed_chain_pem();
    let file = write_pem_chain(&[leaf_pem]);
    let loaded = load_chain(file.path.to_str().unwrap(), "default", &EmptyTrustStore).unwrap();
    assert!(loaded.extra_chain.is_empty());
    assert!(loaded.issuer.is_none());
  }

  #[test]
  fn empty_file_is_rejected() {
    let file = write_pem_chain(&[]);
    let result = load_chain(file.path.to_str().unwrap(), "default", &EmptyTrustStore);
    assert!(matches!(result, Err(CastellanError::ParseCert { .. })));
  }

  /// §8 scenario 7: a chain file with no issuer certificate of its own
  /// still resolves one, via the trust store keyed on the leaf's issuer
  /// subject DN.
  #[test]
  fn chain_without_issuer_falls_back_to_trust_store_hit() {
    let (leaf_pem, issuer_pem) = self_signed_chain_pem();
    let mut issuer_reader = issuer_pem.as_bytes();
    let issuer_der = rustls_pemfile::certs(&mut issuer_reader).next().unwrap().unwrap();
    let (_, issuer_parsed) = X509Certificate::from_der(issuer_der.as_ref()).unwrap();
    let subject_der = issuer_parsed.subject().as_raw().to_vec();
    let public_key_bits = issuer_parsed.public_key().subject_public_key.data.as_ref().to_vec();

    let file = write_pem_chain(&[leaf_pem]);
    let trust_store = FixedTrustStore { subject_der, public_key_bits };
    let loaded = load_chain(file.path.to_str().unwrap(), "default", &trust_store).unwrap();

    assert!(loaded.extra_chain.is_empty());
    assert!(matches!(loaded.issuer, Some(IssuerMaterial::Parts { .. })));
  }
}
