//! ECDH curve short-name lookup (§4.D step 4).
//!
//! OpenSSL-style short names map onto the `aws-lc-rs` key-exchange groups
//! rustls exposes. Only the curves the distilled spec's default
//! (`prime256v1`) and its common peers cover are recognized; anything
//! else is `kEcdhNotFound`.

use rustls::crypto::aws_lc_rs::kx_group;
use rustls::crypto::SupportedKxGroup;

pub fn lookup(short_name: &str) -> Option<&'static dyn SupportedKxGroup> {
  match short_name {
    "prime256v1" | "secp256r1" => Some(kx_group::SECP256R1),
    "secp384r1" => Some(kx_group::SECP384R1),
    "secp521r1" => Some(kx_group::SECP521R1),
    "x25519" => Some(kx_group::X25519),
    _ => None,
  }
}
