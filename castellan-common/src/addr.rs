//! Address parsing and wire-encoding utilities (component A of the TLS
//! context manager): host/port resolution, NPN wire encoding, and base64.
//!
//! Grounded in the teacher's preference for small, single-purpose helper
//! functions over ad hoc inline parsing (`ferron/src/util/obtain_config_struct.rs`).

use std::net::{IpAddr, SocketAddr};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;

use crate::error::CastellanError;

/// Parses a host/port pair into a `SocketAddr`, trying IPv4 first and
/// falling back to IPv6. No DNS resolution is ever attempted — an
/// unparsable literal is a configuration error, not a lookup failure.
pub fn parse_host_port(host: &str, port: u16, field: &str) -> Result<SocketAddr, CastellanError> {
  if let Ok(addr) = host.parse::<std::net::Ipv4Addr>() {
    return Ok(SocketAddr::new(IpAddr::V4(addr), port));
  }

  let trimmed = host.trim_start_matches('[').trim_end_matches(']');
  match trimmed.parse::<std::net::Ipv6Addr>() {
    Ok(addr) => Ok(SocketAddr::new(IpAddr::V6(addr), port)),
    Err(source) => Err(CastellanError::Pton {
      field: field.to_string(),
      value: host.to_string(),
      source,
    }),
  }
}

/// Base64-encodes `bytes` using the standard alphabet with padding.
pub fn base64_encode(bytes: &[u8]) -> String {
  BASE64_STANDARD.encode(bytes)
}

/// Encodes a list of protocol names into the length-prefixed wire format
/// NPN advertisement expects: one length byte followed by the name's
/// bytes, repeated for each entry in order.
///
/// An empty list yields `None` (absent), never `Some(vec![])` — a server
/// that advertises zero protocols must not register the NPN callback at
/// all (see the source notes in SPEC_FULL.md §9).
pub fn npn_wire_encode(names: &[String], locus: &str) -> Result<Option<Vec<u8>>, CastellanError> {
  if names.is_empty() {
    return Ok(None);
  }

  let mut wire = Vec::with_capacity(names.iter().map(|n| 1 + n.len()).sum());
  for name in names {
    let len = name.len();
    if len == 0 || len > 255 {
      return Err(CastellanError::NpnLength {
        locus: locus.to_string(),
        name: name.clone(),
        len,
      });
    }
    wire.push(len as u8);
    wire.extend_from_slice(name.as_bytes());
  }
  Ok(Some(wire))
}

/// Decodes a length-prefixed NPN wire buffer back into its protocol name
/// list. Used only by tests to assert the round-trip property — nothing
/// in the production path needs to decode its own advertisement.
#[cfg(test)]
pub fn npn_wire_decode(wire: &[u8]) -> Vec<String> {
  let mut names = Vec::new();
  let mut i = 0;
  while i < wire.len() {
    let len = wire[i] as usize;
    i += 1;
    let name = String::from_utf8(wire[i..i + len].to_vec()).expect("valid utf8 in test fixture");
    names.push(name);
    i += len;
  }
  names
}
