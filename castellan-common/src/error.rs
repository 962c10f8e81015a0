use std::net::AddrParseError;

/// Every fatal-at-startup error kind from the configuration/context-build
/// pipeline, plus the handful of codec failures that can surface from
/// either path.
///
/// Runtime (handshake-time) failures are never represented here — those
/// degrade gracefully per the resolver and stapling logic instead of
/// propagating an error type.
#[derive(thiserror::Error, Debug)]
pub enum CastellanError {
  #[error("failed to read or parse configuration file {path}: {message}")]
  JsonParse { path: String, message: String },

  #[error("configuration root in {path} is not a JSON object")]
  JsonRootNotObject { path: String },

  #[error("contexts[{index}] in {path} is not a JSON object")]
  JsonCtxNotObject { path: String, index: usize },

  #[error("NPN list for {locus} contains a non-string element")]
  NpnNonString { locus: String },

  #[error("servername {name:?} in {locus} is not ASCII; only ASCII hostnames are accepted at config load")]
  NonAsciiServerName { locus: String, name: String },

  #[error("NPN protocol name {name:?} for {locus} has length {len}, must be 1..=255")]
  NpnLength { locus: String, name: String, len: usize },

  #[error("an ECDH curve short-name {name:?} is not recognized (context: {locus})")]
  EcdhNotFound { locus: String, name: String },

  #[error("{locus} requests TLS protocol version {version:?}, which this build of rustls cannot negotiate")]
  UnsupportedProtocolVersion { locus: String, version: String },

  #[error("cannot open certificate file {path} for {locus}: {source}")]
  LoadCert {
    locus: String,
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("cannot parse certificate chain at {path} for {locus}: {source}")]
  ParseCert {
    locus: String,
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("cannot parse or match private key at {path} for {locus}: {source}")]
  ParseKey {
    locus: String,
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("{field} value {value:?} is not an IP literal: {source}")]
  Pton {
    field: String,
    value: String,
    #[source]
    source: AddrParseError,
  },
}

pub type Result<T> = std::result::Result<T, CastellanError>;
