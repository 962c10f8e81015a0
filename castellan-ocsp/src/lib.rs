//! OCSP stapling derivations (component F of the TLS context manager):
//! `CertID` construction, DER/base64 encoding, AIA responder URL
//! extraction, OCSP request encoding, and the per-context fetch state
//! machine.

pub mod certid;
pub mod state;
pub mod stapling;

pub use stapling::Stapling;
