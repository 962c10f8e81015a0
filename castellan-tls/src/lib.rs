//! TLS context manager core: certificate chain loading (component C),
//! the TLS context builder (component D), the SNI resolver (component
//! E), and the HTTP helper pool trait boundary (component G) described
//! in SPEC_FULL.md.

pub mod builder;
pub mod chain;
pub mod context;
pub mod ecdh;
pub mod helper;
pub mod ocsp_refresh;
pub mod sni;
pub mod trust_store;

pub use builder::{build_context_from_pem, build_context_set, build_crypto_provider, protocol_versions};
pub use context::{Context, ContextSet};
pub use helper::{DedupingHelperPool, HelperError, HelperPool, StaticHelperPool};
pub use ocsp_refresh::{spawn_refresh, OcspRefreshConfig};
pub use sni::{AsyncSniConfig, CastellanResolver, Selection};
