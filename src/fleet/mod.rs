//! Fleet messaging: identities, queue names, the command envelope and
//! the protocols that ride on it.

pub mod config_sync;
pub mod envelope;
pub mod forward;
pub mod identity;
pub mod notefile;
pub mod records;
