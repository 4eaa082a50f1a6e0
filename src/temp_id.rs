//! Temporary-id generation and detection.
//!
//! Notes and folders created while offline get a client-generated id with a
//! recognizable prefix. The prefix is the sole discriminator: everything the
//! guard and registry know about "temporary" comes from `is_temporary`.

use uuid::Uuid;

/// Default prefix; overridable through `SyncConfig::temporary_id_prefix`.
pub const DEFAULT_PREFIX: &str = "local_";

/// Generate a fresh temporary id: prefix + 128-bit random token rendered as
/// lowercase hyphenated hex.
pub fn generate(prefix: &str) -> String {
    format!("{prefix}{}", Uuid::new_v4())
}

/// Whether `id` is a client-generated id the server has never seen.
pub fn is_temporary(id: &str, prefix: &str) -> bool {
    id.starts_with(prefix)
}
