//! Worker identity.

use rand::Rng;

use forgeq_core::WorkerId;

/// Derive a worker identity stable for this process's lifetime:
/// `host-pid-random`. The random suffix keeps two workers on the same host
/// distinct even across pid reuse.
pub fn default_worker_id() -> WorkerId {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    let suffix: u16 = rand::rng().random();
    let id = format!("{host}-{}-{suffix:04x}", std::process::id());

    // The derived id is non-empty and short by construction.
    WorkerId::new(id).expect("derived worker id is always valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_ids_are_distinct() {
        let a = default_worker_id();
        let b = default_worker_id();
        assert_ne!(a, b);
        assert!(a.as_str().contains(&std::process::id().to_string()));
    }
}
