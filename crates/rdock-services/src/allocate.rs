//! Port and id allocation for new services

use std::sync::atomic::{AtomicU64, Ordering};

use rdock_core::error::ServiceError;
use rdock_core::service::ServiceKind;
use rdock_core::time::current_time_millis;

/// Last suffix handed out by [`next_suffix`] in this process
static LAST_SUFFIX: AtomicU64 = AtomicU64::new(0);

/// Port for a new service given the ports already in use.
///
/// The first service gets `base`; later ones get one above the highest known
/// port, never below `base`.
pub(crate) fn next_port(
    ports: impl IntoIterator<Item = u16>,
    base: u16,
) -> Result<u16, ServiceError> {
    match ports.into_iter().max() {
        None => Ok(base),
        Some(highest) => highest
            .checked_add(1)
            .map(|port| port.max(base))
            .ok_or(ServiceError::PortsExhausted),
    }
}

/// Strictly increasing, time-based suffix
pub(crate) fn next_suffix() -> u64 {
    let now = current_time_millis();
    let mut last = LAST_SUFFIX.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        let swapped =
            LAST_SUFFIX.compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed);
        match swapped {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

/// Fresh id for a service of `kind`, skipping any id `taken` reports
pub(crate) fn service_id(kind: ServiceKind, mut taken: impl FnMut(&str) -> bool) -> String {
    loop {
        let id = format!("mcp-{}-{}", kind, next_suffix());
        if !taken(&id) {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_first_port_is_base() {
        assert_eq!(next_port([], 9000).unwrap(), 9000);
    }

    #[test]
    fn test_next_port_follows_highest() {
        assert_eq!(next_port([9000], 9000).unwrap(), 9001);
        assert_eq!(next_port([9003, 9000, 9001], 9000).unwrap(), 9004);
    }

    #[test]
    fn test_next_port_never_below_base() {
        assert_eq!(next_port([3000], 9000).unwrap(), 9000);
    }

    #[test]
    fn test_port_space_exhausted() {
        assert!(matches!(
            next_port([u16::MAX], 9000),
            Err(ServiceError::PortsExhausted)
        ));
    }

    #[test]
    fn test_suffixes_strictly_increase() {
        let suffixes: Vec<u64> = (0..1000).map(|_| next_suffix()).collect();
        assert!(suffixes.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_service_id_skips_taken() {
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let id = service_id(ServiceKind::Shell, |id| seen.contains(id));
            assert!(id.starts_with("mcp-shell-"));
            assert!(seen.insert(id));
        }

        let mut rejected = 0;
        let id = service_id(ServiceKind::Docker, |_| {
            rejected += 1;
            rejected <= 3
        });
        assert_eq!(rejected, 4);
        assert!(id.starts_with("mcp-docker-"));
    }
}
