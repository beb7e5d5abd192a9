use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::{PeerShareError, Result};

/// Working range `[from, to)` of ephemeral transfer ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub fn new(from: u16, to: u16) -> Result<Self> {
        if to < from {
            return Err(PeerShareError::Config(format!(
                "Invalid port range {}..{}",
                from, to
            )));
        }
        Ok(Self { from, to })
    }

    pub fn len(&self) -> usize {
        (self.to - self.from) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.from..self.to).contains(&port)
    }
}

/// Hands out transfer ports. Allocation and release share one lock so two
/// concurrent distributions never get the same port.
#[derive(Debug)]
pub struct PortAllocator {
    range: PortRange,
    in_use: Mutex<BTreeSet<u16>>,
}

impl PortAllocator {
    pub fn new(range: PortRange) -> Self {
        Self {
            range,
            in_use: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    pub fn allocate(&self) -> Result<u16> {
        let exhausted = PeerShareError::PortsExhausted {
            from: self.range.from,
            to: self.range.to,
        };

        let mut in_use = self.lock();
        if in_use.len() >= self.range.len() {
            return Err(exhausted);
        }

        let port = (self.range.from..self.range.to)
            .find(|port| !in_use.contains(port))
            .ok_or(exhausted)?;

        in_use.insert(port);
        debug!("Allocated transfer port {} ({} in use)", port, in_use.len());
        Ok(port)
    }

    pub fn release(&self, port: u16) {
        let mut in_use = self.lock();
        if in_use.remove(&port) {
            debug!("Released transfer port {} ({} in use)", port, in_use.len());
        }
    }

    pub fn in_use(&self) -> Vec<u16> {
        self.lock().iter().copied().collect()
    }

    pub fn is_in_use(&self, port: u16) -> bool {
        self.lock().contains(&port)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<u16>> {
        self.in_use.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn allocator(from: u16, to: u16) -> PortAllocator {
        PortAllocator::new(PortRange::new(from, to).unwrap())
    }

    #[test]
    fn test_allocates_lowest_free_port() {
        let ports = allocator(47100, 47200);
        assert_eq!(ports.allocate().unwrap(), 47100);
        assert_eq!(ports.allocate().unwrap(), 47101);

        ports.release(47100);
        assert_eq!(ports.allocate().unwrap(), 47100);
        assert_eq!(ports.in_use(), vec![47100, 47101]);
    }

    #[test]
    fn test_fills_gap_left_by_release() {
        let ports = allocator(47100, 47103);
        for _ in 0..3 {
            ports.allocate().unwrap();
        }
        ports.release(47101);
        assert!(!ports.is_in_use(47101));
        assert_eq!(ports.allocate().unwrap(), 47101);
        assert!(ports.allocate().is_err());
    }

    #[test]
    fn test_exhaustion() {
        let ports = allocator(47100, 47101);
        assert_eq!(ports.allocate().unwrap(), 47100);

        let err = ports.allocate().unwrap_err();
        assert!(matches!(
            err,
            PeerShareError::PortsExhausted {
                from: 47100,
                to: 47101
            }
        ));
    }

    #[test]
    fn test_empty_range_is_always_exhausted() {
        let ports = allocator(47100, 47100);
        assert!(ports.allocate().is_err());
    }

    #[test]
    fn test_inverted_range_rejected() {
        assert!(PortRange::new(47200, 47100).is_err());
    }

    #[test]
    fn test_concurrent_allocations_are_distinct() {
        let ports = Arc::new(allocator(47100, 47200));
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let ports = ports.clone();
                std::thread::spawn(move || ports.allocate().unwrap())
            })
            .collect();

        let issued: HashSet<u16> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(issued.len(), 50);
        assert!(issued.iter().all(|p| ports.range().contains(*p)));
    }
}
