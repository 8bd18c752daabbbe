//! Lease table
//!
//! Maps a client hardware address to the IPv4 address it was given.
//! Addresses are handed out sequentially from the address written in the
//! configured CIDR up to the last address of that network, and a lease is
//! held for the life of the process.

use crate::error::LeaseError;
use ipnetwork::Ipv4Network;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Lease table shared by every DHCP worker.
///
/// Lookup and insert happen under one lock so concurrent requests never
/// race for the same address.
pub type SharedLeaseTable = Arc<Mutex<LeaseTable>>;

#[derive(Debug)]
pub struct LeaseTable {
    range: Ipv4Network,
    first: u32,
    capacity: u64,
    next_offset: u64,
    leases: HashMap<Vec<u8>, Ipv4Addr>,
}

impl LeaseTable {
    /// Empty table allocating from `range`.
    ///
    /// For `10.0.1.100/24` the first lease is `10.0.1.100` and the last
    /// is `10.0.1.255`.
    pub fn new(range: Ipv4Network) -> Self {
        let first = u32::from(range.ip());
        let last = u32::from(range.broadcast());
        Self {
            range,
            first,
            capacity: u64::from(last - first) + 1,
            next_offset: 0,
            leases: HashMap::new(),
        }
    }

    /// Wrap the table for sharing across workers
    pub fn shared(self) -> SharedLeaseTable {
        Arc::new(Mutex::new(self))
    }

    /// Address for `hardware_address`, allocating one on first sight
    pub fn allocate(&mut self, hardware_address: &[u8]) -> Result<Ipv4Addr, LeaseError> {
        if let Some(addr) = self.leases.get(hardware_address) {
            return Ok(*addr);
        }

        if self.next_offset >= self.capacity {
            return Err(LeaseError::Exhausted {
                range: self.range,
                capacity: self.capacity,
            });
        }

        // next_offset < capacity, so first + next_offset <= broadcast
        let addr = Ipv4Addr::from(self.first + self.next_offset as u32);
        self.next_offset += 1;
        self.leases.insert(hardware_address.to_vec(), addr);
        Ok(addr)
    }

    /// Existing lease, if any
    pub fn get(&self, hardware_address: &[u8]) -> Option<Ipv4Addr> {
        self.leases.get(hardware_address).copied()
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    /// Number of addresses the range can hand out
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn range(&self) -> Ipv4Network {
        self.range
    }
}
