//! Allowlist seam for restricting who may bid on a lot.
//!
//! A lot names an allowlist by address in its routing. The house resolves the
//! address through an [`AllowlistRegistry`]; an address with nothing
//! registered behind it admits nobody.

use std::collections::{HashMap, HashSet};

use empa_types::{Address, LotId};

/// Decides whether a bidder may bid on a lot.
pub trait Allowlist: Send + Sync {
    fn is_allowed(&self, lot_id: LotId, bidder: &Address, proof: &[u8]) -> bool;
}

/// Allowlists registered with the house, keyed by address.
#[derive(Default)]
pub struct AllowlistRegistry {
    lists: HashMap<Address, Box<dyn Allowlist>>,
}

impl AllowlistRegistry {
    /// Register (or replace) the allowlist behind `address`.
    pub fn register(&mut self, address: Address, allowlist: Box<dyn Allowlist>) {
        self.lists.insert(address, allowlist);
    }

    /// Check a bidder against the allowlist at `address`.
    pub fn is_allowed(
        &self,
        address: &Address,
        lot_id: LotId,
        bidder: &Address,
        proof: &[u8],
    ) -> bool {
        self.lists
            .get(address)
            .is_some_and(|list| list.is_allowed(lot_id, bidder, proof))
    }
}

/// Fixed set of addresses admitted to every lot using it. Proofs are ignored.
#[derive(Clone, Debug, Default)]
pub struct AddressAllowlist {
    allowed: HashSet<Address>,
}

impl AddressAllowlist {
    pub fn new(allowed: impl IntoIterator<Item = Address>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }
}

impl Allowlist for AddressAllowlist {
    fn is_allowed(&self, _lot_id: LotId, bidder: &Address, _proof: &[u8]) -> bool {
        self.allowed.contains(bidder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let list_address = [0x11; 32];
        let mut registry = AllowlistRegistry::default();
        registry.register(list_address, Box::new(AddressAllowlist::new([[1u8; 32]])));

        assert!(registry.is_allowed(&list_address, 1, &[1u8; 32], &[]));
        assert!(!registry.is_allowed(&list_address, 1, &[2u8; 32], &[]));
        assert!(!registry.is_allowed(&[0x22; 32], 1, &[1u8; 32], &[]));
    }
}
