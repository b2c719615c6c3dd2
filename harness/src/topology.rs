//! Round-robin assignment of rodeos consumers to ship emitters.

use crate::Error;
use std::collections::BTreeMap;

/// Identifies one ship within the node group.
pub type ShipId = usize;

/// Identifies one rodeos instance.
pub type RodeosId = usize;

/// Node id of the producer within the node group.
pub const PRODUCER_NODE_ID: usize = 0;

/// Lowest ship id: ships follow the producer in the node group numbering.
pub const FIRST_SHIP_ID: ShipId = 1;

/// Bidirectional mapping between rodeos instances and the ships they stream
/// from. Built once at cluster start and immutable afterwards: restarting a
/// rodeos preserves its assigned ship.
#[derive(Clone, Debug)]
pub struct ConnectionMap {
    forward: BTreeMap<RodeosId, ShipId>,
    reverse: BTreeMap<ShipId, Vec<RodeosId>>,
}

impl ConnectionMap {
    /// Assigns rodeos instance `i` to ship `(i mod S) + FIRST_SHIP_ID`,
    /// wrapping round-robin over ships in ascending id order when there are
    /// more rodeos instances than ships.
    pub fn assign(num_ships: usize, num_rodeos: usize) -> Result<Self, Error> {
        if num_ships == 0 {
            return Err(Error::Config("at least one ship is required".into()));
        }
        if num_rodeos == 0 {
            return Err(Error::Config("at least one rodeos is required".into()));
        }
        let mut forward = BTreeMap::new();
        let mut reverse: BTreeMap<ShipId, Vec<RodeosId>> = (FIRST_SHIP_ID
            ..FIRST_SHIP_ID + num_ships)
            .map(|ship| (ship, Vec::new()))
            .collect();
        for rodeos in 0..num_rodeos {
            let ship = FIRST_SHIP_ID + (rodeos % num_ships);
            forward.insert(rodeos, ship);
            reverse
                .get_mut(&ship)
                .ok_or(Error::UnknownNode { role: "ship", id: ship })?
                .push(rodeos);
        }
        Ok(Self { forward, reverse })
    }

    /// The ship the given rodeos streams from.
    pub fn ship_for(&self, rodeos: RodeosId) -> Option<ShipId> {
        self.forward.get(&rodeos).copied()
    }

    /// Every rodeos streaming from the given ship, in ascending id order.
    pub fn rodeos_on(&self, ship: ShipId) -> &[RodeosId] {
        self.reverse.get(&ship).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn ships(&self) -> impl Iterator<Item = ShipId> + '_ {
        self.reverse.keys().copied()
    }

    pub fn rodeos(&self) -> impl Iterator<Item = RodeosId> + '_ {
        self.forward.keys().copied()
    }

    pub fn num_ships(&self) -> usize {
        self.reverse.len()
    }

    pub fn num_rodeos(&self) -> usize {
        self.forward.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_round_robin_when_more_rodeos_than_ships() {
        let map = ConnectionMap::assign(2, 5).unwrap();
        let ships: Vec<ShipId> = (0..5).map(|r| map.ship_for(r).unwrap()).collect();
        assert_eq!(ships, vec![1, 2, 1, 2, 1]);
        assert_eq!(map.rodeos_on(1), &[0, 2, 4]);
        assert_eq!(map.rodeos_on(2), &[1, 3]);
    }

    #[test]
    fn forward_and_reverse_views_are_consistent() {
        let map = ConnectionMap::assign(3, 7).unwrap();
        assert_eq!(map.num_rodeos(), 7);
        assert_eq!(map.num_ships(), 3);
        // Every rodeos appears in forward exactly once and in exactly one
        // reverse set.
        let mut seen = Vec::new();
        for ship in map.ships() {
            for &rodeos in map.rodeos_on(ship) {
                assert_eq!(map.ship_for(rodeos), Some(ship));
                seen.push(rodeos);
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn extra_ships_carry_no_rodeos() {
        let map = ConnectionMap::assign(4, 2).unwrap();
        assert_eq!(map.rodeos_on(1), &[0]);
        assert_eq!(map.rodeos_on(2), &[1]);
        assert!(map.rodeos_on(3).is_empty());
        assert!(map.rodeos_on(4).is_empty());
    }

    #[test]
    fn rejects_empty_roles() {
        assert!(matches!(ConnectionMap::assign(0, 1), Err(Error::Config(_))));
        assert!(matches!(ConnectionMap::assign(1, 0), Err(Error::Config(_))));
    }
}
