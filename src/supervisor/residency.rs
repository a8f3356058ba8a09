use std::{collections::HashMap, fmt, time::Duration, time::Instant};

use crate::actors::ConnectionId;

// -----------------------------------------------------------------------------
// ----- Residency -------------------------------------------------------------

/// Which pool a connection currently rests in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Residency {
    /// Still handshaking.
    Created,
    Reserved,
    Idle,
    /// Inside a command cycle.
    Active,
    /// Ended. Nothing leaves this pool except by being reaped.
    Terminal,
}

impl Residency {
    pub const ALL: [Residency; 5] = [
        Residency::Created,
        Residency::Reserved,
        Residency::Idle,
        Residency::Active,
        Residency::Terminal,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Residency::Created => "created",
            Residency::Reserved => "reserved",
            Residency::Idle => "idle",
            Residency::Active => "active",
            Residency::Terminal => "terminal",
        }
    }
}

impl fmt::Display for Residency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -----------------------------------------------------------------------------
// ----- PoolHint --------------------------------------------------------------

/// Pool a new connection should live in once it is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PoolHint {
    Reserved,
    #[default]
    Idle,
}

impl PoolHint {
    pub fn home(self) -> Residency {
        match self {
            PoolHint::Reserved => Residency::Reserved,
            PoolHint::Idle => Residency::Idle,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Migration -------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub from: Residency,
    pub to: Residency,
    /// How long the connection rested in `from`.
    pub resident: Duration,
}

// -----------------------------------------------------------------------------
// ----- ResidencyLists --------------------------------------------------------

#[derive(Debug, Clone)]
struct Node {
    pool: Residency,
    since: Instant,
    prev: Option<ConnectionId>,
    next: Option<ConnectionId>,
}

/// Five intrusive doubly-linked lists over one node table. Each connection
/// id sits in exactly one list; newest arrivals are at the head.
#[derive(Debug, Default)]
pub struct ResidencyLists {
    nodes: HashMap<ConnectionId, Node>,
    heads: [Option<ConnectionId>; 5],
    lens: [usize; 5],
}

// -----------------------------------------------------------------------------
// ----- ResidencyLists: Public ------------------------------------------------

impl ResidencyLists {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if `id` is already placed somewhere.
    pub fn insert(&mut self, id: ConnectionId, pool: Residency, now: Instant) -> bool {
        if self.nodes.contains_key(&id) {
            return false;
        }
        self.nodes.insert(
            id,
            Node {
                pool,
                since: now,
                prev: None,
                next: None,
            },
        );
        self.link_front(id, pool);
        true
    }

    /// Move `id` to `to`. `None` when `id` is unknown, already there, or
    /// resting in the terminal pool.
    pub fn migrate(&mut self, id: ConnectionId, to: Residency, now: Instant) -> Option<Migration> {
        let node = self.nodes.get(&id)?;
        let from = node.pool;
        if from == to || from == Residency::Terminal {
            return None;
        }
        let resident = now.saturating_duration_since(node.since);

        self.unlink(id);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.pool = to;
            node.since = now;
        }
        self.link_front(id, to);

        Some(Migration { from, to, resident })
    }

    pub fn remove(&mut self, id: ConnectionId, now: Instant) -> Option<Migration> {
        let node = self.nodes.get(&id)?;
        let migration = Migration {
            from: node.pool,
            to: node.pool,
            resident: now.saturating_duration_since(node.since),
        };
        self.unlink(id);
        self.nodes.remove(&id);
        Some(migration)
    }

    pub fn pool_of(&self, id: ConnectionId) -> Option<Residency> {
        self.nodes.get(&id).map(|n| n.pool)
    }

    pub fn since(&self, id: ConnectionId) -> Option<Instant> {
        self.nodes.get(&id).map(|n| n.since)
    }

    pub fn len(&self, pool: Residency) -> usize {
        self.lens[pool.index()]
    }

    pub fn total(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Members of `pool`, newest first.
    pub fn members(&self, pool: Residency) -> Vec<ConnectionId> {
        let mut out = Vec::with_capacity(self.len(pool));
        let mut cursor = self.heads[pool.index()];
        while let Some(id) = cursor {
            out.push(id);
            cursor = self.nodes.get(&id).and_then(|n| n.next);
        }
        out
    }

    /// Walk every list and verify links, lengths and pool tags agree.
    pub fn check_consistency(&self) -> Result<(), String> {
        let mut seen = 0;
        for pool in Residency::ALL {
            let mut prev = None;
            let mut count = 0;
            let mut cursor = self.heads[pool.index()];

            while let Some(id) = cursor {
                let node = self
                    .nodes
                    .get(&id)
                    .ok_or_else(|| format!("{pool} list links to unknown id {id}"))?;
                if node.pool != pool {
                    return Err(format!("{id} is tagged {} but linked in {pool}", node.pool));
                }
                if node.prev != prev {
                    return Err(format!("{id} has a broken back link in {pool}"));
                }
                count += 1;
                if count > self.nodes.len() {
                    return Err(format!("{pool} list has a cycle"));
                }
                prev = Some(id);
                cursor = node.next;
            }

            if count != self.lens[pool.index()] {
                return Err(format!(
                    "{pool} length is {} but {count} nodes are linked",
                    self.lens[pool.index()]
                ));
            }
            seen += count;
        }

        if seen != self.nodes.len() {
            return Err(format!(
                "{} nodes known but {seen} are linked",
                self.nodes.len()
            ));
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// ----- ResidencyLists: Private -----------------------------------------------

impl ResidencyLists {
    fn link_front(&mut self, id: ConnectionId, pool: Residency) {
        let slot = pool.index();
        let old_head = self.heads[slot];

        if let Some(node) = self.nodes.get_mut(&id) {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(head) = old_head.and_then(|h| self.nodes.get_mut(&h)) {
            head.prev = Some(id);
        }
        self.heads[slot] = Some(id);
        self.lens[slot] += 1;
    }

    fn unlink(&mut self, id: ConnectionId) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        let (prev, next, slot) = (node.prev, node.next, node.pool.index());

        match prev.and_then(|p| self.nodes.get_mut(&p)) {
            Some(p) => p.next = next,
            None => self.heads[slot] = next,
        }
        if let Some(n) = next.and_then(|n| self.nodes.get_mut(&n)) {
            n.prev = prev;
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.prev = None;
            node.next = None;
        }
        self.lens[slot] -= 1;
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> ConnectionId {
        ConnectionId::new(n)
    }

    #[test]
    fn insert_places_newest_first() {
        let mut lists = ResidencyLists::new();
        let now = Instant::now();
        assert!(lists.insert(id(1), Residency::Created, now));
        assert!(lists.insert(id(2), Residency::Created, now));
        assert!(!lists.insert(id(1), Residency::Idle, now));

        assert_eq!(lists.members(Residency::Created), vec![id(2), id(1)]);
        assert_eq!(lists.len(Residency::Created), 2);
        lists.check_consistency().unwrap();
    }

    #[test]
    fn migrate_moves_between_lists_and_measures_residence() {
        let mut lists = ResidencyLists::new();
        let t0 = Instant::now();
        lists.insert(id(1), Residency::Created, t0);
        lists.insert(id(2), Residency::Created, t0);
        lists.insert(id(3), Residency::Created, t0);

        let t1 = t0 + Duration::from_millis(40);
        let m = lists.migrate(id(2), Residency::Idle, t1).unwrap();
        assert_eq!(m.from, Residency::Created);
        assert_eq!(m.to, Residency::Idle);
        assert_eq!(m.resident, Duration::from_millis(40));

        assert_eq!(lists.members(Residency::Created), vec![id(3), id(1)]);
        assert_eq!(lists.members(Residency::Idle), vec![id(2)]);
        assert_eq!(lists.pool_of(id(2)), Some(Residency::Idle));
        assert_eq!(lists.since(id(2)), Some(t1));
        lists.check_consistency().unwrap();
    }

    #[test]
    fn migrate_to_same_pool_is_a_no_op() {
        let mut lists = ResidencyLists::new();
        let now = Instant::now();
        lists.insert(id(1), Residency::Idle, now);
        assert_eq!(lists.migrate(id(1), Residency::Idle, now), None);
        assert_eq!(lists.migrate(id(9), Residency::Idle, now), None);
    }

    #[test]
    fn terminal_is_absorbing() {
        let mut lists = ResidencyLists::new();
        let now = Instant::now();
        lists.insert(id(1), Residency::Active, now);
        assert!(lists.migrate(id(1), Residency::Terminal, now).is_some());
        assert_eq!(lists.migrate(id(1), Residency::Idle, now), None);
        assert_eq!(lists.pool_of(id(1)), Some(Residency::Terminal));
    }

    #[test]
    fn remove_unlinks_from_middle_head_and_tail() {
        let mut lists = ResidencyLists::new();
        let now = Instant::now();
        for n in 1..=4 {
            lists.insert(id(n), Residency::Terminal, now);
        }
        // list is 4, 3, 2, 1
        lists.remove(id(3), now).unwrap();
        lists.check_consistency().unwrap();
        lists.remove(id(4), now).unwrap();
        lists.check_consistency().unwrap();
        lists.remove(id(1), now).unwrap();
        lists.check_consistency().unwrap();

        assert_eq!(lists.members(Residency::Terminal), vec![id(2)]);
        assert_eq!(lists.total(), 1);
        assert!(lists.remove(id(3), now).is_none());
    }

    #[test]
    fn consistency_holds_under_churn() {
        let mut lists = ResidencyLists::new();
        let now = Instant::now();
        for n in 0..20 {
            lists.insert(id(n), Residency::Created, now);
        }
        for n in 0..20 {
            let to = match n % 3 {
                0 => Residency::Idle,
                1 => Residency::Reserved,
                _ => Residency::Active,
            };
            lists.migrate(id(n), to, now);
        }
        for n in (0..20).step_by(2) {
            lists.migrate(id(n), Residency::Terminal, now);
        }
        lists.check_consistency().unwrap();

        let total: usize = Residency::ALL.iter().map(|p| lists.len(*p)).sum();
        assert_eq!(total, 20);
        assert_eq!(lists.len(Residency::Terminal), 10);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
