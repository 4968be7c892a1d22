//! A dictionary tuned for small symbol tables.
//!
//! [`SmallMap`] is an AVL tree ordered by the keys' hash codes. Keys whose
//! hashes collide share a tree node and are kept in a short chain hanging off
//! it, so the tree itself never has two nodes with the same hash. Compared to
//! a hash table this never rehashes and allocates nothing until the first
//! insertion, which is what we want for the many tiny scopes a binder creates.
//!
//! Nodes live in an arena owned by the map and refer to each other by index.
//! There is no removal: symbol tables are filled once and then only read.
use std::{
    borrow::Borrow,
    collections::hash_map::RandomState,
    fmt,
    hash::{BuildHasher, Hash},
    ops::Index,
};

use crate::{
    error::{Error, Result},
    metrics::increment,
};

type NodeId = usize;
type EntryId = usize;

/// A node of the AVL tree. All the keys of its chain have the same hash.
#[derive(Clone, Debug)]
struct TreeNode {
    hash: u64,
    /// First entry of the collision chain; never empty.
    head: EntryId,
    left: Option<NodeId>,
    right: Option<NodeId>,
    /// Height of the left subtree minus height of the right subtree.
    balance: i8,
}

#[derive(Clone, Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    next: Option<EntryId>,
}

/// A map from `K` to `V` backed by an AVL tree over hash codes.
///
/// Iteration visits the tree in preorder and each collision chain in order;
/// in particular it is *not* sorted by key.
///
/// # Examples
///
/// ```rust
/// # use compiler_collections::SmallMap;
/// let mut scope = SmallMap::new();
/// scope.add("x", 1).unwrap();
/// scope.add("y", 2).unwrap();
/// assert!(scope.add("x", 3).is_err());
/// scope.insert("x", 3);
/// assert_eq!(scope.get("x"), Some(&3));
/// ```
#[derive(Clone)]
pub struct SmallMap<K, V, S = RandomState> {
    nodes: Vec<TreeNode>,
    entries: Vec<Entry<K, V>>,
    root: Option<NodeId>,
    hasher: S,
}

impl<K, V> SmallMap<K, V, RandomState> {
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K, V, S: Default> Default for SmallMap<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> SmallMap<K, V, S> {
    /// Creates an empty map that hashes its keys with `hasher`.
    pub fn with_hasher(hasher: S) -> Self {
        SmallMap {
            nodes: Vec::new(),
            entries: Vec::new(),
            root: None,
            hasher,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries: tree preorder, then chain order.
    pub fn iter(&self) -> Iter<'_, K, V, S> {
        Iter {
            map: self,
            stack: self.root.into_iter().collect(),
            chain: None,
            remaining: self.len(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    /// Checks that the tree is a height-balanced search tree over hash codes
    /// and that every cached balance factor is right. Panics otherwise.
    pub fn assert_balanced(&self) {
        fn height<K, V, S>(
            map: &SmallMap<K, V, S>,
            node: Option<NodeId>,
            lo: Option<u64>,
            hi: Option<u64>,
        ) -> i32 {
            let Some(id) = node else {
                return 0;
            };
            let node = &map.nodes[id];
            assert!(lo.map_or(true, |lo| lo < node.hash), "tree is not ordered by hash");
            assert!(hi.map_or(true, |hi| node.hash < hi), "tree is not ordered by hash");
            let left = height(map, node.left, lo, Some(node.hash));
            let right = height(map, node.right, Some(node.hash), hi);
            assert!((left - right).abs() <= 1, "node is out of balance");
            assert_eq!(i32::from(node.balance), left - right, "stale balance factor");
            1 + left.max(right)
        }

        height(self, self.root, None, None);
    }

    fn chain(&self, node: NodeId) -> impl Iterator<Item = EntryId> + '_ {
        std::iter::successors(Some(self.nodes[node].head), |&e| self.entries[e].next)
    }

    fn push_entry(&mut self, key: K, value: V, next: Option<EntryId>) -> EntryId {
        self.entries.push(Entry { key, value, next });
        self.entries.len() - 1
    }

    fn push_node(&mut self, hash: u64, key: K, value: V) -> NodeId {
        let head = self.push_entry(key, value, None);
        self.nodes.push(TreeNode {
            hash,
            head,
            left: None,
            right: None,
            balance: 0,
        });
        self.nodes.len() - 1
    }

    fn rotate_right(&mut self, a: NodeId) -> NodeId {
        let b = self.nodes[a].left.expect("left-heavy node has a left child");
        self.nodes[a].left = self.nodes[b].right;
        self.nodes[b].right = Some(a);
        self.nodes[a].balance = 0;
        self.nodes[b].balance = 0;
        b
    }

    fn rotate_left(&mut self, a: NodeId) -> NodeId {
        let b = self.nodes[a].right.expect("right-heavy node has a right child");
        self.nodes[a].right = self.nodes[b].left;
        self.nodes[b].left = Some(a);
        self.nodes[a].balance = 0;
        self.nodes[b].balance = 0;
        b
    }

    fn rotate_left_right(&mut self, a: NodeId) -> NodeId {
        let b = self.nodes[a].left.expect("left-heavy node has a left child");
        let c = self.nodes[b].right.expect("inner grandchild exists");
        self.nodes[b].right = self.nodes[c].left;
        self.nodes[a].left = self.nodes[c].right;
        self.nodes[c].left = Some(b);
        self.nodes[c].right = Some(a);
        let (b_balance, a_balance) = match self.nodes[c].balance {
            1 => (0, -1),
            -1 => (1, 0),
            _ => (0, 0),
        };
        self.nodes[b].balance = b_balance;
        self.nodes[a].balance = a_balance;
        self.nodes[c].balance = 0;
        c
    }

    fn rotate_right_left(&mut self, a: NodeId) -> NodeId {
        let b = self.nodes[a].right.expect("right-heavy node has a right child");
        let c = self.nodes[b].left.expect("inner grandchild exists");
        self.nodes[b].left = self.nodes[c].right;
        self.nodes[a].right = self.nodes[c].left;
        self.nodes[c].right = Some(b);
        self.nodes[c].left = Some(a);
        let (a_balance, b_balance) = match self.nodes[c].balance {
            1 => (0, -1),
            -1 => (1, 0),
            _ => (0, 0),
        };
        self.nodes[a].balance = a_balance;
        self.nodes[b].balance = b_balance;
        self.nodes[c].balance = 0;
        c
    }
}

impl<K, V, S> SmallMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn find_node(&self, hash: u64) -> Option<NodeId> {
        let mut current = self.root;
        while let Some(id) = current {
            let node = &self.nodes[id];
            current = match hash.cmp(&node.hash) {
                std::cmp::Ordering::Equal => return Some(id),
                std::cmp::Ordering::Less => node.left,
                std::cmp::Ordering::Greater => node.right,
            };
        }
        None
    }

    fn find_entry<Q>(&self, key: &Q) -> Option<EntryId>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let node = self.find_node(self.hasher.hash_one(key))?;
        self.chain(node)
            .find(|&e| <K as Borrow<Q>>::borrow(&self.entries[e].key) == key)
    }

    /// Looks up the value associated with `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_entry(key).map(|e| &self.entries[e].value)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_entry(key).map(|e| &mut self.entries[e].value)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_entry(key).is_some()
    }

    /// Adds a new entry. Adding a key that is already present is a bug in the
    /// caller and is reported as [`Error::DuplicateKey`]; the map is left
    /// unchanged in that case.
    pub fn add(&mut self, key: K, value: V) -> Result<()> {
        match self.insert_new(key, value) {
            None => Ok(()),
            Some(_) => Err(Error::DuplicateKey),
        }
    }

    /// Inserts an entry, replacing the value of an existing one.
    pub fn insert(&mut self, key: K, value: V) {
        if let Some((existing, value)) = self.insert_new(key, value) {
            self.entries[existing].value = value;
        }
    }

    /// Inserts an entry if `key` isn't present yet. Otherwise the map is left
    /// unchanged, and the existing entry is returned along with `value`.
    fn insert_new(&mut self, key: K, value: V) -> Option<(EntryId, V)> {
        let hash = self.hasher.hash_one(&key);
        let Some(root) = self.root else {
            self.root = Some(self.push_node(hash, key, value));
            return None;
        };

        // The lowest ancestor with a nonzero balance (the "prime node") is the
        // only node that may need a rotation after the insertion.
        let mut prime = root;
        let mut prime_parent: Option<NodeId> = None;
        let mut parent: Option<NodeId> = None;
        let mut current = root;

        let inserted = loop {
            let node = &self.nodes[current];
            if hash == node.hash {
                return self.insert_into_chain(current, key, value);
            }
            if node.balance != 0 {
                prime = current;
                prime_parent = parent;
            }
            let go_left = hash < node.hash;
            let next = if go_left { node.left } else { node.right };
            parent = Some(current);
            match next {
                Some(next) => current = next,
                None => {
                    let new = self.push_node(hash, key, value);
                    if go_left {
                        self.nodes[current].left = Some(new);
                    } else {
                        self.nodes[current].right = Some(new);
                    }
                    break new;
                }
            }
        };

        // Everything strictly between the prime node and the new leaf had a
        // zero balance and now leans towards the new leaf.
        let mut node = prime;
        while node != inserted {
            let current = &mut self.nodes[node];
            let next = if hash < current.hash {
                current.balance += 1;
                current.left
            } else {
                current.balance -= 1;
                current.right
            };
            node = next.expect("the new node is below the prime node");
        }

        let rotated = match self.nodes[prime].balance {
            2 => {
                let left = self.nodes[prime].left.expect("left-heavy node has a left child");
                if self.nodes[left].balance == 1 {
                    self.rotate_right(prime)
                } else {
                    self.rotate_left_right(prime)
                }
            }
            -2 => {
                let right = self.nodes[prime].right.expect("right-heavy node has a right child");
                if self.nodes[right].balance == -1 {
                    self.rotate_left(prime)
                } else {
                    self.rotate_right_left(prime)
                }
            }
            _ => return None,
        };
        increment!("SmallMap::rotation");

        match prime_parent {
            None => self.root = Some(rotated),
            Some(p) => {
                if self.nodes[p].left == Some(prime) {
                    self.nodes[p].left = Some(rotated);
                } else {
                    self.nodes[p].right = Some(rotated);
                }
            }
        }
        None
    }

    fn insert_into_chain(&mut self, node: NodeId, key: K, value: V) -> Option<(EntryId, V)> {
        let existing = self.chain(node).find(|&e| self.entries[e].key == key);
        if let Some(existing) = existing {
            return Some((existing, value));
        }
        increment!("SmallMap::hash_collision");
        // New colliding keys go right after the head of the chain.
        let head = self.nodes[node].head;
        let after_head = self.entries[head].next;
        let new = self.push_entry(key, value, after_head);
        self.entries[head].next = Some(new);
        None
    }
}

impl<K, V, S, Q> Index<&Q> for SmallMap<K, V, S>
where
    K: Hash + Eq + Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    S: BuildHasher,
{
    type Output = V;

    fn index(&self, key: &Q) -> &Self::Output {
        self.get(key).expect("key not present in the map")
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for SmallMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> FromIterator<(K, V)> for SmallMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ret = SmallMap::default();
        ret.extend(iter);
        ret
    }
}

impl<K, V, S> Extend<(K, V)> for SmallMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a SmallMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// The iterator returned by [`SmallMap::iter`].
pub struct Iter<'a, K, V, S> {
    map: &'a SmallMap<K, V, S>,
    /// Tree nodes still to visit, in preorder.
    stack: Vec<NodeId>,
    /// The next entry of the chain we're walking, if any.
    chain: Option<EntryId>,
    remaining: usize,
}

impl<'a, K, V, S> Iterator for Iter<'a, K, V, S> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.chain {
            Some(entry) => entry,
            None => {
                let node = &self.map.nodes[self.stack.pop()?];
                self.stack.extend(node.right);
                self.stack.extend(node.left);
                node.head
            }
        };
        let entry = &self.map.entries[entry];
        self.chain = entry.next;
        self.remaining -= 1;
        Some((&entry.key, &entry.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V, S> ExactSizeIterator for Iter<'_, K, V, S> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::{BuildHasherDefault, Hasher};

    /// Hashes every key into one of a few buckets, to force collisions.
    #[derive(Default)]
    struct CollidingHasher(u64);

    impl Hasher for CollidingHasher {
        fn finish(&self) -> u64 {
            self.0 % 5
        }

        fn write(&mut self, bytes: &[u8]) {
            for b in bytes {
                self.0 = self.0.wrapping_mul(31).wrapping_add(u64::from(*b));
            }
        }
    }

    type Colliding = BuildHasherDefault<CollidingHasher>;

    #[test]
    fn ascending_and_descending_inserts_stay_balanced() {
        let mut map = SmallMap::new();
        for i in 0..500u32 {
            map.add(i, i * 2).unwrap();
            map.assert_balanced();
        }
        let mut map = SmallMap::new();
        for i in (0..500u32).rev() {
            map.add(i, i * 2).unwrap();
            map.assert_balanced();
        }
        for i in 0..500u32 {
            assert_eq!(map.get(&i), Some(&(i * 2)));
        }
        assert_eq!(map.get(&500), None);
        assert_eq!(map.len(), 500);
    }

    #[test]
    fn duplicate_add_fails() {
        let mut map = SmallMap::new();
        map.add("a".to_owned(), 1).unwrap();
        assert_eq!(map.add("a".to_owned(), 2), Err(Error::DuplicateKey));
        assert_eq!(map["a"], 1);
        map.insert("a".to_owned(), 2);
        assert_eq!(map["a"], 2);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn collisions_chain() {
        let mut map: SmallMap<u32, u32, Colliding> = SmallMap::default();
        for i in 0..40 {
            map.add(i, i + 1).unwrap();
            map.assert_balanced();
        }
        // At most five distinct hashes, so at most five tree nodes.
        assert!(map.nodes.len() <= 5);
        assert_eq!(map.len(), 40);
        for i in 0..40 {
            assert_eq!(map.get(&i), Some(&(i + 1)));
        }
        assert!(map.add(17, 0).is_err());
        *map.get_mut(&17).unwrap() = 0;
        assert_eq!(map[&17], 0);

        let mut keys: Vec<_> = map.keys().copied().collect();
        keys.sort();
        assert_eq!(keys, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn upsert_within_collision_chain() {
        let mut map: SmallMap<u32, u32, Colliding> = SmallMap::default();
        for i in 0..40 {
            map.insert(i, i);
        }
        // Every key now shares its hash with several others.
        for i in 0..40 {
            map.insert(i, i + 100);
            map.assert_balanced();
        }
        assert_eq!(map.len(), 40);
        for i in 0..40 {
            assert_eq!(map[&i], i + 100);
        }
        assert_eq!(map.add(3, 0), Err(Error::DuplicateKey));
        assert_eq!(map[&3], 103);
    }

    #[test]
    fn iteration_is_preorder_then_chain() {
        let mut map: SmallMap<u32, (), Colliding> = SmallMap::default();
        for i in 0..12 {
            map.add(i, ()).unwrap();
        }
        let iter = map.iter();
        assert_eq!(iter.len(), 12);
        let hashes: Vec<u64> = map.keys().map(|k| map.hasher.hash_one(k)).collect();
        // Preorder visits the root first, and chains are contiguous.
        let root_hash = map.nodes[map.root.unwrap()].hash;
        assert_eq!(hashes[0], root_hash);
        let mut seen = Vec::new();
        for h in hashes {
            if seen.last() != Some(&h) {
                assert!(!seen.contains(&h), "chain for hash {h} is split");
                seen.push(h);
            }
        }
    }

    #[test]
    fn empty_map_allocates_nothing() {
        let map: SmallMap<String, u32> = SmallMap::new();
        assert!(map.is_empty());
        assert_eq!(map.nodes.capacity(), 0);
        assert_eq!(map.get("x"), None);
        assert_eq!(map.iter().count(), 0);
        map.assert_balanced();
    }
}
