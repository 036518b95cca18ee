//! Height-balanced (AVL) search tree backend.

use crate::{Cursor, KeyComparator, NaturalOrder, RegistrationStore, StoreError};
use std::cmp::Ordering;
use std::fmt;

type Link<V> = Option<Box<Node<V>>>;

struct Node<V> {
    key: u64,
    /// Insertion stamp, unique for the lifetime of the store.
    stamp: u64,
    value: V,
    height: u32,
    left: Link<V>,
    right: Link<V>,
}

impl<V> Node<V> {
    fn leaf(key: u64, stamp: u64, value: V) -> Box<Self> {
        Box::new(Self {
            key,
            stamp,
            value,
            height: 1,
            left: None,
            right: None,
        })
    }

    fn update_height(&mut self) {
        self.height = 1 + height(&self.left).max(height(&self.right));
    }

    fn balance_factor(&self) -> i64 {
        i64::from(height(&self.left)) - i64::from(height(&self.right))
    }
}

fn height<V>(link: &Link<V>) -> u32 {
    link.as_ref().map_or(0, |node| node.height)
}

fn rotate_right<V>(mut node: Box<Node<V>>) -> Box<Node<V>> {
    let Some(mut pivot) = node.left.take() else {
        return node;
    };
    node.left = pivot.right.take();
    node.update_height();
    pivot.right = Some(node);
    pivot.update_height();
    pivot
}

fn rotate_left<V>(mut node: Box<Node<V>>) -> Box<Node<V>> {
    let Some(mut pivot) = node.right.take() else {
        return node;
    };
    node.right = pivot.left.take();
    node.update_height();
    pivot.left = Some(node);
    pivot.update_height();
    pivot
}

/// Restore the AVL property at `link`, assuming both subtrees satisfy it.
fn rebalance<V>(link: &mut Link<V>) {
    let Some(mut node) = link.take() else {
        return;
    };
    node.update_height();
    let balance = node.balance_factor();

    if balance > 1 {
        if node.left.as_ref().is_some_and(|left| left.balance_factor() < 0) {
            node.left = node.left.take().map(rotate_left);
        }
        node = rotate_right(node);
    } else if balance < -1 {
        if node.right.as_ref().is_some_and(|right| right.balance_factor() > 0) {
            node.right = node.right.take().map(rotate_right);
        }
        node = rotate_left(node);
    }

    *link = Some(node);
}

fn insert_node<V, C: KeyComparator>(
    link: &mut Link<V>,
    node: Box<Node<V>>,
    comparator: &C,
) -> Result<(), Box<Node<V>>> {
    match link {
        None => {
            *link = Some(node);
            Ok(())
        }
        Some(root) => {
            match comparator.compare(node.key, root.key) {
                Ordering::Less => insert_node(&mut root.left, node, comparator)?,
                Ordering::Greater => insert_node(&mut root.right, node, comparator)?,
                Ordering::Equal => return Err(node),
            }
            rebalance(link);
            Ok(())
        }
    }
}

/// Detach the minimum node of the subtree at `link`.
fn take_min<V>(link: &mut Link<V>) -> Option<Box<Node<V>>> {
    let node = link.as_mut()?;
    if node.left.is_some() {
        let min = take_min(&mut node.left);
        rebalance(link);
        min
    } else {
        let mut min = link.take()?;
        *link = min.right.take();
        Some(min)
    }
}

fn remove_node<V, C: KeyComparator>(
    link: &mut Link<V>,
    key: u64,
    comparator: &C,
) -> Option<Box<Node<V>>> {
    let node = link.as_mut()?;
    let removed = match comparator.compare(key, node.key) {
        Ordering::Less => remove_node(&mut node.left, key, comparator),
        Ordering::Greater => remove_node(&mut node.right, key, comparator),
        Ordering::Equal => {
            let mut target = link.take()?;
            *link = match (target.left.take(), target.right.take()) {
                (None, None) => None,
                (Some(child), None) | (None, Some(child)) => Some(child),
                (Some(left), Some(right)) => {
                    let mut right = Some(right);
                    match take_min(&mut right) {
                        Some(mut successor) => {
                            successor.left = Some(left);
                            successor.right = right;
                            Some(successor)
                        }
                        None => Some(left),
                    }
                }
            };
            Some(target)
        }
    };

    if removed.is_some() {
        rebalance(link);
    }
    removed
}

/// AVL tree keyed by `u64` under an injectable ordering.
///
/// Cursors carry the key plus the insertion stamp of the node they were
/// taken from, so a cursor outliving its entry never aliases a later entry
/// inserted under the same key.
pub struct AvlStore<V, C = NaturalOrder> {
    root: Link<V>,
    len: usize,
    next_stamp: u64,
    comparator: C,
}

impl<V> AvlStore<V, NaturalOrder> {
    pub fn new() -> Self {
        Self::with_comparator(NaturalOrder)
    }
}

impl<V> Default for AvlStore<V, NaturalOrder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, C: KeyComparator> AvlStore<V, C> {
    pub fn with_comparator(comparator: C) -> Self {
        Self {
            root: None,
            len: 0,
            next_stamp: 0,
            comparator,
        }
    }

    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    /// Height of the tree; zero when empty.
    pub fn height(&self) -> u32 {
        height(&self.root)
    }

    /// Exact-key lookup. A comparator may rank distinct keys equal; such a
    /// node is a miss, never a match.
    fn node(&self, key: u64) -> Option<&Node<V>> {
        let mut link = self.root.as_deref();
        while let Some(node) = link {
            match self.comparator.compare(key, node.key) {
                Ordering::Equal => return (node.key == key).then_some(node),
                Ordering::Less => link = node.left.as_deref(),
                Ordering::Greater => link = node.right.as_deref(),
            }
        }
        None
    }

    fn node_mut(&mut self, key: u64) -> Option<&mut Node<V>> {
        let comparator = &self.comparator;
        let mut link = self.root.as_deref_mut();
        while let Some(node) = link {
            match comparator.compare(key, node.key) {
                Ordering::Equal => return (node.key == key).then_some(node),
                Ordering::Less => link = node.left.as_deref_mut(),
                Ordering::Greater => link = node.right.as_deref_mut(),
            }
        }
        None
    }
}

impl<V, C: KeyComparator> RegistrationStore<V> for AvlStore<V, C> {
    fn find(&self, key: u64) -> Option<Cursor> {
        self.node(key).map(|node| Cursor {
            slot: node.key,
            generation: node.stamp,
        })
    }

    fn insert(&mut self, key: u64, value: V) -> Result<Cursor, StoreError<V>> {
        let stamp = self.next_stamp;
        let leaf = Node::leaf(key, stamp, value);
        if let Err(rejected) = insert_node(&mut self.root, leaf, &self.comparator) {
            return Err(StoreError::DuplicateKey {
                key,
                value: rejected.value,
            });
        }
        self.next_stamp = self.next_stamp.wrapping_add(1);
        self.len += 1;
        Ok(Cursor {
            slot: key,
            generation: stamp,
        })
    }

    fn erase(&mut self, cursor: Cursor) -> Option<(u64, V)> {
        if self.node(cursor.slot)?.stamp != cursor.generation {
            return None;
        }
        let node = remove_node(&mut self.root, cursor.slot, &self.comparator)?;
        self.len -= 1;
        let Node { key, value, .. } = *node;
        Some((key, value))
    }

    fn key_value(&self, cursor: Cursor) -> Option<(u64, &V)> {
        self.node(cursor.slot)
            .filter(|node| node.stamp == cursor.generation)
            .map(|node| (node.key, &node.value))
    }

    fn value_mut(&mut self, cursor: Cursor) -> Option<&mut V> {
        self.node_mut(cursor.slot)
            .filter(|node| node.stamp == cursor.generation)
            .map(|node| &mut node.value)
    }

    fn len(&self) -> usize {
        self.len
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (u64, &V)> + '_> {
        Box::new(Iter::new(self.root.as_deref()))
    }

    fn destroy(self) {
        tracing::trace!(remaining = self.len, "destroying avl store");
    }
}

impl<V: fmt::Debug, C> fmt::Debug for AvlStore<V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(Iter::new(self.root.as_deref()))
            .finish()
    }
}

/// In-order walk over an [`AvlStore`].
pub struct Iter<'a, V> {
    stack: Vec<&'a Node<V>>,
}

impl<'a, V> Iter<'a, V> {
    fn new(root: Option<&'a Node<V>>) -> Self {
        let mut iter = Self { stack: Vec::new() };
        iter.push_left(root);
        iter
    }

    fn push_left(&mut self, mut link: Option<&'a Node<V>>) {
        while let Some(node) = link {
            self.stack.push(node);
            link = node.left.as_deref();
        }
    }
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (u64, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left(node.right.as_deref());
        Some((node.key, &node.value))
    }
}
