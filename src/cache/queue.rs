//! Recency Queue Module
//!
//! Doubly linked list of cache entries ordered by recency of use.
//!
//! Nodes live in a slab (`Vec<Option<Node>>`) and link to each other by slot
//! index, so the hash index can hold a stable [`NodeId`] for O(1) promotion
//! and removal without any unsafe pointer juggling.
//!
//! - Head = most recently used
//! - Tail = least recently used

use super::CacheEntry;

/// Stable handle to a node in the queue.
pub type NodeId = usize;

#[derive(Debug)]
struct Node {
    entry: CacheEntry,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

// == Recency Queue ==
#[derive(Debug, Default)]
pub struct RecencyQueue {
    slots: Vec<Option<Node>>,
    free: Vec<NodeId>,
    head: Option<NodeId>,
    tail: Option<NodeId>,
    len: usize,
}

impl RecencyQueue {
    // == Constructor ==
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    // == Push Front ==
    /// Links a new entry at the head and returns its handle.
    pub fn push_front(&mut self, entry: CacheEntry) -> NodeId {
        let node = Node {
            entry,
            prev: None,
            next: self.head,
        };

        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id] = Some(node);
                id
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        if let Some(old_head) = self.head {
            self.node_mut(old_head).prev = Some(id);
        }
        self.head = Some(id);
        if self.tail.is_none() {
            self.tail = Some(id);
        }
        self.len += 1;
        id
    }

    // == Move To Front ==
    /// Promotes an already linked node to the head.
    pub fn move_to_front(&mut self, id: NodeId) {
        if self.head == Some(id) || !self.contains(id) {
            return;
        }

        self.unlink(id);

        let old_head = self.head;
        {
            let node = self.node_mut(id);
            node.prev = None;
            node.next = old_head;
        }
        if let Some(old_head) = old_head {
            self.node_mut(old_head).prev = Some(id);
        }
        self.head = Some(id);
        if self.tail.is_none() {
            self.tail = Some(id);
        }
    }

    // == Remove ==
    /// Unlinks a node and returns its entry, freeing the slot.
    pub fn remove(&mut self, id: NodeId) -> Option<CacheEntry> {
        if !self.contains(id) {
            return None;
        }

        self.unlink(id);
        let node = self.slots[id].take()?;
        self.free.push(id);
        self.len -= 1;
        Some(node.entry)
    }

    // == Pop Back ==
    /// Removes and returns the least recently used entry.
    pub fn pop_back(&mut self) -> Option<CacheEntry> {
        let tail = self.tail?;
        self.remove(tail)
    }

    pub fn get(&self, id: NodeId) -> Option<&CacheEntry> {
        self.slots.get(id)?.as_ref().map(|node| &node.entry)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut CacheEntry> {
        self.slots.get_mut(id)?.as_mut().map(|node| &mut node.entry)
    }

    pub fn head(&self) -> Option<NodeId> {
        self.head
    }

    pub fn tail(&self) -> Option<NodeId> {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drops every node and resets the slab.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Iterates entries from head (most recent) to tail (least recent).
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            queue: self,
            cursor: self.head,
        }
    }

    /// Verifies the link structure.
    ///
    /// `head.prev` and `tail.next` are empty, every `next` link is mirrored by
    /// a `prev` link, and walking from head reaches tail in exactly `len` steps.
    pub fn check_links(&self) -> Result<(), String> {
        if let Some(head) = self.head {
            if self.node(head).prev.is_some() {
                return Err("head has a prev link".to_string());
            }
        }
        if let Some(tail) = self.tail {
            if self.node(tail).next.is_some() {
                return Err("tail has a next link".to_string());
            }
        }

        let mut steps = 0;
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let node = self
                .slots
                .get(id)
                .and_then(Option::as_ref)
                .ok_or_else(|| format!("link to empty slot {id}"))?;
            if node.prev != prev {
                return Err(format!("slot {id} has a broken prev link"));
            }
            steps += 1;
            if steps > self.len {
                return Err("cycle detected".to_string());
            }
            prev = Some(id);
            cursor = node.next;
        }

        if prev != self.tail {
            return Err("walk from head did not end at tail".to_string());
        }
        if steps != self.len {
            return Err(format!("walked {steps} nodes, expected {}", self.len));
        }
        Ok(())
    }

    fn contains(&self, id: NodeId) -> bool {
        matches!(self.slots.get(id), Some(Some(_)))
    }

    fn node(&self, id: NodeId) -> &Node {
        self.slots[id].as_ref().expect("linked slot is occupied")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.slots[id].as_mut().expect("linked slot is occupied")
    }

    fn unlink(&mut self, id: NodeId) {
        let (prev, next) = {
            let node = self.node(id);
            (node.prev, node.next)
        };

        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.tail = prev,
        }

        let node = self.node_mut(id);
        node.prev = None;
        node.next = None;
    }
}

/// Head-to-tail iterator over a [`RecencyQueue`].
pub struct Iter<'a> {
    queue: &'a RecencyQueue,
    cursor: Option<NodeId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a CacheEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let node = self.queue.slots.get(id)?.as_ref()?;
        self.cursor = node.next;
        Some(&node.entry)
    }
}
