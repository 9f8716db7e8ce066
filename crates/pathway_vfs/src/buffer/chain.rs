use std::collections::VecDeque;
use std::fmt;

use super::pool::{BufferNode, BufferPool};

/// A growable byte sequence built from pool nodes.
///
/// Writers append at the tail, linking a new node when the tail is full. Readers consume
/// from a cursor at the head. Exhausted nodes go back to the pool unless the chain is in
/// save mode, where they stay linked so the chain can be rewound and read again.
pub struct BufferChain {
    pool: BufferPool,
    nodes: VecDeque<BufferNode>,
    read_node: usize,
    read_offset: usize,
    save: bool,
}

impl BufferChain {
    pub fn new(pool: BufferPool) -> Self {
        Self {
            pool,
            nodes: VecDeque::new(),
            read_node: 0,
            read_offset: 0,
            save: false,
        }
    }

    /// A chain that keeps consumed nodes for re-reading.
    pub fn saving(pool: BufferPool) -> Self {
        let mut chain = Self::new(pool);
        chain.save = true;
        chain
    }

    pub fn set_save(&mut self, save: bool) {
        self.save = save;
        if !save {
            self.release_consumed();
        }
    }

    pub fn is_save(&self) -> bool {
        self.save
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Total bytes held by the chain, including consumed bytes kept by save mode.
    pub fn len(&self) -> usize {
        self.nodes.iter().map(BufferNode::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.iter().all(BufferNode::is_empty)
    }

    /// Bytes not yet consumed by the read cursor.
    pub fn remaining(&self) -> usize {
        self.len() - self.consumed()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn consumed(&self) -> usize {
        self.nodes
            .iter()
            .take(self.read_node)
            .map(BufferNode::len)
            .sum::<usize>()
            + self.read_offset
    }

    pub fn append(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let tail_full = self.nodes.back().is_none_or(BufferNode::is_full);
            if tail_full {
                self.nodes.push_back(self.pool.allocate());
            }
            if let Some(tail) = self.nodes.back_mut() {
                let copied = tail.push_slice(bytes);
                bytes = &bytes[copied..];
            }
        }
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.append(&[byte]);
    }

    /// Consumes up to `buf.len()` bytes from the read cursor.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut total = 0;
        while total < buf.len() {
            let Some(node) = self.nodes.get(self.read_node) else {
                break;
            };
            let available = &node.filled()[self.read_offset..];
            if available.is_empty() {
                if !self.advance_node() {
                    break;
                }
                continue;
            }
            let count = available.len().min(buf.len() - total);
            buf[total..total + count].copy_from_slice(&available[..count]);
            self.read_offset += count;
            total += count;
        }
        self.advance_node();
        total
    }

    /// Consumes and discards up to `count` bytes.
    pub fn skip(&mut self, count: usize) -> usize {
        let mut skipped = 0;
        while skipped < count {
            let Some(node) = self.nodes.get(self.read_node) else {
                break;
            };
            let available = node.len() - self.read_offset;
            if available == 0 {
                if !self.advance_node() {
                    break;
                }
                continue;
            }
            let step = available.min(count - skipped);
            self.read_offset += step;
            skipped += step;
        }
        self.advance_node();
        skipped
    }

    /// Moves the cursor past an exhausted node. A partially filled tail stays put so later
    /// appends remain readable.
    fn advance_node(&mut self) -> bool {
        let Some(node) = self.nodes.get(self.read_node) else {
            return false;
        };
        let is_tail = self.read_node + 1 == self.nodes.len();
        if self.read_offset < node.len() || (is_tail && !node.is_full()) {
            return false;
        }
        if self.save {
            self.read_node += 1;
        } else {
            self.nodes.pop_front();
        }
        self.read_offset = 0;
        true
    }

    fn release_consumed(&mut self) {
        for _ in 0..self.read_node {
            self.nodes.pop_front();
        }
        self.read_node = 0;
    }

    /// Moves the read cursor back to the first retained byte.
    pub fn rewind(&mut self) {
        self.read_node = 0;
        self.read_offset = 0;
    }

    /// Copies every retained byte into one contiguous block.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for node in &self.nodes {
            out.extend_from_slice(node.filled());
        }
        out
    }

    /// Reads bytes starting at `position` (relative to the first retained byte) without
    /// moving the cursor.
    pub fn read_at(&self, position: usize, buf: &mut [u8]) -> usize {
        let mut skip = position;
        let mut total = 0;
        for node in &self.nodes {
            let filled = node.filled();
            if skip >= filled.len() {
                skip -= filled.len();
                continue;
            }
            let available = &filled[skip..];
            skip = 0;
            let count = available.len().min(buf.len() - total);
            buf[total..total + count].copy_from_slice(&available[..count]);
            total += count;
            if total == buf.len() {
                break;
            }
        }
        total
    }

    /// Overwrites bytes starting at `position`, appending whatever extends past the end.
    /// Gaps past the end are zero filled.
    pub fn write_at(&mut self, position: usize, mut bytes: &[u8]) {
        let len = self.len();
        if position > len {
            self.append(&vec![0; position - len]);
        }
        let mut skip = position;
        for node in self.nodes.iter_mut() {
            if bytes.is_empty() {
                return;
            }
            let filled = node.len();
            if skip >= filled {
                skip -= filled;
                continue;
            }
            let count = (filled - skip).min(bytes.len());
            node.as_mut_slice()[skip..skip + count].copy_from_slice(&bytes[..count]);
            bytes = &bytes[count..];
            skip = 0;
        }
        self.append(bytes);
    }

    /// Returns every node to the pool.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.read_node = 0;
        self.read_offset = 0;
    }
}

impl fmt::Debug for BufferChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferChain")
            .field("nodes", &self.nodes.len())
            .field("len", &self.len())
            .field("remaining", &self.remaining())
            .field("save", &self.save)
            .finish()
    }
}
