//! Worklist containers that refuse duplicate membership

use std::collections::{BTreeSet, VecDeque};

/// FIFO queue where an element cannot be re-inserted while it is queued.
#[derive(Debug, Clone)]
pub struct UniquedQueue<T> {
    set: BTreeSet<T>,
    queue: VecDeque<T>,
}

impl<T: Ord + Copy> UniquedQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            set: BTreeSet::new(),
            queue: VecDeque::new(),
        }
    }

    /// Enqueue `element` unless it is already queued.
    ///
    /// Returns true if the element was added.
    pub fn insert(&mut self, element: T) -> bool {
        if !self.set.insert(element) {
            return false;
        }
        self.queue.push_back(element);
        true
    }

    /// Remove and return the oldest element
    pub fn pop(&mut self) -> Option<T> {
        let element = self.queue.pop_front()?;
        self.set.remove(&element);
        Some(element)
    }

    /// Whether `element` is currently queued
    pub fn contains(&self, element: &T) -> bool {
        self.set.contains(element)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

impl<T: Ord + Copy> Default for UniquedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// LIFO stack where an element cannot be re-inserted while it is stacked.
#[derive(Debug, Clone)]
pub struct UniquedStack<T> {
    set: BTreeSet<T>,
    stack: Vec<T>,
}

impl<T: Ord + Copy> UniquedStack<T> {
    /// Create an empty stack
    pub fn new() -> Self {
        Self {
            set: BTreeSet::new(),
            stack: Vec::new(),
        }
    }

    /// Push `element` unless it is already stacked.
    ///
    /// Returns true if the element was added.
    pub fn insert(&mut self, element: T) -> bool {
        if !self.set.insert(element) {
            return false;
        }
        self.stack.push(element);
        true
    }

    /// Remove and return the most recently inserted element
    pub fn pop(&mut self) -> Option<T> {
        let element = self.stack.pop()?;
        self.set.remove(&element);
        Some(element)
    }

    /// Reverse the stack in its current state
    pub fn reverse(&mut self) {
        self.stack.reverse();
    }

    /// Whether `element` is currently stacked
    pub fn contains(&self, element: &T) -> bool {
        self.set.contains(element)
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }
}

impl<T: Ord + Copy> Default for UniquedStack<T> {
    fn default() -> Self {
        Self::new()
    }
}
