// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity chunk buffer that overwrites its oldest entry once full.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Number of chunks kept between two flushes when no capacity is configured.
pub const DEFAULT_RING_BUFFER_SIZE: usize = 1024;

#[derive(Debug)]
struct Slots {
    buffer: Vec<Option<Vec<u8>>>,
    head: usize,
    tail: usize,
    count: usize,
}

/// Circular store of opaque byte chunks.
///
/// Slots are preallocated at construction and never resized. When the buffer
/// is full, [`RingBuffer::add`] evicts the chunk at the tail before writing
/// the new one at the head.
#[derive(Debug)]
pub struct RingBuffer {
    slots: Mutex<Slots>,
    capacity: usize,
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_RING_BUFFER_SIZE)
    }
}

impl RingBuffer {
    /// Creates an empty buffer holding at most `capacity` chunks. A capacity
    /// of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut buffer = Vec::with_capacity(capacity);
        buffer.resize_with(capacity, || None);
        RingBuffer {
            slots: Mutex::new(Slots {
                buffer,
                head: 0,
                tail: 0,
                count: 0,
            }),
            capacity,
        }
    }

    // Chunks are copied before the lock is taken and nothing under the lock
    // can panic, so a poisoned guard still holds consistent indices.
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copies `data` into the buffer, evicting the oldest chunk when full.
    pub fn add(&self, data: &[u8]) {
        let chunk = data.to_vec();
        let mut slots = self.lock();

        if slots.count == self.capacity {
            slots.tail = (slots.tail + 1) % self.capacity;
        } else {
            slots.count += 1;
        }

        let head = slots.head;
        slots.buffer[head] = Some(chunk);
        slots.head = (head + 1) % self.capacity;
    }

    /// Takes every buffered chunk, oldest first, and resets the buffer.
    ///
    /// Returns an empty `Vec` when nothing is buffered.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        let mut slots = self.lock();

        if slots.count == 0 {
            return Vec::new();
        }

        let mut result = Vec::with_capacity(slots.count);
        for i in 0..slots.count {
            let idx = (slots.tail + i) % self.capacity;
            if let Some(chunk) = slots.buffer[idx].take() {
                result.push(chunk);
            }
        }

        slots.count = 0;
        slots.head = 0;
        slots.tail = 0;

        result
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[cfg(test)]
    fn indices(&self) -> (usize, usize, usize) {
        let slots = self.lock();
        (slots.head, slots.tail, slots.count)
    }
}
