//! Event pipes: bounded queues with per-reader cursors
//!
//! A pipe stores `(value, mask)` pairs. Writers append; each reader keeps a
//! local cursor and a filter mask; entries every registered reader has
//! passed are pruned by the driver once per frame. The pipe itself is a
//! resource, registered through `World::register_event`.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::reflect::{ConstructibleTrait, Reflect, Type};

/// Mask writers attach by default
pub const DEFAULT_PUSH_MASK: u32 = 0;

/// Mask readers filter with by default: everything
pub const DEFAULT_READ_MASK: u32 = !0;

struct Entry<T> {
    event: T,
    mask: u32,
    read_count: usize,
}

struct PipeInner<T> {
    entries: VecDeque<Entry<T>>,
    /// Entries dropped so far; global positions are `pruned + local index`.
    pruned: usize,
    readers: usize,
}

/// Resource storing events of type `T`
pub struct EventPipe<T: Send + Sync + 'static> {
    inner: Mutex<PipeInner<T>>,
}

impl<T: Send + Sync + 'static> Default for EventPipe<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> EventPipe<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PipeInner {
                entries: VecDeque::new(),
                pruned: 0,
                readers: 0,
            }),
        }
    }

    /// Append an event with the default mask
    pub fn push(&self, event: T) {
        self.push_with_mask(event, DEFAULT_PUSH_MASK);
    }

    pub fn push_with_mask(&self, event: T, mask: u32) {
        self.inner.lock().entries.push_back(Entry {
            event,
            mask,
            read_count: 0,
        });
    }

    /// Events appended over the pipe's lifetime
    pub fn sent(&self) -> usize {
        let inner = self.inner.lock();
        inner.pruned + inner.entries.len()
    }

    /// Events currently retained
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Drop leading entries every registered reader has read
    pub fn prune(&self) {
        let mut inner = self.inner.lock();
        let readers = inner.readers;
        while inner
            .entries
            .front()
            .is_some_and(|entry| entry.read_count >= readers)
        {
            inner.entries.pop_front();
            inner.pruned += 1;
        }
    }

    fn add_reader(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.readers += 1;
        // New readers start at the prune watermark and see retained events.
        inner.pruned
    }

    /// Visit events from `cursor` matching `mask`, marking them read.
    /// Returns the new cursor.
    fn visit(&self, cursor: usize, mask: u32, mut visit: impl FnMut(&T, u32)) -> usize {
        let mut inner = self.inner.lock();
        let start = cursor.max(inner.pruned) - inner.pruned;
        let len = inner.entries.len();
        for local in start..len {
            let entry = &mut inner.entries[local];
            entry.read_count += 1;
            if mask == DEFAULT_READ_MASK || entry.mask & mask != 0 || entry.mask == 0 {
                visit(&entry.event, entry.mask);
            }
        }
        inner.pruned + len
    }
}

impl<T: Send + Sync + 'static> Reflect for EventPipe<T> {
    fn reflect() -> Type {
        Type::new(format!("EventPipe<{}>", std::any::type_name::<T>()))
            .with(ConstructibleTrait::typed::<EventPipe<T>>().with_default().build())
    }
}

/// Reading end of a pipe; owns the cursor, lives in system state
pub struct EventReader<T: Send + Sync + 'static> {
    cursor: usize,
    mask: u32,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> EventReader<T> {
    /// Register a reader on `pipe`
    pub fn new(pipe: &EventPipe<T>) -> Self {
        Self {
            cursor: pipe.add_reader(),
            mask: DEFAULT_READ_MASK,
            _marker: std::marker::PhantomData,
        }
    }

    /// Register a reader which only sees events whose mask intersects `mask`
    pub fn with_mask(pipe: &EventPipe<T>, mask: u32) -> Self {
        Self {
            cursor: pipe.add_reader(),
            mask,
            _marker: std::marker::PhantomData,
        }
    }

    /// Visit every unread matching event, advancing the cursor
    pub fn for_each(&mut self, pipe: &EventPipe<T>, mut visit: impl FnMut(&T)) {
        self.cursor = pipe.visit(self.cursor, self.mask, |event, _| visit(event));
    }

    /// Drain unread matching events into a vector
    pub fn read(&mut self, pipe: &EventPipe<T>) -> Vec<T>
    where
        T: Clone,
    {
        let mut out = Vec::new();
        self.cursor = pipe.visit(self.cursor, self.mask, |event, _| out.push(event.clone()));
        out
    }
}

/// Writing end of a pipe
pub struct EventWriter<'a, T: Send + Sync + 'static> {
    pipe: &'a EventPipe<T>,
}

impl<'a, T: Send + Sync + 'static> EventWriter<'a, T> {
    pub fn new(pipe: &'a EventPipe<T>) -> Self {
        Self { pipe }
    }

    pub fn push(&self, event: T) {
        self.pipe.push(event);
    }

    pub fn push_with_mask(&self, event: T, mask: u32) {
        self.pipe.push_with_mask(event, mask);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_have_independent_cursors() {
        let pipe = EventPipe::<u32>::new();
        let mut a = EventReader::new(&pipe);
        let mut b = EventReader::new(&pipe);

        pipe.push(1);
        pipe.push(2);

        assert_eq!(a.read(&pipe), vec![1, 2]);
        assert_eq!(a.read(&pipe), Vec::<u32>::new());
        assert_eq!(b.read(&pipe), vec![1, 2]);
    }

    #[test]
    fn prune_drops_fully_read_entries() {
        let pipe = EventPipe::<u32>::new();
        let mut a = EventReader::new(&pipe);
        let mut b = EventReader::new(&pipe);

        pipe.push(1);
        pipe.push(2);
        a.read(&pipe);

        pipe.prune();
        assert_eq!(pipe.len(), 2, "entry retained until every reader passed");

        b.read(&pipe);
        pipe.prune();
        assert_eq!(pipe.len(), 0);
        assert_eq!(pipe.sent(), 2);
    }

    #[test]
    fn masks_filter_reads() {
        let pipe = EventPipe::<u32>::new();
        let mut masked = EventReader::with_mask(&pipe, 0b01);

        pipe.push_with_mask(1, 0b01);
        pipe.push_with_mask(2, 0b10);
        pipe.push_with_mask(3, 0b11);

        assert_eq!(masked.read(&pipe), vec![1, 3]);
    }

    #[test]
    fn late_readers_see_retained_events() {
        let pipe = EventPipe::<u32>::new();
        let mut early = EventReader::new(&pipe);
        pipe.push(1);
        early.read(&pipe);
        pipe.prune();

        let mut late = EventReader::new(&pipe);
        pipe.push(2);
        assert_eq!(late.read(&pipe), vec![2]);
    }
}
