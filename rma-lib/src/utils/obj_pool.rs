/// A fixed-capacity object pool addressed by generation-checked handles.
///
/// - All slots are allocated up front; `alloc` never grows the pool.
/// - Live objects are threaded onto an intrusive active list in allocation
///   order, so walking outstanding objects needs no extra allocation.
/// - A handle becomes stale once its slot is freed. Using a stale handle is a
///   bug and panics.
/// - Not thread-safe. Wrap in a Mutex if needed.
pub struct SlotPool<T> {
    slots: Box<[Slot<T>]>,
    // LIFO free list of slot indices.
    free_list: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    len: usize,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
    prev: Option<u32>,
    next: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

impl Handle {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl<T> SlotPool<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        assert!(capacity <= u32::MAX as usize, "capacity must fit in u32");
        let slots = (0..capacity)
            .map(|_| Slot { generation: 0, value: None, prev: None, next: None })
            .collect();
        Self {
            slots,
            free_list: (0..capacity as u32).rev().collect(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.free_list.is_empty()
    }

    /// Store `value` and link it at the tail of the active list.
    /// Gives the value back if the pool is exhausted.
    pub fn alloc(&mut self, value: T) -> Result<Handle, T> {
        let Some(index) = self.free_list.pop() else {
            return Err(value);
        };
        let prev = self.tail;
        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.value.is_none());
        slot.value = Some(value);
        slot.prev = prev;
        slot.next = None;
        let generation = slot.generation;
        match prev {
            Some(p) => self.slots[p as usize].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
        Ok(Handle { index, generation })
    }

    /// Unlink and return the object. Panics on a stale handle.
    pub fn free(&mut self, handle: Handle) -> T {
        let slot = self.live_slot_mut(handle);
        let value = slot.value.take().unwrap_or_else(|| unreachable!());
        let (prev, next) = (slot.prev.take(), slot.next.take());
        slot.generation = slot.generation.wrapping_add(1);
        match prev {
            Some(p) => self.slots[p as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n as usize].prev = prev,
            None => self.tail = prev,
        }
        self.free_list.push(handle.index);
        self.len -= 1;
        value
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.slots.get(handle.index()).is_some_and(|slot| {
            slot.generation == handle.generation && slot.value.is_some()
        })
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Like `get`, but a stale handle is a bug and panics.
    pub fn live(&self, handle: Handle) -> &T {
        match self.get(handle) {
            Some(value) => value,
            None => panic!("stale pool handle {handle:?}"),
        }
    }

    pub fn live_mut(&mut self, handle: Handle) -> &mut T {
        match self.get_mut(handle) {
            Some(value) => value,
            None => panic!("stale pool handle {handle:?}"),
        }
    }

    /// Live objects in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let index = cursor?;
            let slot = &self.slots[index as usize];
            cursor = slot.next;
            let handle = Handle { index, generation: slot.generation };
            slot.value.as_ref().map(|v| (handle, v))
        })
    }

    fn live_slot_mut(&mut self, handle: Handle) -> &mut Slot<T> {
        let slot = &mut self.slots[handle.index()];
        if slot.generation != handle.generation || slot.value.is_none() {
            panic!("stale pool handle {handle:?}: released twice or never allocated");
        }
        slot
    }
}
