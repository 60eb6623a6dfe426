use super::handle::HandleLike;
use super::handle_pool::HandlePool;

/// A handle-addressed object collection. Every `create` allocates a slot for
/// the instance `T` and names it with a versioned handle; freeing the handle
/// vacates the slot for reuse.
pub struct ObjectPool<H: HandleLike, T> {
    handles: HandlePool<H>,
    entries: Vec<Option<T>>,
}

impl<H: HandleLike, T> Default for ObjectPool<H, T> {
    fn default() -> Self {
        ObjectPool::new()
    }
}

impl<H: HandleLike, T> ObjectPool<H, T> {
    /// Constructs a new, empty `ObjectPool`.
    pub fn new() -> Self {
        ObjectPool {
            handles: HandlePool::new(),
            entries: Vec::new(),
        }
    }

    /// Creates a `T` and returns the handle that names it.
    pub fn create(&mut self, value: T) -> H {
        let handle = self.handles.create();

        if handle.index() as usize >= self.entries.len() {
            self.entries.push(Some(value));
        } else {
            self.entries[handle.index() as usize] = Some(value);
        }

        handle
    }

    /// Returns an immutable reference to the value named by `handle`.
    #[inline]
    pub fn get(&self, handle: H) -> Option<&T> {
        if self.handles.is_alive(handle) {
            self.entries[handle.index() as usize].as_ref()
        } else {
            None
        }
    }

    /// Returns a mutable reference to the value named by `handle`.
    #[inline]
    pub fn get_mut(&mut self, handle: H) -> Option<&mut T> {
        if self.handles.is_alive(handle) {
            self.entries[handle.index() as usize].as_mut()
        } else {
            None
        }
    }

    /// Returns true if `handle` was created by this pool and has not been
    /// freed yet.
    #[inline]
    pub fn contains(&self, handle: H) -> bool {
        self.handles.is_alive(handle)
    }

    /// Recycles the slot named by `handle` and returns the value it held.
    pub fn free(&mut self, handle: H) -> Option<T> {
        if self.handles.free(handle) {
            self.entries[handle.index() as usize].take()
        } else {
            None
        }
    }

    /// Returns the number of alive entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Checks if the pool is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an iterator over all the alive entries.
    pub fn iter<'a>(&'a self) -> impl Iterator<Item = (H, &'a T)> + 'a {
        let entries = &self.entries;
        self.handles
            .iter()
            .filter_map(move |v| entries[v.index() as usize].as_ref().map(|e| (v, e)))
    }

    /// Returns an iterator over all the alive handles.
    pub fn handles<'a>(&'a self) -> impl Iterator<Item = H> + 'a {
        self.handles.iter()
    }
}
