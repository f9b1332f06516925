//! Generational arena backing the engine heap

/// A handle into a generational arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    /// Index into the arena
    pub index: u32,

    /// Generation of the cell when the handle was issued
    pub generation: u32,
}

impl Handle {
    /// Create a new handle
    pub fn new(index: u32, generation: u32) -> Self {
        Handle { index, generation }
    }
}

/// One cell of the arena
#[derive(Debug)]
struct Cell<T> {
    value: Option<T>,
    generation: u32,
}

/// A generational arena.
///
/// Freed cells are recycled with a bumped generation, so handles to a dead
/// cell never resolve to whatever was allocated in its place.
#[derive(Debug)]
pub struct Arena<T> {
    cells: Vec<Cell<T>>,

    /// Indices of empty cells
    free: Vec<u32>,

    occupied: usize,
}

impl<T> Arena<T> {
    /// Create a new empty arena
    pub fn new() -> Self {
        Arena {
            cells: Vec::new(),
            free: Vec::new(),
            occupied: 0,
        }
    }

    /// Insert a value, returning its handle
    pub fn insert(&mut self, value: T) -> Handle {
        self.occupied += 1;

        if let Some(index) = self.free.pop() {
            let cell = &mut self.cells[index as usize];
            cell.value = Some(value);
            cell.generation = cell.generation.wrapping_add(1);
            Handle::new(index, cell.generation)
        } else {
            let index = self.cells.len() as u32;
            self.cells.push(Cell {
                value: Some(value),
                generation: 0,
            });
            Handle::new(index, 0)
        }
    }

    /// Remove a value, returning it if the handle was live
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let cell = self.cells.get_mut(handle.index as usize)?;
        if cell.generation != handle.generation {
            return None;
        }

        let value = cell.value.take()?;
        self.free.push(handle.index);
        self.occupied -= 1;
        Some(value)
    }

    /// Get a reference to a live value
    pub fn get(&self, handle: Handle) -> Option<&T> {
        self.cells
            .get(handle.index as usize)
            .filter(|cell| cell.generation == handle.generation)
            .and_then(|cell| cell.value.as_ref())
    }

    /// Get a mutable reference to a live value
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.cells
            .get_mut(handle.index as usize)
            .filter(|cell| cell.generation == handle.generation)
            .and_then(|cell| cell.value.as_mut())
    }

    /// Check if a handle is live
    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.occupied
    }

    /// Check if the arena holds no live values
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Iterate over all live values
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.cells.iter().enumerate().filter_map(|(index, cell)| {
            cell.value
                .as_ref()
                .map(|value| (Handle::new(index as u32, cell.generation), value))
        })
    }

    /// Remove every value for which `keep` returns false, returning how many were removed
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&mut T) -> bool,
    {
        let mut removed = 0;
        for (index, cell) in self.cells.iter_mut().enumerate() {
            let drop_it = match cell.value.as_mut() {
                Some(value) => !keep(value),
                None => false,
            };
            if drop_it {
                cell.value = None;
                self.free.push(index as u32);
                removed += 1;
            }
        }
        self.occupied -= removed;
        removed
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_basic() {
        let mut arena = Arena::new();

        let h1 = arena.insert("hello");
        let h2 = arena.insert("world");

        assert_eq!(arena.get(h1), Some(&"hello"));
        assert_eq!(arena.get(h2), Some(&"world"));

        assert_eq!(arena.remove(h1), Some("hello"));
        assert_eq!(arena.get(h1), None);

        // Reuses the cell under a new generation
        let h3 = arena.insert("reused");
        assert_eq!(h3.index, h1.index);
        assert_ne!(h3.generation, h1.generation);
    }

    #[test]
    fn test_stale_handles() {
        let mut arena = Arena::new();

        let h1 = arena.insert(42);
        arena.remove(h1);
        let h2 = arena.insert(84);

        assert_eq!(arena.get(h1), None);
        assert!(!arena.contains(h1));
        assert_eq!(arena.get(h2), Some(&84));
        assert_eq!(arena.remove(h1), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_retain() {
        let mut arena = Arena::new();
        let handles: Vec<_> = (0..10).map(|i| arena.insert(i)).collect();

        let removed = arena.retain(|v| *v % 2 == 0);
        assert_eq!(removed, 5);
        assert_eq!(arena.len(), 5);

        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(arena.contains(*handle), i % 2 == 0);
        }

        let values: Vec<i32> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![0, 2, 4, 6, 8]);
    }
}
