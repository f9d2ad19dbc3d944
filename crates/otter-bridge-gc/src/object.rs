//! GC slot header

use std::cell::Cell;

/// Mark color for tri-color marking
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkColor {
    /// Not yet visited
    White = 0,
    /// In worklist
    Gray = 1,
    /// Fully scanned
    Black = 2,
}

/// Per-slot GC header.
///
/// The generation is bumped every time the slot is reclaimed so stale
/// `GcRef`s pointing at a reused slot can be told apart from live ones.
#[derive(Debug)]
pub struct GcHeader {
    mark: Cell<MarkColor>,
    generation: Cell<u32>,
}

impl GcHeader {
    /// Create new header
    pub const fn new() -> Self {
        Self {
            mark: Cell::new(MarkColor::White),
            generation: Cell::new(0),
        }
    }

    /// Get mark color
    pub fn mark(&self) -> MarkColor {
        self.mark.get()
    }

    /// Set mark color
    pub fn set_mark(&self, color: MarkColor) {
        self.mark.set(color);
    }

    /// Current slot generation
    pub fn generation(&self) -> u32 {
        self.generation.get()
    }

    /// Invalidate every handle issued for the current generation.
    pub fn bump_generation(&self) {
        self.generation.set(self.generation.get().wrapping_add(1));
        self.mark.set(MarkColor::White);
    }
}

impl Default for GcHeader {
    fn default() -> Self {
        Self::new()
    }
}
