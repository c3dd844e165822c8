//! Direction sets and the per-mover direction stack.
//!
//! Every held key contributes one entry to the stack. The union of all
//! entries is the mover's current direction; entries are removed by value so
//! overlapping holds can be released in any order.

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Direction: u8 {
        const UP = 1 << 0;
        const DOWN = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
    }
}

impl Direction {
    /// Unit components (x, y) with screen orientation: up is -y, left is -x.
    /// Opposing flags cancel on their axis.
    pub fn unit(self) -> (f64, f64) {
        let mut x = 0.0;
        let mut y = 0.0;
        if self.contains(Direction::UP) {
            y -= 1.0;
        }
        if self.contains(Direction::DOWN) {
            y += 1.0;
        }
        if self.contains(Direction::LEFT) {
            x -= 1.0;
        }
        if self.contains(Direction::RIGHT) {
            x += 1.0;
        }
        (x, y)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirectionStack {
    entries: Vec<Direction>,
    current: Direction,
}

impl DirectionStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push an entry. Returns `true` when the union went from empty to non-empty.
    pub fn push(&mut self, direction: Direction) -> bool {
        let was_idle = self.current.is_empty();
        self.entries.push(direction);
        self.recompute();
        was_idle && !self.current.is_empty()
    }

    /// Remove the first entry equal to `direction`. Removing an entry that
    /// was never pushed is a no-op.
    pub fn remove(&mut self, direction: Direction) {
        if let Some(index) = self.entries.iter().position(|d| *d == direction) {
            self.entries.remove(index);
            self.recompute();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.current = Direction::empty();
    }

    /// Union of all held entries.
    pub fn current(&self) -> Direction {
        self.current
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn recompute(&mut self) {
        self.current = self
            .entries
            .iter()
            .fold(Direction::empty(), |acc, d| acc | *d);
    }
}
