// ── Device color assignment ──
//
// Every device gets a palette color the first time anything asks about
// it, and keeps it for the rest of the session. Colors rotate through the
// palette in first-seen order, so chart series stay stable no matter
// which adapter sees a device first.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A 24-bit color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

pub const NEON_CYAN: Rgb = Rgb::new(128, 255, 234); // #80ffea
pub const CORAL: Rgb = Rgb::new(255, 106, 193); // #ff6ac1
pub const ELECTRIC_PURPLE: Rgb = Rgb::new(225, 53, 255); // #e135ff
pub const SUCCESS_GREEN: Rgb = Rgb::new(80, 250, 123); // #50fa7b
pub const ELECTRIC_YELLOW: Rgb = Rgb::new(241, 250, 140); // #f1fa8c
pub const LIGHT_BLUE: Rgb = Rgb::new(139, 233, 253); // #8be9fd

/// Chart series palette, in assignment order.
pub const PALETTE: [Rgb; 6] = [
    NEON_CYAN,
    CORAL,
    ELECTRIC_PURPLE,
    SUCCESS_GREEN,
    ELECTRIC_YELLOW,
    LIGHT_BLUE,
];

/// Session-wide device → color map. Shared by every adapter via the hub.
#[derive(Debug, Default)]
pub struct ColorAssigner {
    assigned: DashMap<String, Rgb>,
    next: AtomicUsize,
}

impl ColorAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Color for `device_id`, assigning the next palette entry on first use.
    pub fn color_for(&self, device_id: &str) -> Rgb {
        if let Some(color) = self.assigned.get(device_id) {
            return *color;
        }
        // `entry` holds the shard lock, so two racing callers agree.
        *self
            .assigned
            .entry(device_id.to_owned())
            .or_insert_with(|| {
                let idx = self.next.fetch_add(1, Ordering::Relaxed);
                PALETTE[idx % PALETTE.len()]
            })
    }

    /// Color already assigned to `device_id`, without assigning one.
    pub fn get(&self, device_id: &str) -> Option<Rgb> {
        self.assigned.get(device_id).map(|c| *c)
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}
