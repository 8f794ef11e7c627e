use crate::stringtable::Name;

/// A single recorded scope.
///
/// Nesting is encoded through `depth` rather than parent links: an event with
/// depth `d` is contained in the closest preceding event of the same recorder
/// with depth `d - 1`.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct Event {
    pub name: Name,
    pub depth: u32,
    /// Distinguishes repeated scopes with the same name and correlates a
    /// CPU-side scope with its externally timed (e.g. GPU) counterpart.
    pub sub_id: u32,
    /// Seconds since the process epoch, see [`crate::clock`].
    pub begin: f64,
    /// Equal to `begin` until the scope is closed.
    pub end: f64,
}

impl Event {
    #[inline]
    pub fn open(name: Name, depth: u32, sub_id: u32, begin: f64) -> Event {
        Event {
            name,
            depth,
            sub_id,
            begin,
            end: begin,
        }
    }

    #[inline]
    pub fn closed(name: Name, depth: u32, sub_id: u32, begin: f64, end: f64) -> Event {
        Event {
            name,
            depth,
            sub_id,
            begin,
            end,
        }
    }

    #[inline]
    pub fn duration(&self) -> f64 {
        self.end - self.begin
    }

    /// Returns true if the time interval of `self` completely contains the
    /// time interval of `other`.
    pub fn contains(&self, other: &Event) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }
}
