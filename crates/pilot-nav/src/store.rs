use pilot_proto::Coordinate;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no waypoints to remove")]
pub struct EmptyStoreError;

type Listener = Box<dyn Fn(&[Coordinate]) + Send + Sync>;

/// Ordered waypoint list. Duplicates and out-of-range values are stored as given.
///
/// Every mutator call notifies listeners synchronously with the full list,
/// including calls that leave it unchanged (e.g. `clear` on an empty store).
/// Listeners must not call back into the store.
#[derive(Default)]
pub struct WaypointStore {
    points: Vec<Coordinate>,
    listeners: Vec<Listener>,
}

impl WaypointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, f: impl Fn(&[Coordinate]) + Send + Sync + 'static) {
        self.listeners.push(Box::new(f));
    }

    /// Returns the new length.
    pub fn append(&mut self, c: Coordinate) -> usize {
        self.points.push(c);
        self.notify();
        self.points.len()
    }

    pub fn remove_last(&mut self) -> Result<Coordinate, EmptyStoreError> {
        let c = self.points.pop().ok_or(EmptyStoreError)?;
        self.notify();
        Ok(c)
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.notify();
    }

    /// Immutable copy; later mutations never show through it.
    pub fn snapshot(&self) -> Arc<[Coordinate]> {
        Arc::from(self.points.as_slice())
    }

    pub fn points(&self) -> &[Coordinate] {
        &self.points
    }

    pub fn last(&self) -> Option<Coordinate> {
        self.points.last().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn notify(&self) {
        for l in &self.listeners {
            l(&self.points);
        }
    }
}
