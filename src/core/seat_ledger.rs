use crate::domain::model::{CourseId, SeatCount};
use crate::domain::ports::SeatLedger;
use crate::utils::error::{EnrollError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Seat counters held in a sharded map.
///
/// Each operation runs under the write lock of the shard holding the course,
/// so check-and-increment is one atomic step per course while unrelated
/// courses proceed in parallel.
#[derive(Debug, Default)]
pub struct InMemorySeatLedger {
    seats: DashMap<CourseId, SeatCount>,
}

impl InMemorySeatLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<(CourseId, SeatCount)> {
        let mut all: Vec<_> = self.seats.iter().map(|e| (*e.key(), *e.value())).collect();
        all.sort_by_key(|(course, _)| *course);
        all
    }
}

impl SeatLedger for InMemorySeatLedger {
    fn open(&self, course: CourseId, capacity: u32) -> Result<()> {
        if let Entry::Vacant(slot) = self.seats.entry(course) {
            tracing::debug!("Opening seat ledger for course {} with capacity {}", course, capacity);
            slot.insert(SeatCount {
                occupied: 0,
                capacity,
            });
        }
        Ok(())
    }

    fn try_reserve(&self, course: CourseId) -> Result<bool> {
        let mut seats = self
            .seats
            .get_mut(&course)
            .ok_or(EnrollError::CourseNotFound(course))?;
        if seats.occupied < seats.capacity {
            seats.occupied += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn release(&self, course: CourseId) -> Result<()> {
        match self.seats.get_mut(&course) {
            Some(mut seats) if seats.occupied > 0 => seats.occupied -= 1,
            Some(_) => tracing::warn!("Seat release on course {} with no occupied seats", course),
            None => tracing::warn!("Seat release on unknown course {}", course),
        }
        Ok(())
    }

    fn seat_count(&self, course: CourseId) -> Result<Option<SeatCount>> {
        Ok(self.seats.get(&course).map(|seats| *seats))
    }

    fn set_capacity(&self, course: CourseId, capacity: u32) -> Result<SeatCount> {
        if capacity == 0 {
            return Err(EnrollError::InvalidConfigValueError {
                field: "capacity".to_string(),
                value: capacity.to_string(),
                reason: "Capacity must be a positive integer".to_string(),
            });
        }
        let mut seats = self.seats.entry(course).or_insert(SeatCount {
            occupied: 0,
            capacity,
        });
        if capacity < seats.occupied {
            return Err(EnrollError::CapacityBelowOccupancy {
                course,
                requested: capacity,
                occupied: seats.occupied,
            });
        }
        seats.capacity = capacity;
        Ok(*seats)
    }

    fn restore(&self, course: CourseId, capacity: u32, occupied: u32) -> Result<()> {
        if occupied > capacity {
            tracing::warn!(
                "Restoring course {} with {} enrollments over capacity {}",
                course,
                occupied,
                capacity
            );
        }
        self.seats.insert(course, SeatCount { occupied, capacity });
        Ok(())
    }

    fn courses(&self) -> Result<Vec<CourseId>> {
        Ok(self.snapshot().into_iter().map(|(course, _)| course).collect())
    }
}
