use std::collections::{hash_map::Entry, HashMap, HashSet};

use crate::{
    model::{RouteDirection, StopId, StopTimeEntry, Trip, TripId},
    schedule_time::ScheduleTime,
};

/// Data harvested ahead of time because the stop-times table is not in route order.
///
/// Entries are written when a cursor runs over rows of a trip other than the one it is
/// looking for, and each entry is handed out at most once.
#[derive(Debug, Default)]
pub struct RepairIndex {
    stops_in_progress: HashMap<RouteDirection, Vec<StopId>>,
    start_time_found: HashMap<TripId, ScheduleTime>,
}

impl RepairIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stop to the sequence being assembled for `key`.
    ///
    /// Stops already in the sequence are dropped, except that the first stop may close the
    /// sequence once more (loop routes) when it does not open its trip and is not already
    /// the last stop.
    pub fn record_stop(&mut self, key: RouteDirection, stop: StopId, opens_trip: bool) {
        match self.stops_in_progress.entry(key) {
            Entry::Vacant(entry) => {
                log::debug!("Started out-of-order stop sequence for {}", key);
                entry.insert(vec![stop]);
            }
            Entry::Occupied(mut entry) => {
                let stops = entry.get_mut();
                let closes_loop =
                    stops.first() == Some(&stop) && !opens_trip && stops.last() != Some(&stop);
                if !stops.contains(&stop) || closes_loop {
                    stops.push(stop);
                }
            }
        }
    }

    pub fn take_stops(&mut self, key: &RouteDirection) -> Option<Vec<StopId>> {
        self.stops_in_progress.remove(key)
    }

    /// Remembers the start time of a trip met out of order. Only the first time seen for a
    /// trip is kept.
    pub fn record_start_time(&mut self, trip: TripId, time: ScheduleTime) {
        if let Entry::Vacant(entry) = self.start_time_found.entry(trip) {
            log::debug!("Saved out-of-order start time {} for trip {}", time, trip);
            entry.insert(time);
        }
    }

    pub fn take_start_time(&mut self, trip: &TripId) -> Option<ScheduleTime> {
        self.start_time_found.remove(trip)
    }

    pub fn is_drained(&self) -> bool {
        self.stops_in_progress.is_empty() && self.start_time_found.is_empty()
    }

    /// Consumes the index and returns the keys that were never claimed, sorted.
    pub fn into_residue(self) -> (Vec<RouteDirection>, Vec<TripId>) {
        let mut stops: Vec<_> = self.stops_in_progress.into_keys().collect();
        let mut times: Vec<_> = self.start_time_found.into_keys().collect();
        stops.sort();
        times.sort();
        (stops, times)
    }
}

/// Lookup from a trip to the route and direction it belongs to, built once per pass so that
/// rows of foreign trips can be attributed without searching the trips table.
#[derive(Debug, Default)]
pub struct TripOwners {
    owners: HashMap<TripId, RouteDirection>,
    with_stop_times: HashSet<TripId>,
    split_trips: Vec<TripId>,
}

impl TripOwners {
    pub fn build(trips: &[Trip], stop_times: &[StopTimeEntry]) -> Self {
        let mut owners = HashMap::with_capacity(trips.len());
        for trip in trips {
            if owners.insert(trip.id, trip.route_direction()).is_some() {
                log::warn!("Trip {} is listed more than once in trips.txt", trip.id);
            }
        }
        let mut with_stop_times = HashSet::new();
        let mut split = HashSet::new();
        let mut previous = None;
        for stop_time in stop_times {
            if previous != Some(stop_time.trip) && !with_stop_times.insert(stop_time.trip) {
                split.insert(stop_time.trip);
            }
            previous = Some(stop_time.trip);
        }
        let mut split_trips: Vec<_> = split.into_iter().collect();
        split_trips.sort();
        TripOwners {
            owners,
            with_stop_times,
            split_trips,
        }
    }

    pub fn owner(&self, trip: &TripId) -> Option<RouteDirection> {
        self.owners.get(trip).copied()
    }

    pub fn has_stop_times(&self, trip: &TripId) -> bool {
        self.with_stop_times.contains(trip)
    }

    /// Trips that come back in stop_times.txt after rows of another trip, sorted.
    pub fn split_trips(&self) -> &[TripId] {
        &self.split_trips
    }
}
