use std::collections::{HashMap, HashSet};

use indicatif::ProgressBar;

use crate::{
    cancel::CancelToken,
    cursor::CursorSet,
    error::SyncError,
    model::{
        RouteDirection, RouteDirectionStops, RouteId, StopId, StopTimeEntry, Trip, TripId,
        TripSchedule,
    },
    repair_index::{RepairIndex, TripOwners},
    schedule_time::ScheduleTime,
};

/// Receives derived rows as soon as they are computed.
pub trait ReconcileSink {
    async fn route_direction_stops(&mut self, row: RouteDirectionStops) -> Result<(), SyncError>;
    async fn trip_schedule(&mut self, row: TripSchedule) -> Result<(), SyncError>;
}

/// Outcome of one pass, including everything the pass could not attribute.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcileReport {
    pub route_direction_rows: usize,
    pub trip_rows: usize,
    pub late_trips: usize,
    /// Trips whose route never came up in routes.txt.
    pub held_residue: Vec<TripId>,
    pub undrained_stops: Vec<RouteDirection>,
    pub undrained_start_times: Vec<TripId>,
    pub trips_without_times: Vec<TripId>,
    pub duplicate_trips: Vec<TripId>,
    /// Trips referenced by stop_times.txt but missing from trips.txt.
    pub unknown_trips: Vec<TripId>,
    /// Trips whose stop times are spread over more than one run of stop_times.txt. Only the
    /// first run counts towards their stop sequence.
    pub split_trips: Vec<TripId>,
}

impl ReconcileReport {
    pub fn anomalies(&self) -> usize {
        self.held_residue.len()
            + self.undrained_stops.len()
            + self.undrained_start_times.len()
            + self.trips_without_times.len()
            + self.duplicate_trips.len()
            + self.unknown_trips.len()
            + self.split_trips.len()
    }

    pub fn log_anomalies(&self) {
        if !self.held_residue.is_empty() {
            log::warn!(
                "{} trips reference routes missing from routes.txt: {:?}",
                self.held_residue.len(),
                self.held_residue
            );
        }
        if !self.undrained_stops.is_empty() {
            log::warn!(
                "Stop sequences were collected for unclaimed route directions: {:?}",
                self.undrained_stops
            );
        }
        if !self.undrained_start_times.is_empty() {
            log::warn!(
                "Start times were collected for unclaimed trips: {:?}",
                self.undrained_start_times
            );
        }
        if !self.trips_without_times.is_empty() {
            log::warn!(
                "{} trips have no usable stop times: {:?}",
                self.trips_without_times.len(),
                self.trips_without_times
            );
        }
        if !self.duplicate_trips.is_empty() {
            log::warn!("Trips listed more than once: {:?}", self.duplicate_trips);
        }
        if !self.unknown_trips.is_empty() {
            log::warn!(
                "stop_times.txt references unknown trips: {:?}",
                self.unknown_trips
            );
        }
        if !self.split_trips.is_empty() {
            log::warn!(
                "Stop times of these trips are not contiguous: {:?}",
                self.split_trips
            );
        }
    }
}

/// Single pass over routes, trips and stop times that derives the stop sequence of every
/// route direction and the start time of every trip.
///
/// Routes are visited in declaration order. Trips of one route are expected to form a
/// contiguous run in the trips table and stop times are expected to follow the trips table.
/// When either expectation fails, rows met too early are parked in a [`RepairIndex`] (or, for
/// trips, in a per-route hold list) and claimed once their owner comes up.
pub struct Reconciler<'a> {
    routes: &'a [RouteId],
    cursors: CursorSet<'a, Trip, StopTimeEntry>,
    owners: TripOwners,
    repair: RepairIndex,
    resolved: HashSet<RouteDirection>,
    completed: HashSet<RouteId>,
    scheduled: HashSet<TripId>,
    held: HashMap<RouteId, Vec<&'a Trip>>,
    unknown_trips: HashSet<TripId>,
    last_stop_sequence_trip: Option<TripId>,
    report: ReconcileReport,
    cancel: CancelToken,
    progress: ProgressBar,
}

impl<'a> Reconciler<'a> {
    pub fn new(routes: &'a [RouteId], trips: &'a [Trip], stop_times: &'a [StopTimeEntry]) -> Self {
        Reconciler {
            routes,
            cursors: CursorSet::new(trips, stop_times),
            owners: TripOwners::build(trips, stop_times),
            repair: RepairIndex::new(),
            resolved: HashSet::new(),
            completed: HashSet::new(),
            scheduled: HashSet::new(),
            held: HashMap::new(),
            unknown_trips: HashSet::new(),
            last_stop_sequence_trip: None,
            report: ReconcileReport::default(),
            cancel: CancelToken::new(),
            progress: ProgressBar::hidden(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub async fn run<S: ReconcileSink>(
        mut self,
        sink: &mut S,
    ) -> Result<ReconcileReport, SyncError> {
        self.progress.set_length(self.routes.len() as u64);
        for &route in self.routes {
            if self.cancel.is_cancelled() {
                self.progress.abandon();
                return Err(SyncError::Cancelled);
            }
            self.reconcile_route(route, sink).await?;
            self.completed.insert(route);
            self.progress.inc(1);
        }

        // Whatever is left belongs either to a route that is already done or to none at all.
        while let Some(trip) = self.cursors.trips.advance() {
            if self.completed.contains(&trip.route) {
                self.report.late_trips += 1;
                self.process_trip(trip, sink).await?;
            } else {
                self.held.entry(trip.route).or_default().push(trip);
            }
        }
        self.progress.finish_and_clear();
        if !self.cursors.stop_sequences.is_exhausted() {
            log::debug!(
                "Stop times from row {} on were never reached",
                self.cursors.stop_sequences.position()
            );
        }

        Ok(self.into_report())
    }

    async fn reconcile_route<S: ReconcileSink>(
        &mut self,
        route: RouteId,
        sink: &mut S,
    ) -> Result<(), SyncError> {
        let mut matched = false;
        if let Some(held) = self.held.remove(&route) {
            log::debug!("Route {} had {} trips held from earlier routes", route, held.len());
            matched = true;
            for trip in held {
                self.process_trip(trip, sink).await?;
            }
        }

        while let Some(trip) = self.cursors.trips.peek() {
            if trip.route == route {
                matched = true;
            } else if self.completed.contains(&trip.route) {
                log::debug!("Trip {} of finished route {} found late", trip.id, trip.route);
                self.report.late_trips += 1;
            } else if matched {
                // Start of the next route's run.
                break;
            } else {
                self.cursors.trips.advance();
                self.held.entry(trip.route).or_default().push(trip);
                continue;
            }
            self.cursors.trips.advance();
            self.process_trip(trip, sink).await?;
        }
        Ok(())
    }

    async fn process_trip<S: ReconcileSink>(
        &mut self,
        trip: &'a Trip,
        sink: &mut S,
    ) -> Result<(), SyncError> {
        if !self.scheduled.insert(trip.id) {
            self.report.duplicate_trips.push(trip.id);
            return Ok(());
        }
        if !self.owners.has_stop_times(&trip.id) {
            self.report.trips_without_times.push(trip.id);
            return Ok(());
        }

        let key = trip.route_direction();
        if self.resolved.contains(&key) {
            self.skip_stop_sequence(trip.id);
        } else {
            let stops = match self.repair.take_stops(&key) {
                Some(stops) => {
                    log::debug!("Had stops of {} saved", key);
                    stops
                }
                None => {
                    let stops = self.scan_stop_sequence(trip.id);
                    // Trips of the same route direction met before this one were filed under
                    // the key this scan just resolved.
                    if self.repair.take_stops(&key).is_some() {
                        log::debug!("Dropped stops of {} found ahead of trip {}", key, trip.id);
                    }
                    stops
                }
            };
            self.resolved.insert(key);
            if stops.is_empty() {
                log::warn!("No stops found for {} on trip {}", key, trip.id);
            } else {
                sink.route_direction_stops(RouteDirectionStops { key, stops }).await?;
                self.report.route_direction_rows += 1;
            }
        }

        let starting_time = match self.repair.take_start_time(&trip.id) {
            Some(time) => {
                log::debug!("Had time of trip {} saved", trip.id);
                Some(time)
            }
            None => self.scan_start_time(trip.id),
        };
        match starting_time {
            Some(time) => {
                if time.day_overflow() > 0 {
                    log::debug!("Trip {} starts past midnight at {}", trip.id, time);
                }
                sink.trip_schedule(TripSchedule {
                    trip: trip.id,
                    route: trip.route,
                    service: trip.service,
                    starting_time: time.normalized(),
                })
                .await?;
                self.report.trip_rows += 1;
            }
            None => self.report.trips_without_times.push(trip.id),
        }
        Ok(())
    }

    /// Collects the stops of `target` from the stop-sequence cursor. Rows of other trips met
    /// before it are filed under their own route direction.
    fn scan_stop_sequence(&mut self, target: TripId) -> Vec<StopId> {
        let mut stops = vec![];
        while let Some(row) = self.cursors.stop_sequences.peek() {
            if row.trip == target {
                stops.push(row.stop);
            } else if !stops.is_empty() {
                break;
            } else {
                self.harvest_stop(row);
            }
            self.last_stop_sequence_trip = Some(row.trip);
            self.cursors.stop_sequences.advance();
        }
        stops
    }

    fn skip_stop_sequence(&mut self, target: TripId) {
        while let Some(row) = self.cursors.stop_sequences.peek() {
            if row.trip != target {
                break;
            }
            self.last_stop_sequence_trip = Some(row.trip);
            self.cursors.stop_sequences.advance();
        }
    }

    fn harvest_stop(&mut self, row: &StopTimeEntry) {
        let Some(key) = self.owners.owner(&row.trip) else {
            self.unknown_trips.insert(row.trip);
            return;
        };
        if self.resolved.contains(&key) {
            return;
        }
        let opens_trip = self.last_stop_sequence_trip != Some(row.trip);
        self.repair.record_stop(key, row.stop, opens_trip);
    }

    /// Finds the first departure of `target` on the start-time cursor, remembering the first
    /// departure of every other trip met before it.
    fn scan_start_time(&mut self, target: TripId) -> Option<ScheduleTime> {
        let mut seen = false;
        let mut time = None;
        while let Some(row) = self.cursors.start_times.peek() {
            if row.trip == target {
                seen = true;
                time = time.or(row.departure);
            } else if seen {
                break;
            } else if let Some(departure) = row.departure {
                self.repair.record_start_time(row.trip, departure);
            }
            self.cursors.start_times.advance();
        }
        time
    }

    fn into_report(self) -> ReconcileReport {
        let mut report = self.report;
        let mut held: Vec<_> = self.held.into_values().flatten().map(|trip| trip.id).collect();
        held.sort();
        report.held_residue = held;

        if !self.repair.is_drained() {
            let (stops, mut times) = self.repair.into_residue();
            // Start times of trips unknown to trips.txt are already reported through unknown_trips.
            times.retain(|trip| !self.unknown_trips.contains(trip));
            report.undrained_stops = stops;
            report.undrained_start_times = times;
        }

        let mut unknown: Vec<_> = self.unknown_trips.into_iter().collect();
        unknown.sort();
        report.unknown_trips = unknown;
        report.split_trips = self.owners.split_trips().to_vec();
        report
    }
}
