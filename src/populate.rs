use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    cancel::CancelToken,
    cli::{Step, Verb},
    error::SyncError,
    feed::{self, Feed},
    reconcile::{ReconcileReport, Reconciler},
    service_modes,
    sink::{DerivedRowWriter, SinkMode, SinkStats, SinkWriter},
    store::{Relation, Store, StoredRow},
};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DerivedOutcome {
    pub report: ReconcileReport,
    pub route_stops: Option<SinkStats>,
    pub trip_schedules: Option<SinkStats>,
}

async fn write_all<R: StoredRow>(
    store: &Store,
    rows: &[R],
    mode: SinkMode,
    cancel: &CancelToken,
) -> Result<SinkStats, SyncError> {
    let mut writer = SinkWriter::new(store, R::RELATION, mode);
    for row in rows {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        writer.write(row).await?;
    }
    writer.log_summary();
    Ok(writer.stats())
}

pub async fn set_stops(
    store: &Store,
    feed: &Feed,
    mode: SinkMode,
    cancel: &CancelToken,
) -> Result<SinkStats, SyncError> {
    write_all(store, &feed.stops, mode, cancel).await
}

pub async fn set_service_modes(
    store: &Store,
    feed: &Feed,
    mode: SinkMode,
    cancel: &CancelToken,
) -> Result<SinkStats, SyncError> {
    let days = service_modes::expand_service_days(&feed.calendar_dates);
    if days.is_empty() {
        log::warn!("Feed has no calendar dates, table ServiceModes left as is");
    }
    write_all(store, &days, mode, cancel).await
}

fn route_progress_bar(routes: usize) -> ProgressBar {
    let style = ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {human_pos:>7}/{human_len:7} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::new(routes as u64)
        .with_style(style)
        .with_message("Reconcile routes.")
}

/// Runs the reconciliation pass and stores the relations that have a mode. Passing `None`
/// for a relation still computes it but leaves its table untouched.
pub async fn set_trips_and_route_stops(
    store: &Store,
    feed: &Feed,
    route_stops_mode: Option<SinkMode>,
    trip_schedules_mode: Option<SinkMode>,
    strict: bool,
    cancel: &CancelToken,
) -> Result<DerivedOutcome, SyncError> {
    let mut writer = DerivedRowWriter {
        route_stops: route_stops_mode
            .map(|mode| SinkWriter::new(store, Relation::RouteDirectionStops, mode)),
        trip_schedules: trip_schedules_mode
            .map(|mode| SinkWriter::new(store, Relation::TripSchedule, mode)),
    };
    log::info!("This step may take a while");

    let report = Reconciler::new(&feed.routes, &feed.trips, &feed.stop_times)
        .with_cancel(cancel.clone())
        .with_progress(route_progress_bar(feed.routes.len()))
        .run(&mut writer)
        .await?;

    for sink in [&writer.route_stops, &writer.trip_schedules].into_iter().flatten() {
        sink.log_summary();
    }
    log::info!(
        "Derived {} route stop sequences and {} trip start times ({} trips found out of route order)",
        report.route_direction_rows,
        report.trip_rows,
        report.late_trips
    );
    report.log_anomalies();
    if strict && report.anomalies() > 0 {
        return Err(SyncError::Integrity(report.anomalies()));
    }

    Ok(DerivedOutcome {
        route_stops: writer.route_stops.as_ref().map(SinkWriter::stats),
        trip_schedules: writer.trip_schedules.as_ref().map(SinkWriter::stats),
        report,
    })
}

/// Executes a parsed command chain against one store.
pub struct Session<'s> {
    store: &'s Store,
    feed_dir: PathBuf,
    feed: Option<Feed>,
    cleared: HashSet<Relation>,
    strict: bool,
    cancel: CancelToken,
}

impl<'s> Session<'s> {
    pub fn new(store: &'s Store, feed_dir: &Path, strict: bool, cancel: CancelToken) -> Self {
        Session {
            store,
            feed_dir: feed_dir.to_path_buf(),
            feed: None,
            cleared: HashSet::new(),
            strict,
            cancel,
        }
    }

    /// Uses an already loaded feed instead of reading the feed directory.
    pub fn with_feed(mut self, feed: Feed) -> Self {
        self.feed = Some(feed);
        self
    }

    pub async fn run(&mut self, steps: &[Step]) -> Result<(), SyncError> {
        for step in steps {
            self.cancel.check()?;
            match step.verb {
                Verb::Clear => {
                    for &relation in &step.relations {
                        self.store.clear(relation).await?;
                        self.cleared.insert(relation);
                    }
                }
                Verb::Set => {
                    let feed = match self.feed.take() {
                        Some(feed) => feed,
                        None => {
                            let feed = feed::load_feed(&self.feed_dir)?;
                            self.cancel.check()?;
                            feed
                        }
                    };
                    let result = self.set(&feed, &step.relations).await;
                    self.feed = Some(feed);
                    result?;
                    // Refilled, so later sets of these relations have rows to compare against.
                    for relation in &step.relations {
                        self.cleared.remove(relation);
                    }
                }
            }
        }
        Ok(())
    }

    fn mode(&self, relation: Relation) -> SinkMode {
        if self.cleared.contains(&relation) {
            SinkMode::Clean
        } else {
            SinkMode::Verify
        }
    }

    async fn set(&self, feed: &Feed, relations: &[Relation]) -> Result<(), SyncError> {
        let mut derived_done = false;
        for &relation in relations {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            match relation {
                Relation::Stops => {
                    set_stops(self.store, feed, self.mode(relation), &self.cancel).await?;
                }
                Relation::ServiceModes => {
                    set_service_modes(self.store, feed, self.mode(relation), &self.cancel).await?;
                }
                Relation::TripSchedule | Relation::RouteDirectionStops => {
                    if derived_done {
                        continue;
                    }
                    derived_done = true;
                    let requested = |relation: Relation| {
                        relations.contains(&relation).then(|| self.mode(relation))
                    };
                    set_trips_and_route_stops(
                        self.store,
                        feed,
                        requested(Relation::RouteDirectionStops),
                        requested(Relation::TripSchedule),
                        self.strict,
                        &self.cancel,
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cli::parse_chain,
        feed::CalendarException,
        model::{Direction, RouteId, ServiceId, StopId, StopInfo, StopTimeEntry, Trip, TripId},
        schedule_time::ScheduleTime,
    };
    use chrono::NaiveDate;
    use ustr::ustr;

    fn sample_feed() -> Feed {
        let trip = |id: &str, route: &str, direction| Trip {
            id: TripId(ustr(id)),
            route: RouteId(ustr(route)),
            service: ServiceId(ustr("svc1")),
            direction,
        };
        let stop_time = |trip: &str, stop: i64, sequence: u16, time: &str| StopTimeEntry {
            trip: TripId(ustr(trip)),
            stop: StopId(stop),
            sequence,
            departure: Some(time.parse().unwrap()),
        };
        Feed {
            routes: vec![RouteId(ustr("R1")), RouteId(ustr("R2"))],
            trips: vec![
                trip("A", "R1", Direction::Outbound),
                trip("C", "R1", Direction::Outbound),
                trip("B", "R2", Direction::Inbound),
            ],
            stop_times: vec![
                stop_time("A", 10, 1, "08:00:00"),
                stop_time("A", 11, 2, "08:05:00"),
                stop_time("C", 10, 1, "08:30:00"),
                stop_time("C", 11, 2, "08:35:00"),
                stop_time("B", 20, 1, "24:30:00"),
                stop_time("B", 21, 2, "24:35:00"),
            ],
            stops: vec![
                StopInfo {
                    id: StopId(10),
                    name: "Cais".to_string(),
                    latitude: 38.70,
                    longitude: -9.14,
                },
                StopInfo {
                    id: StopId(11),
                    name: "Rossio".to_string(),
                    latitude: 38.71,
                    longitude: -9.13,
                },
            ],
            calendar_dates: vec![CalendarException {
                service: ServiceId(ustr("svc1")),
                date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
                added: true,
            }],
        }
    }

    #[tokio::test]
    async fn second_verify_run_changes_nothing() {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        let feed = sample_feed();
        let cancel = CancelToken::new();
        let verify = Some(SinkMode::Verify);

        let first = set_trips_and_route_stops(&store, &feed, verify, verify, true, &cancel)
            .await
            .unwrap();
        assert_eq!(first.trip_schedules.unwrap().inserted, 3);
        assert_eq!(first.route_stops.unwrap().inserted, 2);

        let second = set_trips_and_route_stops(&store, &feed, verify, verify, true, &cancel)
            .await
            .unwrap();
        let trips = second.trip_schedules.unwrap();
        let route_stops = second.route_stops.unwrap();
        assert_eq!((trips.inserted, trips.replaced, trips.unchanged), (0, 0, 3));
        assert_eq!((route_stops.inserted, route_stops.replaced, route_stops.unchanged), (0, 0, 2));

        assert_eq!(store.count(Relation::TripSchedule).await.unwrap(), 3);
        assert_eq!(store.count(Relation::RouteDirectionStops).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn stale_rows_are_replaced() {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        let cancel = CancelToken::new();
        {
            let mut conn = store.pool().acquire().await.unwrap();
            crate::model::TripSchedule {
                trip: TripId(ustr("A")),
                route: RouteId(ustr("R1")),
                service: ServiceId(ustr("old")),
                starting_time: ScheduleTime::from_hms(7, 0, 0),
            }
            .insert(&mut *conn)
            .await
            .unwrap();
        }

        let feed = sample_feed();
        let verify = Some(SinkMode::Verify);
        let outcome = set_trips_and_route_stops(&store, &feed, None, verify, false, &cancel)
            .await
            .unwrap();

        let trips = outcome.trip_schedules.unwrap();
        assert_eq!((trips.inserted, trips.replaced), (2, 1));
        assert!(outcome.route_stops.is_none());
        let (service, time): (String, String) = sqlx::query_as(
            "SELECT RouteService, StartingTime FROM TripSchedule WHERE TripID = 'A'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!((service.as_str(), time.as_str()), ("svc1", "08:00:00"));
        let night: String =
            sqlx::query_scalar("SELECT StartingTime FROM TripSchedule WHERE TripID = 'B'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(night, "00:30:00");
        assert_eq!(store.count(Relation::RouteDirectionStops).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn strict_mode_fails_on_anomalies() {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        let mut feed = sample_feed();
        feed.trips.push(Trip {
            id: TripId(ustr("ghost")),
            route: RouteId(ustr("Missing")),
            service: ServiceId(ustr("svc1")),
            direction: Direction::Outbound,
        });

        let result = set_trips_and_route_stops(
            &store,
            &feed,
            Some(SinkMode::Verify),
            Some(SinkMode::Verify),
            true,
            &CancelToken::new(),
        )
        .await;

        assert!(matches!(result, Err(SyncError::Integrity(1))));
    }

    #[tokio::test]
    async fn session_runs_a_clear_and_set_chain() {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        let steps = parse_chain(&[
            "set",
            "Stops",
            "clear",
            "Stops",
            "TripSchedule",
            "set",
            "Stops",
            "ServiceModes",
            "TripSchedule",
            "RouteDirectionStops",
        ])
        .unwrap();

        let mut session = Session::new(&store, Path::new("unused"), true, CancelToken::new())
            .with_feed(sample_feed());
        session.run(&steps).await.unwrap();

        assert_eq!(session.mode(Relation::Stops), SinkMode::Verify);
        assert_eq!(session.mode(Relation::ServiceModes), SinkMode::Verify);
        assert_eq!(store.count(Relation::Stops).await.unwrap(), 2);
        assert_eq!(store.count(Relation::ServiceModes).await.unwrap(), 366);
        assert_eq!(store.count(Relation::TripSchedule).await.unwrap(), 3);
        assert_eq!(store.count(Relation::RouteDirectionStops).await.unwrap(), 2);

        let services: String =
            sqlx::query_scalar("SELECT Services FROM ServiceModes WHERE DayOfYear = 20240305")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(services, "\"svc1\"");
    }

    #[tokio::test]
    async fn table_cleared_once_can_be_set_twice() {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        let steps = parse_chain(&[
            "clear",
            "Stops",
            "TripSchedule",
            "set",
            "Stops",
            "TripSchedule",
            "set",
            "Stops",
            "TripSchedule",
            "RouteDirectionStops",
        ])
        .unwrap();

        let mut session = Session::new(&store, Path::new("unused"), true, CancelToken::new())
            .with_feed(sample_feed());
        session.run(&steps).await.unwrap();

        assert_eq!(session.mode(Relation::Stops), SinkMode::Verify);
        assert_eq!(session.mode(Relation::TripSchedule), SinkMode::Verify);
        assert_eq!(store.count(Relation::Stops).await.unwrap(), 2);
        assert_eq!(store.count(Relation::TripSchedule).await.unwrap(), 3);
        assert_eq!(store.count(Relation::RouteDirectionStops).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn interrupt_between_steps_skips_the_rest_of_the_chain() {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        let cancel = CancelToken::new();
        let mut session = Session::new(&store, Path::new("unused"), false, cancel.clone())
            .with_feed(sample_feed());
        session.run(&parse_chain(&["set", "Stops"]).unwrap()).await.unwrap();

        cancel.cancel();
        let result = session.run(&parse_chain(&["clear", "Stops"]).unwrap()).await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(store.count(Relation::Stops).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn cancelled_session_stops_before_writing() {
        let store = Store::connect("sqlite::memory:").await.unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let steps = parse_chain(&["set", "Stops"]).unwrap();

        let mut session =
            Session::new(&store, Path::new("unused"), false, cancel).with_feed(sample_feed());
        let result = session.run(&steps).await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(store.count(Relation::Stops).await.unwrap(), 0);
    }
}
