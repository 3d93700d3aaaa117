use std::{io::Cursor, path::Path};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use gtfs_structures::{DirectionType, Exception};
use ustr::ustr;

use crate::{
    model::{Direction, RouteId, ServiceId, StopId, StopInfo, StopTimeEntry, Trip, TripId},
    schedule_time::ScheduleTime,
};

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarException {
    pub service: ServiceId,
    pub date: NaiveDate,
    pub added: bool,
}

/// The tables of one feed snapshot, in file order.
#[derive(Debug, Default)]
pub struct Feed {
    pub routes: Vec<RouteId>,
    pub trips: Vec<Trip>,
    pub stop_times: Vec<StopTimeEntry>,
    pub stops: Vec<StopInfo>,
    pub calendar_dates: Vec<CalendarException>,
}

pub async fn download_feed(url: &str, feed_dir: &Path) -> Result<()> {
    log::info!("Downloading feed from {}", url);
    let bytes = reqwest::get(url)
        .await?
        .error_for_status()?
        .bytes()
        .await
        .with_context(|| format!("Failed to download {}", url))?;
    log::info!("Extracting {} bytes to {:?}", bytes.len(), feed_dir);
    std::fs::create_dir_all(feed_dir)?;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    archive.extract(feed_dir)?;
    Ok(())
}

fn parse_stop_id(id: &str) -> Result<StopId> {
    id.trim()
        .parse()
        .map(StopId)
        .with_context(|| format!("Stop id {:?} is not an integer", id))
}

pub fn load_feed(feed_dir: &Path) -> Result<Feed> {
    log::info!("Loading GTFS data from {:?}", feed_dir);
    let gtfs = gtfs_structures::RawGtfs::from_path(feed_dir)?;

    log::info!("Preparing routes.");
    // Only the identifiers are kept; the rest of the routes table is released here.
    let routes = gtfs
        .routes
        .context("Failed to read routes.txt")?
        .into_iter()
        .map(|route| RouteId(ustr(&route.id)))
        .collect();

    log::info!("Preparing trips.");
    let mut trips = vec![];
    for trip in gtfs.trips.context("Failed to read trips.txt")? {
        trips.push(Trip {
            id: TripId(ustr(&trip.id)),
            route: RouteId(ustr(&trip.route_id)),
            service: ServiceId(ustr(&trip.service_id)),
            direction: Direction::from_flag(trip.direction_id == Some(DirectionType::Inbound)),
        });
    }

    log::info!("Preparing stop times.");
    let mut stop_times = vec![];
    for stop_time in gtfs.stop_times.context("Failed to read stop_times.txt")? {
        stop_times.push(StopTimeEntry {
            trip: TripId(ustr(&stop_time.trip_id)),
            stop: parse_stop_id(&stop_time.stop_id)?,
            sequence: stop_time.stop_sequence,
            departure: stop_time
                .departure_time
                .or(stop_time.arrival_time)
                .map(ScheduleTime::from_seconds),
        });
    }

    log::info!("Preparing stops.");
    let mut stops = vec![];
    for stop in gtfs.stops.context("Failed to read stops.txt")? {
        let (Some(latitude), Some(longitude)) = (stop.latitude, stop.longitude) else {
            log::warn!("Skipping stop {} without coordinates", stop.id);
            continue;
        };
        stops.push(StopInfo {
            id: parse_stop_id(&stop.id)?,
            name: stop.name.clone().unwrap_or_default(),
            latitude,
            longitude,
        });
    }

    log::info!("Preparing calendar dates.");
    let mut calendar_dates = vec![];
    if let Some(dates) = gtfs.calendar_dates {
        for calendar_date in dates.context("Failed to read calendar_dates.txt")? {
            calendar_dates.push(CalendarException {
                service: ServiceId(ustr(&calendar_date.service_id)),
                date: calendar_date.date,
                added: calendar_date.exception_type == Exception::Added,
            });
        }
    }

    Ok(Feed {
        routes,
        trips,
        stop_times,
        stops,
        calendar_dates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_ids_must_be_integers() {
        assert_eq!(parse_stop_id("010203").unwrap(), StopId(10203));
        assert_eq!(parse_stop_id(" 7 ").unwrap(), StopId(7));
        assert!(parse_stop_id("A12").is_err());
    }
}
