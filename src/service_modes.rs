use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};

use crate::{feed::CalendarException, model::ServiceDay};

fn day_key(date: NaiveDate) -> u32 {
    date.year() as u32 * 10_000 + date.month() * 100 + date.day()
}

/// Lists the services added on each day of the feed's year.
///
/// The year is taken from the first exception row. Every day of that year gets an entry,
/// days without services included. Removal exceptions are ignored.
pub fn expand_service_days(exceptions: &[CalendarException]) -> Vec<ServiceDay> {
    let Some(first) = exceptions.first() else {
        return vec![];
    };
    let year = first.date.year();
    let Some(new_year) = NaiveDate::from_ymd_opt(year, 1, 1) else {
        return vec![];
    };

    let mut services_by_day: HashMap<NaiveDate, Vec<&str>> = HashMap::new();
    for exception in exceptions.iter().filter(|exception| exception.added) {
        let services = services_by_day.entry(exception.date).or_default();
        let service = exception.service.0.as_str();
        if !services.contains(&service) {
            services.push(service);
        }
    }

    new_year
        .iter_days()
        .take_while(|date| date.year() == year)
        .map(|date| ServiceDay {
            day: day_key(date),
            services: services_by_day
                .get(&date)
                .map(|services| services.join(","))
                .unwrap_or_default(),
        })
        .collect()
}
