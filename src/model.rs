use std::fmt;

use ustr::Ustr;

use crate::schedule_time::ScheduleTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteId(pub Ustr);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TripId(pub Ustr);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceId(pub Ustr);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct StopId(pub i64);

macro_rules! display_inner {
    ($($id:ty),*) => {
        $(impl fmt::Display for $id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        })*
    };
}

display_inner!(RouteId, TripId, ServiceId, StopId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    pub fn from_flag(flag: bool) -> Self {
        if flag {
            Direction::Inbound
        } else {
            Direction::Outbound
        }
    }

    pub fn flag(self) -> bool {
        self == Direction::Inbound
    }
}

/// A route travelled in one direction. Stop sequences are computed once per pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteDirection {
    pub route: RouteId,
    pub direction: Direction,
}

impl RouteDirection {
    pub fn new(route: RouteId, direction: Direction) -> Self {
        RouteDirection { route, direction }
    }
}

/// Renders as `<route>:<0|1>`. The direction is always the text after the last colon, so
/// distinct pairs never render to the same key.
impl fmt::Display for RouteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.route, u8::from(self.direction.flag()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trip {
    pub id: TripId,
    pub route: RouteId,
    pub service: ServiceId,
    pub direction: Direction,
}

impl Trip {
    pub fn route_direction(&self) -> RouteDirection {
        RouteDirection::new(self.route, self.direction)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopTimeEntry {
    pub trip: TripId,
    pub stop: StopId,
    pub sequence: u16,
    pub departure: Option<ScheduleTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteDirectionStops {
    pub key: RouteDirection,
    pub stops: Vec<StopId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TripSchedule {
    pub trip: TripId,
    pub route: RouteId,
    pub service: ServiceId,
    pub starting_time: ScheduleTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopInfo {
    pub id: StopId,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Services running on one calendar day. `day` is the date as `YYYYMMDD`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDay {
    pub day: u32,
    pub services: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ustr::ustr;

    #[test]
    fn route_direction_keys_do_not_collide() {
        let a = RouteDirection::new(RouteId(ustr("1")), Direction::Inbound);
        let b = RouteDirection::new(RouteId(ustr("11")), Direction::Outbound);
        assert_ne!(a.to_string(), b.to_string());
        assert_eq!(a.to_string(), "1:1");
        assert_eq!(b.to_string(), "11:0");
    }

    #[test]
    fn stop_ids_serialize_as_plain_integers() {
        let stops = vec![StopId(10), StopId(11), StopId(12)];
        assert_eq!(serde_json::to_string(&stops).unwrap(), "[10,11,12]");
    }
}
