use std::{fmt, str::FromStr};

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqliteConnection, SqlitePool,
};
use ustr::ustr;

use crate::{
    error::SyncError,
    model::{
        Direction, RouteDirection, RouteDirectionStops, RouteId, ServiceDay, ServiceId, StopId,
        StopInfo, TripId, TripSchedule,
    },
    schedule_time::ScheduleTime,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Relation {
    Stops,
    ServiceModes,
    TripSchedule,
    RouteDirectionStops,
}

impl Relation {
    pub fn table_name(self) -> &'static str {
        match self {
            Relation::Stops => "Stops",
            Relation::ServiceModes => "ServiceModes",
            Relation::TripSchedule => "TripSchedule",
            Relation::RouteDirectionStops => "RouteDirectionStops",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

impl FromStr for Relation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Stops" | "StopsInfo" => Ok(Relation::Stops),
            "ServiceModes" => Ok(Relation::ServiceModes),
            "TripSchedule" | "BusTrips" => Ok(Relation::TripSchedule),
            "RouteDirectionStops" | "BusRouteStops" => Ok(Relation::RouteDirectionStops),
            other => Err(other.to_string()),
        }
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS Stops (
        StopID INTEGER PRIMARY KEY,
        StopName TEXT NOT NULL,
        Latitude REAL NOT NULL,
        Longitude REAL NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ServiceModes (
        DayOfYear INTEGER PRIMARY KEY,
        Services TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS TripSchedule (
        TripID TEXT PRIMARY KEY,
        RouteID TEXT NOT NULL,
        RouteService TEXT NOT NULL,
        StartingTime TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS RouteDirectionStops (
        RouteDirectionKey TEXT PRIMARY KEY,
        RouteID TEXT NOT NULL,
        Stops TEXT NOT NULL,
        Direction BOOLEAN NOT NULL
    )",
];

/// Owner of the store connection pool. Dropping the value without calling [`Store::close`]
/// still releases the connections, but `close` waits for them to shut down.
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, SyncError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(SyncError::Connect)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(SyncError::Connect)?;
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(SyncError::Connect)?;
        }
        log::info!("Store connection successful");
        Ok(Store { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn clear(&self, relation: Relation) -> Result<(), SyncError> {
        let statement = format!("DELETE FROM {}", relation.table_name());
        sqlx::query(&statement)
            .execute(&self.pool)
            .await
            .map_err(|source| SyncError::Clear { relation, source })?;
        log::info!("Cleared table {}", relation);
        Ok(())
    }

    pub async fn count(&self, relation: Relation) -> Result<i64, sqlx::Error> {
        let statement = format!("SELECT COUNT(*) FROM {}", relation.table_name());
        sqlx::query_scalar(&statement)
            .fetch_one(&self.pool)
            .await
    }

    pub async fn close(self) {
        self.pool.close().await;
        log::info!("Store connection closed");
    }
}

/// A row with a primary key in one of the store's tables.
pub trait StoredRow: PartialEq + Sized {
    const RELATION: Relation;

    /// Primary key, as shown in diagnostics.
    fn key(&self) -> String;

    /// Reads the stored row that has the same primary key as `self`.
    async fn fetch_stored(&self, conn: &mut SqliteConnection) -> sqlx::Result<Option<Self>>;

    async fn insert(&self, conn: &mut SqliteConnection) -> sqlx::Result<()>;

    async fn delete(&self, conn: &mut SqliteConnection) -> sqlx::Result<()>;
}

fn decode_error(error: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(error))
}

fn encode_error(error: impl std::error::Error + Send + Sync + 'static) -> sqlx::Error {
    sqlx::Error::Encode(Box::new(error))
}

impl StoredRow for StopInfo {
    const RELATION: Relation = Relation::Stops;

    fn key(&self) -> String {
        self.id.to_string()
    }

    async fn fetch_stored(&self, conn: &mut SqliteConnection) -> sqlx::Result<Option<Self>> {
        let row = sqlx::query("SELECT StopName, Latitude, Longitude FROM Stops WHERE StopID = ?")
            .bind(self.id.0)
            .fetch_optional(&mut *conn)
            .await?;
        row.map(|row| -> sqlx::Result<Self> {
            Ok(StopInfo {
                id: self.id,
                name: row.try_get("StopName")?,
                latitude: row.try_get("Latitude")?,
                longitude: row.try_get("Longitude")?,
            })
        })
        .transpose()
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> sqlx::Result<()> {
        sqlx::query("INSERT INTO Stops (StopID, StopName, Latitude, Longitude) VALUES (?, ?, ?, ?)")
            .bind(self.id.0)
            .bind(&self.name)
            .bind(self.latitude)
            .bind(self.longitude)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, conn: &mut SqliteConnection) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM Stops WHERE StopID = ?")
            .bind(self.id.0)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

impl StoredRow for ServiceDay {
    const RELATION: Relation = Relation::ServiceModes;

    fn key(&self) -> String {
        self.day.to_string()
    }

    async fn fetch_stored(&self, conn: &mut SqliteConnection) -> sqlx::Result<Option<Self>> {
        let services: Option<String> =
            sqlx::query_scalar("SELECT Services FROM ServiceModes WHERE DayOfYear = ?")
                .bind(i64::from(self.day))
                .fetch_optional(&mut *conn)
                .await?;
        services
            .map(|services| -> sqlx::Result<Self> {
                Ok(ServiceDay {
                    day: self.day,
                    services: serde_json::from_str(&services).map_err(decode_error)?,
                })
            })
            .transpose()
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> sqlx::Result<()> {
        let services = serde_json::to_string(&self.services).map_err(encode_error)?;
        sqlx::query("INSERT INTO ServiceModes (DayOfYear, Services) VALUES (?, ?)")
            .bind(i64::from(self.day))
            .bind(services)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, conn: &mut SqliteConnection) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM ServiceModes WHERE DayOfYear = ?")
            .bind(i64::from(self.day))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

impl StoredRow for TripSchedule {
    const RELATION: Relation = Relation::TripSchedule;

    fn key(&self) -> String {
        self.trip.to_string()
    }

    async fn fetch_stored(&self, conn: &mut SqliteConnection) -> sqlx::Result<Option<Self>> {
        let row = sqlx::query(
            "SELECT RouteID, RouteService, StartingTime FROM TripSchedule WHERE TripID = ?",
        )
        .bind(self.trip.0.as_str())
        .fetch_optional(&mut *conn)
        .await?;
        row.map(|row| -> sqlx::Result<Self> {
            let starting_time: String = row.try_get("StartingTime")?;
            Ok(TripSchedule {
                trip: self.trip,
                route: RouteId(ustr(row.try_get("RouteID")?)),
                service: ServiceId(ustr(row.try_get("RouteService")?)),
                starting_time: starting_time
                    .parse::<ScheduleTime>()
                    .map_err(decode_error)?,
            })
        })
        .transpose()
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> sqlx::Result<()> {
        sqlx::query(
            "INSERT INTO TripSchedule (TripID, RouteID, RouteService, StartingTime) VALUES (?, ?, ?, ?)",
        )
        .bind(self.trip.0.as_str())
        .bind(self.route.0.as_str())
        .bind(self.service.0.as_str())
        .bind(self.starting_time.to_string())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn delete(&self, conn: &mut SqliteConnection) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM TripSchedule WHERE TripID = ?")
            .bind(self.trip.0.as_str())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

fn route_direction_stops_from_row(row: SqliteRow) -> sqlx::Result<RouteDirectionStops> {
    let route: String = row.try_get("RouteID")?;
    let stops: String = row.try_get("Stops")?;
    let inbound: bool = row.try_get("Direction")?;
    Ok(RouteDirectionStops {
        key: RouteDirection::new(RouteId(ustr(&route)), Direction::from_flag(inbound)),
        stops: serde_json::from_str::<Vec<StopId>>(&stops).map_err(decode_error)?,
    })
}

impl StoredRow for RouteDirectionStops {
    const RELATION: Relation = Relation::RouteDirectionStops;

    fn key(&self) -> String {
        self.key.to_string()
    }

    async fn fetch_stored(&self, conn: &mut SqliteConnection) -> sqlx::Result<Option<Self>> {
        sqlx::query(
            "SELECT RouteID, Stops, Direction FROM RouteDirectionStops WHERE RouteDirectionKey = ?",
        )
        .bind(self.key.to_string())
        .fetch_optional(&mut *conn)
        .await?
        .map(route_direction_stops_from_row)
        .transpose()
    }

    async fn insert(&self, conn: &mut SqliteConnection) -> sqlx::Result<()> {
        let stops = serde_json::to_string(&self.stops).map_err(encode_error)?;
        sqlx::query(
            "INSERT INTO RouteDirectionStops (RouteDirectionKey, RouteID, Stops, Direction) VALUES (?, ?, ?, ?)",
        )
        .bind(self.key.to_string())
        .bind(self.key.route.0.as_str())
        .bind(stops)
        .bind(self.key.direction.flag())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn delete(&self, conn: &mut SqliteConnection) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM RouteDirectionStops WHERE RouteDirectionKey = ?")
            .bind(self.key.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
