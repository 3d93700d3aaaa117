use crate::{
    error::SyncError,
    model::{RouteDirectionStops, TripSchedule},
    reconcile::ReconcileSink,
    store::{Relation, Store, StoredRow},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    /// Compare every row against the stored one before writing.
    Verify,
    /// The table was cleared earlier in this invocation, so rows are inserted blindly.
    Clean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Inserted,
    Replaced,
    Unchanged,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SinkStats {
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
}

impl SinkStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Inserted => self.inserted += 1,
            Outcome::Replaced => self.replaced += 1,
            Outcome::Unchanged => self.unchanged += 1,
        }
    }
}

/// Writes the rows of one relation, keeping the table free of duplicates across reruns.
pub struct SinkWriter<'s> {
    store: &'s Store,
    relation: Relation,
    mode: SinkMode,
    stats: SinkStats,
}

impl<'s> SinkWriter<'s> {
    pub fn new(store: &'s Store, relation: Relation, mode: SinkMode) -> Self {
        match mode {
            SinkMode::Verify => log::info!("Verifying and setting table {}", relation),
            SinkMode::Clean => log::info!("Setting table {}", relation),
        }
        SinkWriter {
            store,
            relation,
            mode,
            stats: SinkStats::default(),
        }
    }

    pub fn stats(&self) -> SinkStats {
        self.stats
    }

    pub async fn write<R: StoredRow>(&mut self, row: &R) -> Result<Outcome, SyncError> {
        debug_assert_eq!(R::RELATION, self.relation);
        let outcome = self
            .upsert(row)
            .await
            .map_err(|source| SyncError::Persist {
                relation: R::RELATION,
                key: row.key(),
                source,
            })?;
        self.stats.record(outcome);
        Ok(outcome)
    }

    async fn upsert<R: StoredRow>(&self, row: &R) -> sqlx::Result<Outcome> {
        let pool = self.store.pool();
        if self.mode == SinkMode::Clean {
            row.insert(&mut *pool.acquire().await?).await?;
            return Ok(Outcome::Inserted);
        }

        let stored = row.fetch_stored(&mut *pool.acquire().await?).await?;
        match stored {
            None => {
                row.insert(&mut *pool.acquire().await?).await?;
                Ok(Outcome::Inserted)
            }
            Some(stored) if stored == *row => Ok(Outcome::Unchanged),
            Some(_) => {
                log::debug!("Replacing row {} of table {}", row.key(), self.relation);
                let mut tx = pool.begin().await?;
                row.delete(&mut tx).await?;
                row.insert(&mut tx).await?;
                tx.commit().await?;
                Ok(Outcome::Replaced)
            }
        }
    }

    pub fn log_summary(&self) {
        log::info!(
            "Table {} set: {} inserted, {} replaced, {} unchanged",
            self.relation,
            self.stats.inserted,
            self.stats.replaced,
            self.stats.unchanged
        );
    }
}

/// Routes the reconciliation output to the writers of the requested derived relations.
/// A relation without a writer is computed but not stored.
pub struct DerivedRowWriter<'s> {
    pub route_stops: Option<SinkWriter<'s>>,
    pub trip_schedules: Option<SinkWriter<'s>>,
}

impl ReconcileSink for DerivedRowWriter<'_> {
    async fn route_direction_stops(&mut self, row: RouteDirectionStops) -> Result<(), SyncError> {
        if let Some(writer) = &mut self.route_stops {
            writer.write(&row).await?;
        }
        Ok(())
    }

    async fn trip_schedule(&mut self, row: TripSchedule) -> Result<(), SyncError> {
        if let Some(writer) = &mut self.trip_schedules {
            writer.write(&row).await?;
        }
        Ok(())
    }
}
