/// Forward-only read position over a materialized table.
///
/// A cursor is never rewound; it remembers where it stopped between calls so that work
/// across a whole pass stays linear in the table size.
#[derive(Debug)]
pub struct Cursor<'a, T> {
    rows: &'a [T],
    position: usize,
}

impl<'a, T> Cursor<'a, T> {
    pub fn new(rows: &'a [T]) -> Self {
        Cursor { rows, position: 0 }
    }

    pub fn peek(&self) -> Option<&'a T> {
        self.rows.get(self.position)
    }

    pub fn advance(&mut self) -> Option<&'a T> {
        let row = self.rows.get(self.position)?;
        self.position += 1;
        Some(row)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.rows.len()
    }
}

/// The three read positions used by one reconciliation pass: one over trips, and two over
/// stop times that move at different paces (stop discovery and start-time discovery).
#[derive(Debug)]
pub struct CursorSet<'a, Trip, StopTime> {
    pub trips: Cursor<'a, Trip>,
    pub stop_sequences: Cursor<'a, StopTime>,
    pub start_times: Cursor<'a, StopTime>,
}

impl<'a, Trip, StopTime> CursorSet<'a, Trip, StopTime> {
    pub fn new(trips: &'a [Trip], stop_times: &'a [StopTime]) -> Self {
        CursorSet {
            trips: Cursor::new(trips),
            stop_sequences: Cursor::new(stop_times),
            start_times: Cursor::new(stop_times),
        }
    }
}
