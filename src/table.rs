/// Per-tick counter table read from the counter source
use std::collections::TryReserveError;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{debug, trace};

use crate::constants::MIN_TABLE_CAPACITY;
use crate::counters::{is_entity_line, parse_counter_line, CounterSnapshot};
use crate::error::ReadError;

/// Ordered counters for one tick. Index 0 is the aggregate row, indices
/// 1.. are cores in source order. Identity is positional.
#[derive(Debug)]
pub struct CounterTable {
    entries: Vec<CounterSnapshot>,
    /// Logical capacity, doubled whenever a read outgrows it
    capacity: usize,
}

impl CounterTable {
    /// Allocate an empty table able to hold `capacity` rows without growing.
    pub fn with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        let capacity = capacity.max(MIN_TABLE_CAPACITY);
        let mut entries = Vec::new();
        entries.try_reserve_exact(capacity)?;
        Ok(CounterTable { entries, capacity })
    }

    /// Number of rows read on the last successful refill.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The aggregate row, if the table holds any data.
    pub fn aggregate(&self) -> Option<&CounterSnapshot> {
        self.entries.first()
    }

    pub fn get(&self, index: usize) -> Option<&CounterSnapshot> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[CounterSnapshot] {
        &self.entries
    }

    /// Replace the table contents with a fresh read of `path`.
    ///
    /// The source is opened on every call. Lines that are not valid UTF-8,
    /// and entity rows that fail to parse, are skipped. On any error the
    /// table is left empty, so rows from an earlier read can never leak into
    /// a later one.
    ///
    /// # Returns
    /// Number of rows read, or `ReadError::NoData` if no valid row was found
    pub fn refill(&mut self, path: &Path) -> Result<usize, ReadError> {
        self.entries.clear();

        let file = File::open(path).map_err(|source| ReadError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        let mut raw = Vec::with_capacity(512);

        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw) {
                Ok(0) => break,
                Ok(_) => {}
                Err(source) => {
                    self.entries.clear();
                    return Err(ReadError::Io {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            }

            let line = match std::str::from_utf8(&raw) {
                Ok(line) => line,
                Err(err) => {
                    trace!(
                        "skipping non-UTF-8 line {:?}: {}",
                        String::from_utf8_lossy(&raw),
                        err
                    );
                    continue;
                }
            };
            if !is_entity_line(line) {
                continue;
            }
            match parse_counter_line(line) {
                Ok(snapshot) => {
                    if let Err(err) = self.push(snapshot) {
                        self.entries.clear();
                        return Err(err.into());
                    }
                }
                Err(err) => trace!("skipping line {:?}: {}", line.trim_end(), err),
            }
        }

        if self.entries.is_empty() {
            return Err(ReadError::NoData {
                path: path.to_path_buf(),
            });
        }
        Ok(self.entries.len())
    }

    /// Drop all rows and free the backing storage.
    pub fn release(&mut self) {
        self.entries = Vec::new();
        self.capacity = 0;
    }

    fn push(&mut self, snapshot: CounterSnapshot) -> Result<(), TryReserveError> {
        if self.entries.len() == self.capacity {
            self.grow(self.entries.len() + 1)?;
        }
        self.entries.push(snapshot);
        Ok(())
    }

    /// Double the logical capacity until it covers `needed` rows.
    fn grow(&mut self, needed: usize) -> Result<(), TryReserveError> {
        let mut capacity = self.capacity.max(1);
        while capacity < needed {
            capacity = capacity.saturating_mul(2);
        }
        self.entries
            .try_reserve_exact(capacity - self.entries.len())?;
        debug!("counter table grew from {} to {} rows", self.capacity, capacity);
        self.capacity = capacity;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn from_snapshots(snapshots: &[CounterSnapshot]) -> Self {
        let mut table = CounterTable::with_capacity(snapshots.len()).unwrap();
        table.entries.extend_from_slice(snapshots);
        table
    }
}

/// Read the whole counter source into a new table.
pub fn read_all(path: &Path, initial_capacity: usize) -> Result<CounterTable, ReadError> {
    let mut table = CounterTable::with_capacity(initial_capacity)?;
    table.refill(path)?;
    Ok(table)
}
