//! Batching of consumed records across partitions
//!
//! The reader feeds every event of the poll loop into a [`BatchState`]. A
//! batch is handed out when it is full or when the last assigned partition
//! reaches its end. Empty batches are never handed out, and an error that
//! interrupts a partial batch is held back until that batch was delivered.

use crate::error::{IngestError, Result};
use std::collections::BTreeSet;

#[derive(Debug)]
pub struct BatchState<T> {
    batch_size: usize,
    remaining: BTreeSet<i32>,
    batch: Vec<T>,
    pending_error: Option<IngestError>,
    finished: bool,
}

impl<T> BatchState<T> {
    pub fn new(batch_size: usize, partitions: impl IntoIterator<Item = i32>) -> Self {
        let remaining: BTreeSet<i32> = partitions.into_iter().collect();
        Self {
            batch_size: batch_size.max(1),
            finished: remaining.is_empty(),
            remaining,
            batch: Vec::new(),
            pending_error: None,
        }
    }

    /// No more batches or errors will be produced
    pub fn is_finished(&self) -> bool {
        self.finished && self.pending_error.is_none()
    }

    pub fn remaining_partitions(&self) -> &BTreeSet<i32> {
        &self.remaining
    }

    fn take_batch(&mut self) -> Option<Vec<T>> {
        if self.batch.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.batch))
        }
    }

    /// Adds a record, returning the batch once it is full
    pub fn push(&mut self, item: T) -> Option<Vec<T>> {
        self.batch.push(item);
        if self.batch.len() >= self.batch_size {
            self.take_batch()
        } else {
            None
        }
    }

    /// Marks `partition` as exhausted; after the last one the remainder is returned
    pub fn partition_eof(&mut self, partition: i32) -> Option<Vec<T>> {
        self.remaining.remove(&partition);
        if self.remaining.is_empty() {
            self.finished = true;
            self.take_batch()
        } else {
            None
        }
    }

    /// Stops the reader. A partial batch is returned first and the error is
    /// kept for [`BatchState::take_error`].
    pub fn fail(&mut self, error: IngestError) -> Result<Option<Vec<T>>> {
        self.finished = true;
        match self.take_batch() {
            Some(batch) => {
                self.pending_error = Some(error);
                Ok(Some(batch))
            },
            None => Err(error),
        }
    }

    pub fn take_error(&mut self) -> Option<IngestError> {
        self.pending_error.take()
    }
}
