//! Result streams
//!
//! A [`ResultStream`] is a single-pass view over the records of one query.
//! Records are pulled from the server in batches of the session's fetch
//! size and handed out exactly once. The stream is only usable while its
//! transaction is open.

use crate::transaction::{Batch, TxShared};
use arbor_core::{DriverError, DriverResult, Record, ResultSummary};
use arbor_transport::QueryId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Records produced by one query
///
/// Also an `Iterator<Item = DriverResult<Record>>`; iteration stops after
/// the first error.
pub struct ResultStream {
    tx: Arc<Mutex<TxShared>>,
    qid: QueryId,
    keys: Arc<[String]>,
    summary: Option<ResultSummary>,
    exhausted: bool,
    errored: bool,
}

impl ResultStream {
    pub(crate) fn new(tx: Arc<Mutex<TxShared>>, qid: QueryId, keys: Arc<[String]>) -> Self {
        Self {
            tx,
            qid,
            keys,
            summary: None,
            exhausted: false,
            errored: false,
        }
    }

    /// Column names
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Whether every record has been handed out
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn absorb(&mut self, batch: Batch) -> Vec<Record> {
        if let Some(summary) = batch.summary {
            self.summary = Some(summary);
            self.exhausted = true;
        }
        batch.records
    }

    /// Take up to `n` records
    ///
    /// Returns fewer than `n` only when the stream runs out.
    ///
    /// # Errors
    /// `ResultConsumed` once the transaction has ended, or the transport
    /// error that ended it.
    pub fn fetch(&mut self, n: usize) -> DriverResult<Vec<Record>> {
        if self.exhausted || n == 0 {
            return Ok(Vec::new());
        }
        let batch = self.tx.lock().take(self.qid, n)?;
        Ok(self.absorb(batch))
    }

    /// The next record, left in place
    pub fn peek(&mut self) -> DriverResult<Option<Record>> {
        if self.exhausted {
            return Ok(None);
        }
        self.tx.lock().peek(self.qid)
    }

    /// The only record of the stream
    ///
    /// Reads at most two records and then exhausts the stream.
    ///
    /// With `strict`, anything but exactly one record fails with
    /// `ResultNotSingle`. Without it, no records yields `None` and several
    /// records yield the first; the rest are discarded. Both cases log a
    /// warning.
    pub fn single(&mut self, strict: bool) -> DriverResult<Option<Record>> {
        let mut records = self.fetch(2)?;
        let count = records.len();
        self.consume()?;

        match (count, strict) {
            (1, _) => Ok(records.pop()),
            (0, true) => Err(DriverError::ResultNotSingle {
                reason: "expected exactly one record, found none".to_string(),
            }),
            (_, true) => Err(DriverError::ResultNotSingle {
                reason: "expected exactly one record, found more".to_string(),
            }),
            (0, false) => {
                warn!(target: "arbor::result", "Expected a single record, found none");
                Ok(None)
            }
            (_, false) => {
                warn!(
                    target: "arbor::result",
                    "Expected a single record, found several; keeping the first and discarding the rest"
                );
                Ok(Some(records.swap_remove(0)))
            }
        }
    }

    /// Discard whatever is left and return the summary
    ///
    /// Calling it again returns the same summary.
    pub fn consume(&mut self) -> DriverResult<ResultSummary> {
        if let Some(summary) = &self.summary {
            return Ok(summary.clone());
        }
        let summary = self.tx.lock().consume(self.qid)?;
        self.summary = Some(summary.clone());
        self.exhausted = true;
        Ok(summary)
    }
}

impl Iterator for ResultStream {
    type Item = DriverResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted || self.errored {
            return None;
        }
        match self.fetch(1) {
            Ok(mut records) => records.pop().map(Ok),
            Err(e) => {
                self.errored = true;
                Some(Err(e))
            }
        }
    }
}

impl fmt::Debug for ResultStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStream")
            .field("qid", &self.qid)
            .field("keys", &self.keys)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}
