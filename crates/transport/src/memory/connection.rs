//! Connection into the loopback cluster

use super::store::TxView;
use super::{parse_bookmark, BeginRecord, ClusterShared, FaultPoint, BOOKMARK_PREFIX};
use crate::address::ServerAddress;
use crate::cancel::CancelToken;
use crate::connection::{BeginRequest, Connection, PullResponse, QueryId, RunResponse};
use arbor_core::{AccessMode, DriverError, DriverResult, Query, ResultSummary, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, trace};

struct PendingResult {
    query_text: String,
    rows: VecDeque<Vec<Value>>,
    counters: BTreeMap<String, i64>,
}

struct OpenTx {
    database: Option<String>,
    access_mode: AccessMode,
    writes: BTreeMap<String, Option<Value>>,
    results: HashMap<QueryId, PendingResult>,
}

/// One connection to one member of a [`MemoryCluster`](super::MemoryCluster)
pub struct MemoryConnection {
    shared: Arc<ClusterShared>,
    address: ServerAddress,
    tx: Option<OpenTx>,
    next_qid: QueryId,
    broken: bool,
}

impl MemoryConnection {
    pub(crate) fn new(shared: Arc<ClusterShared>, address: ServerAddress) -> Self {
        Self {
            shared,
            address,
            tx: None,
            next_qid: 0,
            broken: false,
        }
    }

    fn ensure_usable(&self) -> DriverResult<()> {
        if self.broken {
            return Err(DriverError::ConnectionReset {
                address: self.address.to_string(),
                reason: "connection is broken".to_string(),
            });
        }
        Ok(())
    }

    /// Fire a scripted fault; connection-fatal ones break the connection
    fn fault(&mut self, point: FaultPoint) -> DriverResult<()> {
        match self.shared.take_fault(point) {
            Some(err) => {
                if err.is_connection_fatal() {
                    self.broken = true;
                    self.tx = None;
                }
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn is_leader(&self) -> bool {
        self.shared.leader_address() == self.address
    }

    fn summary(&self, database: Option<String>, pending: PendingResult) -> ResultSummary {
        ResultSummary {
            query_text: pending.query_text,
            database,
            server: self.address.to_string(),
            counters: pending.counters,
            notifications: Vec::new(),
            result_available_after: None,
        }
    }

    fn open_tx(&mut self) -> DriverResult<&mut OpenTx> {
        self.tx
            .as_mut()
            .ok_or_else(|| DriverError::database("Request.Invalid", "no open transaction"))
    }
}

impl Connection for MemoryConnection {
    fn address(&self) -> &ServerAddress {
        &self.address
    }

    fn begin(&mut self, request: &BeginRequest) -> DriverResult<()> {
        self.ensure_usable()?;
        if self.tx.is_some() {
            return Err(DriverError::database(
                "Request.Invalid",
                "a transaction is already open on this connection",
            ));
        }
        self.fault(FaultPoint::Begin)?;

        let version = self.shared.store.lock().version;
        for token in request.bookmarks.iter() {
            match parse_bookmark(token) {
                Some(v) if v <= version => {}
                _ => {
                    return Err(DriverError::database(
                        "Transaction.InvalidBookmark",
                        format!("bookmark '{}' is not known to this cluster", token),
                    ))
                }
            }
        }
        if request.access_mode == AccessMode::Write && !self.is_leader() {
            return Err(DriverError::LeaderSwitch {
                address: self.address.to_string(),
            });
        }

        self.shared.begins.lock().push(BeginRecord {
            address: self.address.clone(),
            request: request.clone(),
        });
        self.tx = Some(OpenTx {
            database: request.database.clone(),
            access_mode: request.access_mode,
            writes: BTreeMap::new(),
            results: HashMap::new(),
        });
        trace!(target: "arbor::memory", address = %self.address, "BEGIN");
        Ok(())
    }

    fn run(&mut self, query: &Query, cancel: &CancelToken) -> DriverResult<RunResponse> {
        self.ensure_usable()?;
        cancel.check()?;
        self.fault(FaultPoint::Run)?;

        let shared = Arc::clone(&self.shared);
        let qid = self.next_qid;
        let tx = self.open_tx()?;

        let mut counters = BTreeMap::new();
        let output = {
            let store = shared.store.lock();
            let mut view = TxView::new(&store.data, &mut tx.writes, &mut counters, tx.access_mode);
            (shared.handler)(query, &mut view)?
        };

        tx.results.insert(
            qid,
            PendingResult {
                query_text: query.text().to_string(),
                rows: output.rows.into(),
                counters,
            },
        );
        self.next_qid += 1;
        shared.queries_run.fetch_add(1, Ordering::Relaxed);
        shared.query_log.lock().push(query.text().to_string());
        Ok(RunResponse {
            qid,
            keys: output.keys,
        })
    }

    fn pull(&mut self, qid: QueryId, n: usize, cancel: &CancelToken) -> DriverResult<PullResponse> {
        self.ensure_usable()?;
        let latency = *self.shared.pull_latency.lock();
        let interrupted = if latency.is_zero() {
            cancel.is_cancelled()
        } else {
            cancel.wait_timeout(latency)
        };
        if interrupted {
            self.broken = true;
            self.tx = None;
            return Err(DriverError::Interrupted);
        }
        self.fault(FaultPoint::Pull)?;

        let tx = self.open_tx()?;
        let database = tx.database.clone();
        let pending = tx
            .results
            .get_mut(&qid)
            .ok_or_else(|| DriverError::database("Request.Invalid", format!("unknown query {}", qid)))?;

        let take = n.min(pending.rows.len());
        let records: Vec<Vec<Value>> = pending.rows.drain(..take).collect();
        if !pending.rows.is_empty() {
            return Ok(PullResponse {
                records,
                has_more: true,
                summary: None,
            });
        }

        let pending = tx.results.remove(&qid).ok_or_else(|| {
            DriverError::database("Request.Invalid", format!("unknown query {}", qid))
        })?;
        Ok(PullResponse {
            records,
            has_more: false,
            summary: Some(self.summary(database, pending)),
        })
    }

    fn discard(&mut self, qid: QueryId, cancel: &CancelToken) -> DriverResult<ResultSummary> {
        self.ensure_usable()?;
        cancel.check()?;
        let tx = self.open_tx()?;
        let database = tx.database.clone();
        let pending = tx
            .results
            .remove(&qid)
            .ok_or_else(|| DriverError::database("Request.Invalid", format!("unknown query {}", qid)))?;
        Ok(self.summary(database, pending))
    }

    fn commit(&mut self) -> DriverResult<Option<String>> {
        self.ensure_usable()?;
        if let Err(e) = self.fault(FaultPoint::Commit) {
            // The server drops the transaction when commit fails
            self.tx = None;
            return Err(e);
        }
        let tx = self
            .tx
            .take()
            .ok_or_else(|| DriverError::database("Request.Invalid", "no open transaction"))?;

        if !tx.writes.is_empty() && !self.is_leader() {
            return Err(DriverError::LeaderSwitch {
                address: self.address.to_string(),
            });
        }

        let version = self.shared.store.lock().apply(tx.writes);
        self.shared.commits.fetch_add(1, Ordering::Relaxed);
        debug!(target: "arbor::memory", address = %self.address, version, "COMMIT");
        Ok(Some(format!("{}{}", BOOKMARK_PREFIX, version)))
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.ensure_usable()?;
        if self.tx.take().is_some() {
            self.shared.rollbacks.fetch_add(1, Ordering::Relaxed);
            trace!(target: "arbor::memory", address = %self.address, "ROLLBACK");
        }
        Ok(())
    }

    fn reset(&mut self) -> DriverResult<()> {
        self.ensure_usable()?;
        if self.tx.take().is_some() {
            self.shared.rollbacks.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}
