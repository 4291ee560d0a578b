//! Mock implementations for the storage, invocation and ecology traits
//!
//! Every mock records the calls it receives so tests can assert on the
//! exact requests the task manager issues without a real backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use scheduler_core::models::{ConditionalWrite, Labourer, Query, Row, UpdateRequest};
use scheduler_core::traits::{
    Clock, EcologyClient, LabourerInvoker, TableStore, TaskQueueInspector,
};
use scheduler_core::{SchedulerError, SchedulerResult};

/// A single call received by [`MockTableStore`]
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Put { table: String, row: Row },
    Update { table: String, request: UpdateRequest },
    Delete { table: String, key: Row },
    Query { table: String, query: Query },
    Count { table: String, query: Query },
}

type QueryHandler = Box<dyn Fn(&str, &Query) -> Vec<Row> + Send + Sync>;

/// Recording mock of [`TableStore`]
///
/// Query results come from the scripted queue first, then from the
/// handler if one is set, and are empty otherwise. Updates return the
/// scripted outcomes in order and `Applied` once the queue is empty.
#[derive(Clone, Default)]
pub struct MockTableStore {
    calls: Arc<Mutex<Vec<StoreCall>>>,
    query_results: Arc<Mutex<VecDeque<Vec<Row>>>>,
    query_handler: Arc<Mutex<Option<QueryHandler>>>,
    count_result: Arc<AtomicI64>,
    update_results: Arc<Mutex<VecDeque<ConditionalWrite>>>,
}

impl MockTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_query_result(&self, rows: Vec<Row>) {
        self.query_results.lock().unwrap().push_back(rows);
    }

    pub fn set_query_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &Query) -> Vec<Row> + Send + Sync + 'static,
    {
        *self.query_handler.lock().unwrap() = Some(Box::new(handler));
    }

    pub fn set_count_result(&self, count: u64) {
        self.count_result.store(count as i64, Ordering::SeqCst);
    }

    pub fn push_update_result(&self, outcome: ConditionalWrite) {
        self.update_results.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn puts(&self) -> Vec<(String, Row)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Put { table, row } => Some((table, row)),
                _ => None,
            })
            .collect()
    }

    pub fn updates(&self) -> Vec<(String, UpdateRequest)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Update { table, request } => Some((table, request)),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> Vec<(String, Row)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Delete { table, key } => Some((table, key)),
                _ => None,
            })
            .collect()
    }

    pub fn queries(&self) -> Vec<(String, Query)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Query { table, query } => Some((table, query)),
                _ => None,
            })
            .collect()
    }

    pub fn counts(&self) -> Vec<(String, Query)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Count { table, query } => Some((table, query)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl TableStore for MockTableStore {
    async fn put(&self, table: &str, row: &Row) -> SchedulerResult<()> {
        self.record(StoreCall::Put {
            table: table.to_string(),
            row: row.clone(),
        });
        Ok(())
    }

    async fn update(&self, table: &str, request: &UpdateRequest) -> SchedulerResult<ConditionalWrite> {
        self.record(StoreCall::Update {
            table: table.to_string(),
            request: request.clone(),
        });
        Ok(self
            .update_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ConditionalWrite::Applied))
    }

    async fn delete(&self, table: &str, key: &Row) -> SchedulerResult<()> {
        self.record(StoreCall::Delete {
            table: table.to_string(),
            key: key.clone(),
        });
        Ok(())
    }

    async fn query(&self, table: &str, query: &Query) -> SchedulerResult<Vec<Row>> {
        self.record(StoreCall::Query {
            table: table.to_string(),
            query: query.clone(),
        });
        if let Some(rows) = self.query_results.lock().unwrap().pop_front() {
            return Ok(rows);
        }
        Ok(self
            .query_handler
            .lock()
            .unwrap()
            .as_ref()
            .map(|handler| handler(table, query))
            .unwrap_or_default())
    }

    async fn count(&self, table: &str, query: &Query) -> SchedulerResult<u64> {
        self.record(StoreCall::Count {
            table: table.to_string(),
            query: query.clone(),
        });
        Ok(self.count_result.load(Ordering::SeqCst) as u64)
    }
}

/// Recording mock of [`LabourerInvoker`]
#[derive(Debug, Clone, Default)]
pub struct MockInvoker {
    invocations: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    fail_with: Arc<Mutex<Option<String>>>,
}

impl MockInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following invocation fail with a network error
    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }

    pub fn invocations(&self) -> Vec<(String, Vec<u8>)> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

#[async_trait]
impl LabourerInvoker for MockInvoker {
    async fn invoke(&self, function_identifier: &str, payload: Vec<u8>) -> SchedulerResult<()> {
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(SchedulerError::Network(message));
        }
        self.invocations
            .lock()
            .unwrap()
            .push((function_identifier.to_string(), payload));
        Ok(())
    }
}

/// Mock of [`EcologyClient`] returning a fixed status
pub struct MockEcologyClient {
    status: AtomicI32,
    status_calls: AtomicUsize,
    registrations: AtomicUsize,
    manager: Mutex<Option<Weak<dyn TaskQueueInspector>>>,
}

impl MockEcologyClient {
    pub fn new() -> Self {
        Self::with_status(4)
    }

    pub fn with_status(status: i32) -> Self {
        Self {
            status: AtomicI32::new(status),
            status_calls: AtomicUsize::new(0),
            registrations: AtomicUsize::new(0),
            manager: Mutex::new(None),
        }
    }

    pub fn set_status(&self, status: i32) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// The registered manager, if it is still alive
    pub fn registered_manager(&self) -> Option<Arc<dyn TaskQueueInspector>> {
        self.manager
            .lock()
            .unwrap()
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

impl Default for MockEcologyClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EcologyClient for MockEcologyClient {
    async fn get_labourer_status(&self, _labourer: &Labourer) -> SchedulerResult<i32> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.status.load(Ordering::SeqCst))
    }

    fn register_task_manager(&self, manager: Weak<dyn TaskQueueInspector>) {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        *self.manager.lock().unwrap() = Some(manager);
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now)),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
