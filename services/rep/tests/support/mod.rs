//! Shared fakes for rep integration tests.
//!
//! Each fake keeps its scripted responses and the calls it received behind a
//! mutex so tests can arrange state before and inspect it after a call.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cell_models::bbs::{
    ActualLrp, ActualLrpFilter, ActualLrpGroup, ActualLrpInstanceKey, ActualLrpKey,
    ActualLrpState, Task, TaskState,
};
use cell_models::executor::{
    AllocationFailure, AllocationRequest, Container, ContainerState, Event, ExecutorResources,
    Tags,
};
use cell_models::tags;
use cell_reconcile::Queue;
use cell_rep::client::{
    BbsClient, BbsError, EventSource, ExecutorClient, ExecutorError, GuidError, GuidGenerator,
    LrpProcessor, TaskProcessor,
};
use cell_rep::Operation;
use tokio::sync::mpsc;

pub const CELL_ID: &str = "cell-1";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn lrp_container(process_guid: &str, index: i32, instance_guid: &str) -> Container {
    let key = ActualLrpKey::new(process_guid, index, "domain");
    Container::new(
        tags::lrp_container_guid(process_guid, instance_guid),
        ContainerState::Running,
    )
    .with_tags(tags::lrp_tags(&key, instance_guid))
}

pub fn task_container(task_guid: &str) -> Container {
    Container::new(task_guid, ContainerState::Running).with_tags(tags::task_tags("domain"))
}

pub fn untagged_container(guid: &str, state: ContainerState) -> Container {
    Container::new(guid, state)
}

pub fn actual_lrp(process_guid: &str, index: i32, instance_guid: &str) -> ActualLrp {
    ActualLrp::new(
        ActualLrpKey::new(process_guid, index, "domain"),
        ActualLrpInstanceKey::new(instance_guid, CELL_ID),
        ActualLrpState::Running,
    )
}

pub fn instance_group(process_guid: &str, index: i32, instance_guid: &str) -> ActualLrpGroup {
    ActualLrpGroup {
        instance: Some(actual_lrp(process_guid, index, instance_guid)),
        evacuating: None,
    }
}

pub fn evacuating_group(process_guid: &str, index: i32, instance_guid: &str) -> ActualLrpGroup {
    ActualLrpGroup {
        instance: None,
        evacuating: Some(actual_lrp(process_guid, index, instance_guid)),
    }
}

pub fn joint_group(process_guid: &str, index: i32, instance_guid: &str) -> ActualLrpGroup {
    ActualLrpGroup {
        instance: Some(actual_lrp(process_guid, index, instance_guid)),
        evacuating: Some(actual_lrp(process_guid, index, instance_guid)),
    }
}

pub fn bbs_task(task_guid: &str) -> Task {
    Task::new(task_guid, "domain", CELL_ID, TaskState::Running)
}

// =============================================================================
// Executor
// =============================================================================

#[derive(Default)]
pub struct ExecutorState {
    pub healthy: bool,
    pub containers: Vec<Container>,
    pub total: ExecutorResources,
    pub remaining: ExecutorResources,
    pub volume_drivers: Vec<String>,

    pub list_error: Option<ExecutorError>,
    pub get_error: Option<ExecutorError>,
    pub total_error: Option<ExecutorError>,
    pub remaining_error: Option<ExecutorError>,
    pub volume_drivers_error: Option<ExecutorError>,
    pub allocate_error: Option<ExecutorError>,
    pub subscribe_error: Option<ExecutorError>,

    /// Allocation requests with these guids are declined.
    pub rejected_guids: HashSet<String>,
    /// One feed per future subscription.
    pub event_feeds: VecDeque<FakeEventSource>,

    pub allocate_calls: Vec<Vec<AllocationRequest>>,
    pub get_calls: Vec<String>,
    pub list_calls: usize,
    pub subscribe_calls: usize,
}

/// Scriptable in-memory executor.
pub struct FakeExecutor {
    pub state: Mutex<ExecutorState>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ExecutorState {
                healthy: true,
                ..ExecutorState::default()
            }),
        }
    }

    pub fn with_containers(containers: Vec<Container>) -> Self {
        let executor = Self::new();
        executor.state.lock().unwrap().containers = containers;
        executor
    }

    pub fn update(&self, f: impl FnOnce(&mut ExecutorState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn allocate_calls(&self) -> Vec<Vec<AllocationRequest>> {
        self.state.lock().unwrap().allocate_calls.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn subscribe_calls(&self) -> usize {
        self.state.lock().unwrap().subscribe_calls
    }

    /// Queue an event feed for the next subscription.
    pub fn feed(&self) -> EventFeed {
        let (source, feed) = FakeEventSource::pair();
        self.state.lock().unwrap().event_feeds.push_back(source);
        feed
    }
}

impl Default for FakeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutorClient for FakeExecutor {
    async fn list_containers(&self) -> Result<Vec<Container>, ExecutorError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        match &state.list_error {
            Some(e) => Err(e.clone()),
            None => Ok(state.containers.clone()),
        }
    }

    async fn get_container(&self, guid: &str) -> Result<Container, ExecutorError> {
        let mut state = self.state.lock().unwrap();
        state.get_calls.push(guid.to_string());
        if let Some(e) = &state.get_error {
            return Err(e.clone());
        }
        state
            .containers
            .iter()
            .find(|c| c.guid == guid)
            .cloned()
            .ok_or_else(|| ExecutorError::ContainerNotFound(guid.to_string()))
    }

    async fn allocate_containers(
        &self,
        requests: Vec<AllocationRequest>,
    ) -> Result<Vec<AllocationFailure>, ExecutorError> {
        let mut state = self.state.lock().unwrap();
        state.allocate_calls.push(requests.clone());
        if let Some(e) = &state.allocate_error {
            return Err(e.clone());
        }
        Ok(requests
            .into_iter()
            .filter(|r| state.rejected_guids.contains(&r.guid))
            .map(|r| AllocationFailure::new(r, "insufficient resources"))
            .collect())
    }

    async fn total_resources(&self) -> Result<ExecutorResources, ExecutorError> {
        let state = self.state.lock().unwrap();
        match &state.total_error {
            Some(e) => Err(e.clone()),
            None => Ok(state.total),
        }
    }

    async fn remaining_resources(&self) -> Result<ExecutorResources, ExecutorError> {
        let state = self.state.lock().unwrap();
        match &state.remaining_error {
            Some(e) => Err(e.clone()),
            None => Ok(state.remaining),
        }
    }

    async fn volume_drivers(&self) -> Result<Vec<String>, ExecutorError> {
        let state = self.state.lock().unwrap();
        match &state.volume_drivers_error {
            Some(e) => Err(e.clone()),
            None => Ok(state.volume_drivers.clone()),
        }
    }

    async fn healthy(&self) -> bool {
        self.state.lock().unwrap().healthy
    }

    async fn subscribe_to_events(&self) -> Result<Box<dyn EventSource>, ExecutorError> {
        let mut state = self.state.lock().unwrap();
        state.subscribe_calls += 1;
        if let Some(e) = &state.subscribe_error {
            return Err(e.clone());
        }
        match state.event_feeds.pop_front() {
            Some(source) => Ok(Box::new(source)),
            None => Err(ExecutorError::Request("no event feed scripted".to_string())),
        }
    }
}

/// Event source driven by an `EventFeed`.
pub struct FakeEventSource {
    rx: mpsc::UnboundedReceiver<Result<Event, ExecutorError>>,
    closed: Arc<AtomicBool>,
}

/// Test side of a `FakeEventSource`.
#[derive(Clone)]
pub struct EventFeed {
    tx: mpsc::UnboundedSender<Result<Event, ExecutorError>>,
    closed: Arc<AtomicBool>,
}

impl FakeEventSource {
    pub fn pair() -> (Self, EventFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                rx,
                closed: Arc::clone(&closed),
            },
            EventFeed { tx, closed },
        )
    }
}

impl EventFeed {
    pub fn send(&self, event: Event) {
        let _ = self.tx.send(Ok(event));
    }

    pub fn fail(&self, error: ExecutorError) {
        let _ = self.tx.send(Err(error));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSource for FakeEventSource {
    async fn next(&mut self) -> Result<Event, ExecutorError> {
        match self.rx.recv().await {
            Some(result) => result,
            None => Err(ExecutorError::StreamClosed),
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.rx.close();
    }
}

// =============================================================================
// BBS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BbsCall {
    RemoveActualLrp {
        process_guid: String,
        index: i32,
        instance_key: Option<ActualLrpInstanceKey>,
    },
    RemoveEvacuatingActualLrp {
        key: ActualLrpKey,
        instance_key: ActualLrpInstanceKey,
    },
    FailTask {
        task_guid: String,
        reason: String,
    },
}

#[derive(Default)]
pub struct BbsState {
    pub groups: Vec<ActualLrpGroup>,
    pub tasks: Vec<Task>,
    pub groups_error: Option<BbsError>,
    pub tasks_error: Option<BbsError>,
    pub remove_error: Option<BbsError>,
    pub fail_error: Option<BbsError>,
    pub filters: Vec<ActualLrpFilter>,
    pub calls: Vec<BbsCall>,
}

/// Scriptable in-memory BBS.
#[derive(Default)]
pub struct FakeBbs {
    pub state: Mutex<BbsState>,
}

impl FakeBbs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(groups: Vec<ActualLrpGroup>, tasks: Vec<Task>) -> Self {
        let bbs = Self::new();
        bbs.update(|s| {
            s.groups = groups;
            s.tasks = tasks;
        });
        bbs
    }

    pub fn update(&self, f: impl FnOnce(&mut BbsState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn calls(&self) -> Vec<BbsCall> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl BbsClient for FakeBbs {
    async fn actual_lrp_groups(
        &self,
        filter: &ActualLrpFilter,
    ) -> Result<Vec<ActualLrpGroup>, BbsError> {
        let mut state = self.state.lock().unwrap();
        state.filters.push(filter.clone());
        match &state.groups_error {
            Some(e) => Err(e.clone()),
            None => Ok(state.groups.clone()),
        }
    }

    async fn tasks_by_cell_id(&self, _cell_id: &str) -> Result<Vec<Task>, BbsError> {
        let state = self.state.lock().unwrap();
        match &state.tasks_error {
            Some(e) => Err(e.clone()),
            None => Ok(state.tasks.clone()),
        }
    }

    async fn task_by_guid(&self, task_guid: &str) -> Result<Task, BbsError> {
        let state = self.state.lock().unwrap();
        state
            .tasks
            .iter()
            .find(|t| t.task_guid == task_guid)
            .cloned()
            .ok_or_else(|| BbsError::ResourceNotFound(task_guid.to_string()))
    }

    async fn remove_actual_lrp(
        &self,
        process_guid: &str,
        index: i32,
        instance_key: Option<&ActualLrpInstanceKey>,
    ) -> Result<(), BbsError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(BbsCall::RemoveActualLrp {
            process_guid: process_guid.to_string(),
            index,
            instance_key: instance_key.cloned(),
        });
        state.remove_error.clone().map_or(Ok(()), Err)
    }

    async fn remove_evacuating_actual_lrp(
        &self,
        key: &ActualLrpKey,
        instance_key: &ActualLrpInstanceKey,
    ) -> Result<(), BbsError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(BbsCall::RemoveEvacuatingActualLrp {
            key: key.clone(),
            instance_key: instance_key.clone(),
        });
        state.remove_error.clone().map_or(Ok(()), Err)
    }

    async fn fail_task(&self, task_guid: &str, reason: &str) -> Result<(), BbsError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(BbsCall::FailTask {
            task_guid: task_guid.to_string(),
            reason: reason.to_string(),
        });
        state.fail_error.clone().map_or(Ok(()), Err)
    }
}

// =============================================================================
// Processors, guids and queue
// =============================================================================

/// Records the guid of every container it is asked to process.
#[derive(Default)]
pub struct RecordingProcessor {
    pub processed: Mutex<Vec<String>>,
}

impl RecordingProcessor {
    pub fn processed(&self) -> Vec<String> {
        self.processed.lock().unwrap().clone()
    }
}

#[async_trait]
impl LrpProcessor for RecordingProcessor {
    async fn process(&self, container: Container) {
        self.processed.lock().unwrap().push(container.guid);
    }
}

#[async_trait]
impl TaskProcessor for RecordingProcessor {
    async fn process(&self, container: Container) {
        self.processed.lock().unwrap().push(container.guid);
    }
}

/// Yields `guid-1`, `guid-2`, ... in order.
#[derive(Default)]
pub struct SequentialGuids {
    next: AtomicUsize,
    fail: bool,
}

impl SequentialGuids {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            next: AtomicUsize::new(0),
            fail: true,
        }
    }
}

impl GuidGenerator for SequentialGuids {
    fn generate_guid(&self) -> Result<String, GuidError> {
        if self.fail {
            return Err(GuidError("entropy exhausted".to_string()));
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("guid-{n}"))
    }
}

/// Collects pushed operations without running them.
#[derive(Default)]
pub struct RecordingQueue {
    pub pushed: Mutex<Vec<Operation>>,
}

impl RecordingQueue {
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .pushed
            .lock()
            .unwrap()
            .iter()
            .map(|op| op.kind().key())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.pushed.lock().unwrap().len()
    }
}

impl Queue<Operation> for RecordingQueue {
    fn push(&self, operation: Operation) {
        self.pushed.lock().unwrap().push(operation);
    }
}

pub fn tags_of(entries: &[(&str, &str)]) -> Tags {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
