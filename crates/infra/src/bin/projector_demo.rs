//! End-to-end walk through the projection pipeline with in-memory backends:
//! append commits, run a dispatch cycle, rebuild, and print what subscribers
//! and readers see.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use projector_core::AggregateId;
use projector_events::{DomainEvent, Event, InMemoryMessageBus, MessageBus, ReadModelUpdatedMessage};
use projector_infra::{
    BusNotifier, CheckpointTracker, CollectionWrapper, EngineConfig, EventStore, InMemoryCheckpointStore,
    InMemoryEventStore, InMemoryReadModelStore, Projection, ProjectionContext, ProjectionEngine, ProjectionError,
    ReadModel, ReadModelMeta, ReadModelStore, RebuildCoordinator, TopicsProvider,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TaskView {
    id: String,
    meta: ReadModelMeta,
    title: String,
    board: String,
    done: bool,
}

impl ReadModel for TaskView {
    type Key = String;

    const COLLECTION: &'static str = "tasks";

    fn id(&self) -> &String {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn meta(&self) -> &ReadModelMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ReadModelMeta {
        &mut self.meta
    }
}

impl TopicsProvider for TaskView {
    fn topics(&self) -> Vec<String> {
        vec![format!("board:{}", self.board)]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum TaskEvent {
    Opened { id: String, title: String, board: String, at: DateTime<Utc> },
    Completed { id: String, at: DateTime<Utc> },
    Archived { id: String, at: DateTime<Utc> },
}

impl Event for TaskEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TaskEvent::Opened { .. } => "TaskOpened",
            TaskEvent::Completed { .. } => "TaskCompleted",
            TaskEvent::Archived { .. } => "TaskArchived",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TaskEvent::Opened { at, .. } | TaskEvent::Completed { at, .. } | TaskEvent::Archived { at, .. } => *at,
        }
    }
}

type Tasks = CollectionWrapper<TaskView, Arc<InMemoryReadModelStore<TaskView>>>;

struct TaskBoardProjection {
    context: ProjectionContext,
    tasks: Arc<Tasks>,
}

impl TaskBoardProjection {
    fn new(tasks: Arc<Tasks>) -> Result<Self> {
        let context = ProjectionContext::new("TaskBoard", "task-board/1")
            .subscribe_to("TaskOpened")
            .subscribe_to("TaskCompleted")
            .subscribe_to("TaskArchived");
        context.attach(&tasks, true).context("attach tasks collection")?;
        Ok(Self { context, tasks })
    }
}

impl Projection for TaskBoardProjection {
    fn context(&self) -> &ProjectionContext {
        &self.context
    }

    fn handle(&self, event: &DomainEvent) -> Result<(), ProjectionError> {
        match event.decode::<TaskEvent>().map_err(|e| ProjectionError::decode(event, e))? {
            TaskEvent::Opened { id, title, board, .. } => {
                let mut view = TaskView {
                    id,
                    meta: ReadModelMeta::default(),
                    title,
                    board,
                    done: false,
                };
                self.tasks.insert(event, &mut view, false)?;
            }
            TaskEvent::Completed { id, .. } => {
                self.tasks.find_and_modify_by_id(event, &id, |view| view.done = true, false)?;
            }
            TaskEvent::Archived { id, .. } => {
                self.tasks.delete(event, &id, false)?;
            }
        }
        Ok(())
    }
}

fn task_event(event: TaskEvent) -> Result<DomainEvent> {
    DomainEvent::from_typed(AggregateId::new(), "Task", &event).context("serialize task event")
}

fn print_notifications(label: &str, messages: Vec<ReadModelUpdatedMessage>) -> Result<()> {
    println!("{label}: {} notification(s)", messages.len());
    for message in messages {
        println!("  {}", serde_json::to_string(&message).context("encode notification")?);
    }
    Ok(())
}

fn main() -> Result<()> {
    projector_observability::init();

    let config = EngineConfig::from_env().context("read engine configuration")?;
    info!(?config, "projector demo starting");

    let bus = Arc::new(InMemoryMessageBus::<ReadModelUpdatedMessage>::new());
    let subscription = bus.subscribe();

    let store = Arc::new(InMemoryReadModelStore::<TaskView>::new());
    let tasks: Arc<Tasks> = Arc::new(CollectionWrapper::<TaskView, _>::new(store.clone(), BusNotifier::new(bus.clone())).with_topics());
    let projection = Arc::new(TaskBoardProjection::new(tasks)?);

    let events = Arc::new(InMemoryEventStore::new());
    let tracker = Arc::new(CheckpointTracker::new(Arc::new(InMemoryCheckpointStore::new())));
    let engine = Arc::new(ProjectionEngine::new(events.clone(), tracker, config));
    engine.register(projection.clone()).context("register projection")?;
    engine.initialize().context("initialize projections")?;

    let now = Utc::now();
    events
        .append(vec![
            task_event(TaskEvent::Opened {
                id: "t-1".into(),
                title: "write docs".into(),
                board: "eng".into(),
                at: now,
            })?,
            task_event(TaskEvent::Opened {
                id: "t-2".into(),
                title: "ship release".into(),
                board: "eng".into(),
                at: now,
            })?,
        ])
        .context("append opening commit")?;
    events
        .append(vec![
            task_event(TaskEvent::Completed { id: "t-1".into(), at: now })?,
            task_event(TaskEvent::Archived { id: "t-2".into(), at: now })?,
        ])
        .context("append follow-up commit")?;

    let report = engine.update_and_wait().context("dispatch cycle")?;
    println!("dispatched up to position {}", report.head);
    print_notifications("live", subscription.drain())?;

    let progress = RebuildCoordinator::new(engine.clone())
        .rebuild("TaskBoard")
        .context("rebuild TaskBoard")?;
    println!(
        "rebuilt TaskBoard: {} commit(s), {} event(s) replayed",
        progress.commits_replayed, progress.events_replayed
    );
    print_notifications("during rebuild", subscription.drain())?;

    for view in store.all().context("list tasks")? {
        println!(
            "task {} '{}' done={} version={}",
            view.id,
            view.title,
            view.done,
            view.version()
        );
    }
    for (name, position) in engine.positions() {
        println!("checkpoint {name} = {position}");
    }
    Ok(())
}
