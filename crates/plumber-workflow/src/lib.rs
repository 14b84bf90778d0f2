//! Plumber Workflow
//!
//! Multi-step approval of content changes. A change to a node opens an
//! instance; the instance walks an ordered chain of approver groups, one
//! pending task at a time, until a group rejects it, someone cancels it,
//! or the last group approves it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Approvals                            │
//! │  - initiate(node, author) → Initiation                      │
//! │  - approve / reject / cancel(task) → Transition             │
//! └─────────────────────────────────────────────────────────────┘
//!          │                 │                  │
//!          ▼                 ▼                  ▼
//! ┌────────────────┐ ┌────────────────┐ ┌────────────────┐ ┌───────────────┐
//! │PermissionResolv│ │InstanceManager │ │  TaskManager   │ │ GroupRegistry │
//! │ approver chain │ │ instances,views│ │ advancement    │ │ groups        │
//! └────────────────┘ └────────────────┘ └────────────────┘ └───────────────┘
//!          │                 │                  │                 │
//!          ▼                 ▼                  ▼                 ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Store (plumber-store)  +  EventNotifier            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The host supplies the content tree and the user directory through
//! [`ContentTree`] and [`UserDirectory`].
//!
//! # Usage
//!
//! ```ignore
//! let store: Arc<dyn Store> = Arc::new(SqliteStore::connect(url, 5).await?);
//! let host = Arc::new(InMemoryHost::from_json(&snapshot)?);
//! let approvals = Approvals::new(store, host.clone(), host, Settings::default());
//!
//! if let Initiation::Started { task, .. } =
//!   approvals.initiate(1089, author_id, ChangeType::Publish, None).await?
//! {
//!   approvals.approve(task.task_id, approver_id, Some("ok".into())).await?;
//! }
//! ```

mod chain;
mod error;
mod events;
mod groups;
mod host;
mod instances;
mod permissions;
mod process;
mod tasks;

pub use chain::ApproverChain;
pub use error::{HostError, NotifyError, WorkflowError};
pub use events::{
  ChannelNotifier, EventBus, EventNotifier, LogNotifier, NoopNotifier, WorkflowEvent,
};
pub use groups::GroupRegistry;
pub use host::{ContentNode, ContentTree, InMemoryHost, User, UserDirectory};
pub use instances::{InstanceManager, InstanceView, MISSING_NODE_NAME};
pub use permissions::PermissionResolver;
pub use process::{Approvals, Initiation};
pub use tasks::{Outcome, TaskManager, Transition};
