//! Shared fixtures for the workflow integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use plumber_store::{SqliteStore, Store};
use plumber_workflow::{
  ContentNode, ContentTree, EventNotifier, HostError, InMemoryHost, NotifyError, User,
  UserDirectory, WorkflowEvent,
};

pub const HOME: i64 = 1050;
pub const ABOUT: i64 = 1089;
pub const TEAM: i64 = 1090;
pub const NEWS: i64 = 1100;
pub const ORPHAN: i64 = 2000;

pub const HOME_TYPE: i64 = 1045;
pub const PAGE_TYPE: i64 = 1069;
pub const ARTICLE_TYPE: i64 = 1070;
pub const ORPHAN_TYPE: i64 = 1071;

pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

pub async fn store() -> Arc<dyn Store> {
  init_tracing();
  Arc::new(
    SqliteStore::in_memory()
      .await
      .expect("failed to open in-memory store"),
  )
}

fn node(node_id: i64, name: &str, parent_id: Option<i64>, content_type_id: i64) -> ContentNode {
  ContentNode {
    node_id,
    name: name.to_string(),
    parent_id,
    content_type_id,
  }
}

fn user(user_id: i64, name: &str, email: Option<&str>) -> User {
  User {
    user_id,
    name: name.to_string(),
    email: email.map(str::to_string),
  }
}

/// Home > About > Team, Home > News, and an unrelated root.
pub fn host() -> Arc<InMemoryHost> {
  Arc::new(
    InMemoryHost::new()
      .with_node(node(HOME, "Home", None, HOME_TYPE))
      .with_node(node(ABOUT, "About", Some(HOME), PAGE_TYPE))
      .with_node(node(TEAM, "Team", Some(ABOUT), PAGE_TYPE))
      .with_node(node(NEWS, "News", Some(HOME), ARTICLE_TYPE))
      .with_node(node(ORPHAN, "Orphan", None, ORPHAN_TYPE))
      .with_user(user(1, "Editor", Some("editor@example.com")))
      .with_user(user(2, "Reviewer", Some("reviewer@example.com")))
      .with_user(user(3, "Publisher", Some("publisher")))
      .with_user(user(4, "Legal", None)),
  )
}

/// Records every event it receives.
#[derive(Default)]
pub struct Recorder {
  events: Mutex<Vec<WorkflowEvent>>,
}

impl Recorder {
  pub fn events(&self) -> Vec<WorkflowEvent> {
    self.events.lock().unwrap().clone()
  }

  pub fn names(&self) -> Vec<&'static str> {
    self.events.lock().unwrap().iter().map(|e| e.name()).collect()
  }

  pub fn clear(&self) {
    self.events.lock().unwrap().clear();
  }
}

impl EventNotifier for Recorder {
  fn notify(&self, event: &WorkflowEvent) -> Result<(), NotifyError> {
    self.events.lock().unwrap().push(event.clone());
    Ok(())
  }
}

/// Fails on every event.
pub struct Failing;

impl EventNotifier for Failing {
  fn notify(&self, event: &WorkflowEvent) -> Result<(), NotifyError> {
    Err(NotifyError::new("mailer", event.name(), "smtp unavailable"))
  }
}

/// A host whose content tree and user directory cannot be reached.
pub struct Offline;

impl Offline {
  fn unavailable() -> HostError {
    HostError::Unavailable {
      message: "content service timed out".to_string(),
    }
  }
}

#[async_trait]
impl ContentTree for Offline {
  async fn get_node(&self, _node_id: i64) -> Result<Option<ContentNode>, HostError> {
    Err(Self::unavailable())
  }
}

#[async_trait]
impl UserDirectory for Offline {
  async fn get_user(&self, _user_id: i64) -> Result<Option<User>, HostError> {
    Err(Self::unavailable())
  }
}
