//! Integration tests for InstanceManager.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use plumber_store::{ChangeType, Instance, InstanceStatus, Store};
use plumber_workflow::{InstanceManager, MISSING_NODE_NAME, WorkflowEvent};

use common::{ABOUT, Recorder};

async fn manager() -> (Arc<dyn Store>, InstanceManager<Arc<Recorder>>, Arc<Recorder>) {
  let store = common::store().await;
  let host = common::host();
  let recorder = Arc::new(Recorder::default());
  let manager = InstanceManager::with_notifier(store.clone(), host.clone(), host, recorder.clone());
  (store, manager, recorder)
}

/// Insert `count` pending instances, each on its own node.
async fn seed(manager: &InstanceManager<Arc<Recorder>>, count: i64) -> Vec<Instance> {
  let mut instances = Vec::new();
  for node_id in 1..=count {
    let instance = Instance::new(node_id, 1, ChangeType::Publish, None);
    assert!(manager.insert(&instance).await.unwrap());
    instances.push(instance);
  }
  instances
}

fn completed(mut instance: Instance, status: InstanceStatus, at: chrono::DateTime<Utc>) -> Instance {
  instance.status = status;
  instance.completed_at = Some(at);
  instance
}

#[tokio::test]
async fn test_insert_raises_status_changed() {
  let (_, instances, recorder) = manager().await;
  let instance = Instance::new(ABOUT, 1, ChangeType::Publish, Some("please".to_string()));

  assert!(instances.insert(&instance).await.unwrap());

  assert_eq!(
    instances.by_guid(instance.instance_id).await.unwrap(),
    Some(instance.clone())
  );
  assert_eq!(
    recorder.events(),
    vec![WorkflowEvent::InstanceStatusChanged {
      instance,
      previous: None
    }]
  );
}

#[tokio::test]
async fn test_second_pending_instance_on_node_is_rejected() {
  let (_, instances, _) = manager().await;
  let first = Instance::new(ABOUT, 1, ChangeType::Publish, None);
  let second = Instance::new(ABOUT, 2, ChangeType::Unpublish, None);

  assert!(instances.insert(&first).await.unwrap());
  assert!(!instances.insert(&second).await.unwrap());
  assert_eq!(instances.count_pending().await.unwrap(), 1);

  // once the first closes, the node is free again
  let closed = completed(first, InstanceStatus::Approved, Utc::now());
  assert!(instances.update(&closed).await.unwrap());
  assert!(instances.insert(&second).await.unwrap());
}

#[tokio::test]
async fn test_paging_is_one_based_and_degrades_to_empty() {
  let (_, instances, _) = manager().await;
  seed(&instances, 23).await;
  assert_eq!(instances.page(4, 3).await.unwrap().len(), 3);
  assert_eq!(instances.page(8, 3).await.unwrap().len(), 2);
  assert_eq!(instances.page(9, 3).await.unwrap().len(), 0);
  assert_eq!(instances.page(0, 3).await.unwrap().len(), 0);
  assert_eq!(instances.page(1, 0).await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_paging_eleven_instances() {
  let (_, instances, _) = manager().await;
  seed(&instances, 11).await;
  assert_eq!(instances.page(3, 9).await.unwrap().len(), 0);
  assert_eq!(instances.page(2, 9).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_paging_forty_three_instances() {
  let (_, instances, _) = manager().await;
  seed(&instances, 43).await;
  assert_eq!(instances.page(2, 41).await.unwrap().len(), 2);
  assert_eq!(instances.count_all().await.unwrap(), 43);
  assert_eq!(instances.all().await.unwrap().len(), 43);
}

#[tokio::test]
async fn test_by_node_and_status() {
  let (_, instances, _) = manager().await;
  let old = Instance::new(ABOUT, 1, ChangeType::Publish, None);
  instances.insert(&old).await.unwrap();
  let old = completed(old, InstanceStatus::Rejected, Utc::now());
  instances.update(&old).await.unwrap();
  let current = Instance::new(ABOUT, 1, ChangeType::Publish, None);
  instances.insert(&current).await.unwrap();
  seed(&instances, 3).await;

  assert_eq!(instances.by_node(ABOUT, 1, 10).await.unwrap().len(), 2);
  assert_eq!(instances.by_node(ABOUT, 2, 10).await.unwrap().len(), 0);

  let pending = instances
    .for_node_by_status(ABOUT, &[InstanceStatus::Pending])
    .await
    .unwrap();
  assert_eq!(pending, vec![current]);
  let both = instances
    .for_node_by_status(ABOUT, &[InstanceStatus::Pending, InstanceStatus::Rejected])
    .await
    .unwrap();
  assert_eq!(both.len(), 2);
  assert!(instances.for_node_by_status(ABOUT, &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_date_range_excludes_instances_closed_before_window() {
  let (_, instances, _) = manager().await;
  let cutoff = Utc::now() - Duration::days(2);
  for instance in seed(&instances, 3).await {
    let closed = completed(instance, InstanceStatus::Approved, cutoff - Duration::days(10));
    assert!(instances.update(&closed).await.unwrap());
  }

  assert!(instances.for_date_range(cutoff).await.unwrap().is_empty());
  assert!(
    instances
      .filtered_paged_for_date_range(cutoff, 10, 1, None)
      .await
      .unwrap()
      .is_empty()
  );
}

#[tokio::test]
async fn test_date_range_includes_open_and_recently_closed() {
  let (_, instances, _) = manager().await;
  let cutoff = Utc::now() - Duration::days(2);
  let seeded = seed(&instances, 4).await;
  let recent = completed(seeded[0].clone(), InstanceStatus::Cancelled, Utc::now());
  let stale = completed(seeded[1].clone(), InstanceStatus::Approved, cutoff - Duration::days(1));
  instances.update(&recent).await.unwrap();
  instances.update(&stale).await.unwrap();

  let window = instances.for_date_range(cutoff).await.unwrap();
  assert_eq!(window.len(), 3);
  assert!(window.iter().all(|i| i.instance_id != stale.instance_id));
}

#[tokio::test]
async fn test_filtered_paged_date_range() {
  let (_, instances, _) = manager().await;
  let cutoff = Utc::now() - Duration::days(2);
  let seeded = seed(&instances, 23).await;
  let closed = completed(seeded[0].clone(), InstanceStatus::Approved, Utc::now());
  instances.update(&closed).await.unwrap();

  // pending, by code and by name
  let page = instances
    .filtered_paged_for_date_range(cutoff, 21, 1, Some("3"))
    .await
    .unwrap();
  assert_eq!(page.len(), 21);
  assert!(page.iter().all(|i| i.status == InstanceStatus::Pending));
  let rest = instances
    .filtered_paged_for_date_range(cutoff, 21, 2, Some("pending"))
    .await
    .unwrap();
  assert_eq!(rest.len(), 1);

  let approved = instances
    .filtered_paged_for_date_range(cutoff, 21, 1, Some("1"))
    .await
    .unwrap();
  assert_eq!(approved, vec![closed]);

  // a filter that does not parse is ignored
  let unfiltered = instances
    .filtered_paged_for_date_range(cutoff, 30, 1, Some("not-a-status"))
    .await
    .unwrap();
  assert_eq!(unfiltered.len(), 23);
}

#[tokio::test]
async fn test_update_rejects_inconsistent_or_reopened_instances() {
  let (_, instances, recorder) = manager().await;
  let instance = Instance::new(ABOUT, 1, ChangeType::Publish, None);
  instances.insert(&instance).await.unwrap();
  recorder.clear();

  let mut stamped_but_pending = instance.clone();
  stamped_but_pending.completed_at = Some(Utc::now());
  assert!(!instances.update(&stamped_but_pending).await.unwrap());

  let mut approved_without_stamp = instance.clone();
  approved_without_stamp.status = InstanceStatus::Approved;
  assert!(!instances.update(&approved_without_stamp).await.unwrap());

  let approved = completed(instance.clone(), InstanceStatus::Approved, Utc::now());
  assert!(instances.update(&approved).await.unwrap());
  // idempotent
  assert!(instances.update(&approved).await.unwrap());

  let cancelled = completed(instance.clone(), InstanceStatus::Cancelled, Utc::now());
  assert!(!instances.update(&cancelled).await.unwrap());
  assert!(!instances.update(&instance).await.unwrap());

  let unknown = Instance::new(ABOUT, 1, ChangeType::Publish, None);
  assert!(!instances.update(&unknown).await.unwrap());

  assert_eq!(
    recorder.events(),
    vec![WorkflowEvent::InstanceStatusChanged {
      instance: approved,
      previous: Some(InstanceStatus::Pending)
    }]
  );
}

#[tokio::test]
async fn test_counts() {
  let (_, instances, _) = manager().await;
  let seeded = seed(&instances, 5).await;
  let closed = completed(seeded[2].clone(), InstanceStatus::Rejected, Utc::now());
  instances.update(&closed).await.unwrap();

  assert_eq!(instances.count_all().await.unwrap(), 5);
  assert_eq!(instances.count_pending().await.unwrap(), 4);
}

#[tokio::test]
async fn test_domain_view_resolves_names() {
  let (_, instances, _) = manager().await;
  assert!(instances.to_domain_view(&[]).await.unwrap().is_empty());

  let about = Instance::new(ABOUT, 2, ChangeType::Publish, None);
  let gone = Instance::new(31337, 99, ChangeType::Unpublish, None);
  instances.insert(&about).await.unwrap();
  instances.insert(&gone).await.unwrap();

  let views = instances
    .to_domain_view(&[about.clone(), gone.clone()])
    .await
    .unwrap();
  assert_eq!(views[0].node_name, "About");
  assert_eq!(views[0].author_name, "Reviewer");
  assert_eq!(views[0].instance, about);
  assert_eq!(views[1].node_name, MISSING_NODE_NAME);
  assert_eq!(views[1].author_name, "");
}
