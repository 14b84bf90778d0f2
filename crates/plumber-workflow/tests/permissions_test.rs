//! Integration tests for PermissionResolver.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use plumber_store::{Permission, PermissionScope, Store};
use plumber_workflow::{
  ContentTree, GroupRegistry, HostError, InMemoryHost, PermissionResolver, WorkflowError,
  WorkflowEvent,
};

use common::{ABOUT, ARTICLE_TYPE, HOME, NEWS, ORPHAN, Offline, PAGE_TYPE, Recorder, TEAM};

struct Fixture {
  host: Arc<InMemoryHost>,
  resolver: PermissionResolver<Arc<Recorder>>,
  recorder: Arc<Recorder>,
  editors: i64,
  legal: i64,
}

async fn fixture() -> Fixture {
  let store = common::store().await;
  let host = common::host();
  let groups = GroupRegistry::new(store.clone(), host.clone());
  let editors = groups.create("Editors").await.unwrap().unwrap().group_id;
  let legal = groups.create("Legal").await.unwrap().unwrap().group_id;
  let recorder = Arc::new(Recorder::default());
  let resolver = PermissionResolver::with_notifier(store.clone(), host.clone(), recorder.clone());
  Fixture {
    host,
    resolver,
    recorder,
    editors,
    legal,
  }
}

#[tokio::test]
async fn test_recursive_permissions_for_missing_node_is_none() {
  let f = fixture().await;
  assert!(
    f.resolver
      .recursive_permissions_for_node(None)
      .await
      .unwrap()
      .is_none()
  );
}

#[tokio::test]
async fn test_recursive_permissions_without_any_configuration_is_none() {
  let f = fixture().await;
  let team = f.host.get_node(TEAM).await.unwrap();
  assert!(
    f.resolver
      .recursive_permissions_for_node(team.as_ref())
      .await
      .unwrap()
      .is_none()
  );
}

#[tokio::test]
async fn test_recursive_permissions_prefers_the_node_itself() {
  let f = fixture().await;
  let config = HashMap::from([
    (TEAM, vec![Permission::for_node(TEAM, f.legal, 0)]),
    (HOME, vec![Permission::for_node(HOME, f.editors, 0)]),
  ]);
  assert!(f.resolver.update_node_config(config).await.unwrap());

  let team = f.host.get_node(TEAM).await.unwrap();
  let found = f
    .resolver
    .recursive_permissions_for_node(team.as_ref())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(found, vec![Permission::for_node(TEAM, f.legal, 0)]);
}

#[tokio::test]
async fn test_recursive_permissions_uses_nearest_ancestor() {
  let f = fixture().await;
  let config = HashMap::from([
    (
      ABOUT,
      vec![
        Permission::for_node(ABOUT, f.legal, 1),
        Permission::for_node(ABOUT, f.editors, 0),
      ],
    ),
    (HOME, vec![Permission::for_node(HOME, f.editors, 0)]),
  ]);
  assert!(f.resolver.update_node_config(config).await.unwrap());

  let team = f.host.get_node(TEAM).await.unwrap();
  let found = f
    .resolver
    .recursive_permissions_for_node(team.as_ref())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(
    found,
    vec![
      Permission::for_node(ABOUT, f.editors, 0),
      Permission::for_node(ABOUT, f.legal, 1),
    ]
  );

  let news = f.host.get_node(NEWS).await.unwrap();
  let found = f
    .resolver
    .recursive_permissions_for_node(news.as_ref())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(found, vec![Permission::for_node(HOME, f.editors, 0)]);
}

#[tokio::test]
async fn test_recursive_permissions_falls_back_to_content_type() {
  let f = fixture().await;
  let config = HashMap::from([(
    ARTICLE_TYPE,
    vec![Permission::for_content_type(ARTICLE_TYPE, f.legal, 0)],
  )]);
  assert!(f.resolver.update_content_type_config(config).await.unwrap());

  let news = f.host.get_node(NEWS).await.unwrap();
  let found = f
    .resolver
    .recursive_permissions_for_node(news.as_ref())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(found, vec![Permission::for_content_type(ARTICLE_TYPE, f.legal, 0)]);

  // a different content type has no default
  let about = f.host.get_node(ABOUT).await.unwrap();
  assert!(
    f.resolver
      .recursive_permissions_for_node(about.as_ref())
      .await
      .unwrap()
      .is_none()
  );
}

#[tokio::test]
async fn test_update_with_only_empty_lists_fails_and_keeps_records() {
  let f = fixture().await;
  let original = HashMap::from([(ABOUT, vec![Permission::for_node(ABOUT, f.editors, 0)])]);
  assert!(f.resolver.update_node_config(original).await.unwrap());
  f.recorder.clear();

  let empty = HashMap::from([(ABOUT, Vec::new()), (TEAM, Vec::new())]);
  assert!(!f.resolver.update_node_config(empty).await.unwrap());
  assert!(
    !f
      .resolver
      .update_content_type_config(HashMap::from([(PAGE_TYPE, Vec::new())]))
      .await
      .unwrap()
  );
  assert!(!f.resolver.update_node_config(HashMap::new()).await.unwrap());

  assert_eq!(
    f.resolver.permissions_for_node(ABOUT).await.unwrap(),
    vec![Permission::for_node(ABOUT, f.editors, 0)]
  );
  assert!(f.recorder.events().is_empty());
}

#[tokio::test]
async fn test_update_node_config_with_positional_keys_and_event_is_raised() {
  let f = fixture().await;
  let config = HashMap::from([
    (0, vec![Permission::for_node(ABOUT, f.legal, 2)]),
    (1, Vec::new()),
  ]);
  assert!(f.resolver.update_node_config(config).await.unwrap());

  assert_eq!(
    f.resolver.permissions_for_node(ABOUT).await.unwrap(),
    vec![Permission::for_node(ABOUT, f.legal, 2)]
  );
  assert_eq!(f.resolver.all().await.unwrap().len(), 1);

  assert_eq!(
    f.recorder.events(),
    vec![WorkflowEvent::ConfigUpdated {
      config: vec![
        (PermissionScope::Node(1), Vec::new()),
        (
          PermissionScope::Node(ABOUT),
          vec![Permission::for_node(ABOUT, f.legal, 2)]
        ),
      ]
    }]
  );
}

#[tokio::test]
async fn test_update_content_type_config_with_positional_keys_and_event_is_raised() {
  let f = fixture().await;
  let config = HashMap::from([
    (0, vec![Permission::for_content_type(PAGE_TYPE, f.editors, 0)]),
    (1, Vec::new()),
  ]);
  assert!(f.resolver.update_content_type_config(config).await.unwrap());

  assert_eq!(
    f.resolver.permissions_for_content_type(PAGE_TYPE).await.unwrap(),
    vec![Permission::for_content_type(PAGE_TYPE, f.editors, 0)]
  );
  let team = f.host.get_node(TEAM).await.unwrap();
  let found = f
    .resolver
    .recursive_permissions_for_node(team.as_ref())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(found, vec![Permission::for_content_type(PAGE_TYPE, f.editors, 0)]);
  assert_eq!(f.recorder.names(), vec!["config.updated"]);
}

#[tokio::test]
async fn test_records_keep_their_own_scope() {
  let f = fixture().await;
  let first = HashMap::from([
    (
      ABOUT,
      vec![
        Permission::for_node(ABOUT, f.editors, 0),
        Permission::for_node(ABOUT, f.legal, 1),
      ],
    ),
    (HOME, vec![Permission::for_node(HOME, f.editors, 0)]),
  ]);
  assert!(f.resolver.update_node_config(first).await.unwrap());
  f.recorder.clear();

  let second = HashMap::from([
    (ABOUT, vec![Permission::for_node(TEAM, f.legal, 0)]),
    (HOME, Vec::new()),
  ]);
  assert!(f.resolver.update_node_config(second).await.unwrap());

  // the record lands on its own node and the key it was filed under is untouched
  assert_eq!(
    f.resolver.permissions_for_node(TEAM).await.unwrap(),
    vec![Permission::for_node(TEAM, f.legal, 0)]
  );
  assert_eq!(f.resolver.permissions_for_node(ABOUT).await.unwrap().len(), 2);
  assert!(f.resolver.permissions_for_node(HOME).await.unwrap().is_empty());

  assert_eq!(
    f.recorder.events(),
    vec![WorkflowEvent::ConfigUpdated {
      config: vec![
        (PermissionScope::Node(HOME), Vec::new()),
        (
          PermissionScope::Node(TEAM),
          vec![Permission::for_node(TEAM, f.legal, 0)]
        ),
      ]
    }]
  );
}

#[tokio::test]
async fn test_unscoped_record_takes_its_map_key() {
  let f = fixture().await;
  let unscoped = Permission {
    node_id: 0,
    content_type_id: 0,
    group_id: f.editors,
    level: 0,
  };

  assert!(
    f.resolver
      .update_node_config(HashMap::from([(ABOUT, vec![unscoped.clone()])]))
      .await
      .unwrap()
  );
  assert!(
    f.resolver
      .update_content_type_config(HashMap::from([(ARTICLE_TYPE, vec![unscoped])]))
      .await
      .unwrap()
  );

  assert_eq!(
    f.resolver.permissions_for_node(ABOUT).await.unwrap(),
    vec![Permission::for_node(ABOUT, f.editors, 0)]
  );
  assert_eq!(
    f.resolver.permissions_for_content_type(ARTICLE_TYPE).await.unwrap(),
    vec![Permission::for_content_type(ARTICLE_TYPE, f.editors, 0)]
  );
}

#[tokio::test]
async fn test_record_without_a_fitting_scope_is_rejected() {
  let f = fixture().await;

  let content_type_record = HashMap::from([(0, vec![Permission::for_content_type(PAGE_TYPE, f.legal, 0)])]);
  assert!(!f.resolver.update_node_config(content_type_record).await.unwrap());

  let node_record = HashMap::from([(0, vec![Permission::for_node(ABOUT, f.legal, 0)])]);
  assert!(!f.resolver.update_content_type_config(node_record).await.unwrap());

  let unscoped = Permission {
    node_id: 0,
    content_type_id: 0,
    group_id: f.legal,
    level: 0,
  };
  let unkeyed = HashMap::from([(0, vec![unscoped])]);
  assert!(!f.resolver.update_node_config(unkeyed).await.unwrap());

  // a bad record aborts the whole update
  let mixed = HashMap::from([
    (ABOUT, vec![Permission::for_node(ABOUT, f.editors, 0)]),
    (0, vec![Permission::for_content_type(PAGE_TYPE, f.legal, 0)]),
  ]);
  assert!(!f.resolver.update_node_config(mixed).await.unwrap());

  assert!(f.resolver.all().await.unwrap().is_empty());
  assert!(f.recorder.events().is_empty());
}

#[tokio::test]
async fn test_empty_list_clears_its_scope_alongside_others() {
  let f = fixture().await;
  let first = HashMap::from([
    (ABOUT, vec![Permission::for_node(ABOUT, f.editors, 0)]),
    (TEAM, vec![Permission::for_node(TEAM, f.legal, 0)]),
  ]);
  assert!(f.resolver.update_node_config(first).await.unwrap());

  let second = HashMap::from([
    (ABOUT, vec![Permission::for_node(ABOUT, f.legal, 0)]),
    (TEAM, Vec::new()),
  ]);
  assert!(f.resolver.update_node_config(second).await.unwrap());

  assert!(f.resolver.permissions_for_node(TEAM).await.unwrap().is_empty());
  assert_eq!(f.resolver.all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicate_group_in_scope_is_kept_once() {
  let f = fixture().await;
  let config = HashMap::from([(
    ABOUT,
    vec![
      Permission::for_node(ABOUT, f.editors, 0),
      Permission::for_node(ABOUT, f.editors, 1),
    ],
  )]);
  assert!(f.resolver.update_node_config(config).await.unwrap());
  assert_eq!(
    f.resolver.permissions_for_node(ABOUT).await.unwrap(),
    vec![Permission::for_node(ABOUT, f.editors, 0)]
  );
}

#[tokio::test]
async fn test_approver_chain_orders_by_level() {
  let f = fixture().await;
  let config = HashMap::from([(
    HOME,
    vec![
      Permission::for_node(HOME, f.legal, 2),
      Permission::for_node(HOME, f.editors, 1),
    ],
  )]);
  assert!(f.resolver.update_node_config(config).await.unwrap());

  let chain = f.resolver.approver_chain(TEAM).await.unwrap().unwrap();
  assert_eq!(chain.len(), 2);
  assert_eq!(chain.group_at(0), Some(f.editors));
  assert_eq!(chain.group_at(1), Some(f.legal));

  assert!(f.resolver.approver_chain(ORPHAN).await.unwrap().is_none());
  assert!(f.resolver.approver_chain(424242).await.unwrap().is_none());
}

#[tokio::test]
async fn test_parent_cycle_does_not_loop() {
  let store = common::store().await;
  let groups = GroupRegistry::new(store.clone(), common::host());
  let editors = groups.create("Editors").await.unwrap().unwrap().group_id;

  let looped = Arc::new(
    InMemoryHost::from_json(
      r#"{ "nodes": [
        { "node_id": 1, "name": "A", "parent_id": 2, "content_type_id": 7 },
        { "node_id": 2, "name": "B", "parent_id": 1, "content_type_id": 7 }
      ] }"#,
    )
    .unwrap(),
  );
  let resolver = PermissionResolver::new(store.clone(), looped);
  assert!(resolver.approver_chain(1).await.unwrap().is_none());

  resolver
    .update_content_type_config(HashMap::from([(7, vec![Permission::for_content_type(7, editors, 0)])]))
    .await
    .unwrap();
  let chain = resolver.approver_chain(1).await.unwrap().unwrap();
  assert_eq!(chain.group_at(0), Some(editors));

  assert_eq!(store.all_permissions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unreachable_content_tree_is_a_host_error() {
  let store = common::store().await;
  let resolver = PermissionResolver::new(store, Arc::new(Offline));

  let err = resolver.approver_chain(ABOUT).await.unwrap_err();
  assert!(matches!(
    err,
    WorkflowError::Host(HostError::Unavailable { .. })
  ));
}
