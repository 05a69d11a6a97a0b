//! End-to-end wiring: `Store` over the `memkv` reference backend, with the
//! broadcaster driving watch fan-out exactly as a real deployment would.
use apiserver::memkv::MemKv;
use apiserver_storage::{DryRunnableStorage, IdentityTransformer, Store, StoreConfig, Strategy, TransformerChain};
use apiserver_types::{ApiError, CreateOptions, DeleteOptions, Event, ListOptions, ResourceObject, UpdateOptions};
use futures::StreamExt;
use std::sync::Arc;

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
struct WidgetSpec {
    replicas: i64,
}

type Widget = ResourceObject<WidgetSpec>;

struct WidgetStrategy;

impl Strategy<Widget> for WidgetStrategy {
    fn namespace_scoped(&self) -> bool {
        true
    }
}

fn new_store() -> Store<Widget, WidgetStrategy, MemKv> {
    let transformer = Arc::new(TransformerChain::new().push(Vec::new(), "identity", Arc::new(IdentityTransformer)));
    let storage = Arc::new(DryRunnableStorage::new(Arc::new(MemKv::new()), transformer));
    Store::new("/widgets", Arc::new(WidgetStrategy), storage, StoreConfig::new("widgets")).unwrap()
}

#[tokio::test]
async fn create_then_get_round_trips() {
    let store = new_store();
    let obj = Widget::new("x", WidgetSpec { replicas: 3 });
    let created = store.create(Some("ns1"), obj, &CreateOptions::default(), None).await.unwrap();
    assert_eq!(created.metadata.resource_version, "1");

    let got = store.get(Some("ns1"), "x", None).await.unwrap();
    assert_eq!(got.spec.replicas, 3);
    assert_eq!(got.metadata.uid, created.metadata.uid);
}

#[tokio::test]
async fn concurrent_writers_race_and_the_loser_gets_a_conflict() {
    let store = new_store();
    let obj = Widget::new("y", WidgetSpec { replicas: 0 });
    let created = store.create(Some("ns1"), obj, &CreateOptions::default(), None).await.unwrap();
    let base_rv = created.metadata.resource_version.clone();

    let bump = {
        let base_rv = base_rv.clone();
        Arc::new(move |existing: Option<&Widget>| {
            let mut w = existing.unwrap().clone();
            w.metadata.resource_version = base_rv.clone();
            w.spec.replicas += 1;
            Ok(w)
        })
    };
    store
        .update(Some("ns1"), "y", bump.clone(), &UpdateOptions::default(), None, false, None)
        .await
        .unwrap();

    // The second writer is still holding the pre-update resourceVersion.
    let err = store
        .update(Some("ns1"), "y", bump, &UpdateOptions::default(), None, false, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));
}

#[tokio::test]
async fn graceful_delete_waits_for_finalizer_removal() {
    let store = new_store();
    let mut obj = Widget::new("z", WidgetSpec { replicas: 1 });
    obj.metadata.finalizers = vec!["widgets.example/cleanup".to_string()];
    store.create(Some("ns1"), obj, &CreateOptions::default(), None).await.unwrap();

    store
        .delete(Some("ns1"), "z", DeleteOptions::default().grace_period(0))
        .await
        .unwrap();
    let pending = store.get(Some("ns1"), "z", None).await.unwrap();
    assert!(pending.metadata.is_being_deleted());
    assert_eq!(pending.metadata.finalizers, vec!["widgets.example/cleanup".to_string()]);

    let rv = pending.metadata.resource_version.clone();
    let drop_finalizer = Arc::new(move |existing: Option<&Widget>| {
        let mut w = existing.unwrap().clone();
        w.metadata.resource_version = rv.clone();
        w.metadata.finalizers.clear();
        Ok(w)
    });
    store
        .update(Some("ns1"), "z", drop_finalizer, &UpdateOptions::default(), None, false, None)
        .await
        .unwrap();

    assert!(store.get(Some("ns1"), "z", None).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn delete_collection_skips_finalizer_blocked_items_but_clears_the_rest() {
    let store = new_store();
    for name in ["a", "b", "c"] {
        let obj = Widget::new(name, WidgetSpec { replicas: 1 });
        store.create(Some("ns1"), obj, &CreateOptions::default(), None).await.unwrap();
    }
    // Put "b" under a finalizer so it survives the sweep while its siblings don't.
    let rv = store.get(Some("ns1"), "b", None).await.unwrap().metadata.resource_version;
    let add_finalizer = Arc::new(move |existing: Option<&Widget>| {
        let mut w = existing.unwrap().clone();
        w.metadata.resource_version = rv.clone();
        w.metadata.finalizers = vec!["widgets.example/cleanup".to_string()];
        Ok(w)
    });
    store
        .update(Some("ns1"), "b", add_finalizer, &UpdateOptions::default(), None, false, None)
        .await
        .unwrap();

    let remaining = store
        .delete_collection(Some("ns1"), &ListOptions::default(), DeleteOptions::default().grace_period(0))
        .await
        .unwrap();
    // "b" is still graceful-pending; the other two are physically gone.
    assert_eq!(remaining.iter().filter(|o| o.metadata.name == "b").count(), 1);
    assert!(store.get(Some("ns1"), "a", None).await.unwrap_err().is_not_found());
    assert!(store.get(Some("ns1"), "c", None).await.unwrap_err().is_not_found());
    assert!(store.get(Some("ns1"), "b", None).await.is_ok());
}

#[tokio::test]
async fn watch_never_delivers_events_accepted_before_it_subscribed() {
    let store = new_store();
    let before = Widget::new("early", WidgetSpec { replicas: 1 });
    store.create(Some("ns1"), before, &CreateOptions::default(), None).await.unwrap();

    let mut stream = store.watch(Some("ns1"), &ListOptions::default()).await.unwrap();

    let after = Widget::new("late", WidgetSpec { replicas: 2 });
    store.create(Some("ns1"), after, &CreateOptions::default(), None).await.unwrap();

    match stream.next().await.unwrap().unwrap() {
        Event::Added(obj) => assert_eq!(obj.metadata.name, "late"),
        other => panic!("expected Added(late), got {other:?}"),
    }
}

#[tokio::test]
async fn watch_events_sent_is_counted_per_delivered_event() {
    let store = new_store();
    let mut stream = store.watch(Some("ns1"), &ListOptions::default()).await.unwrap();
    assert_eq!(store.metrics().watch_events_sent, 0);

    store
        .create(Some("ns1"), Widget::new("counted", WidgetSpec { replicas: 1 }), &CreateOptions::default(), None)
        .await
        .unwrap();
    assert!(matches!(stream.next().await.unwrap().unwrap(), Event::Added(_)));
    assert_eq!(store.metrics().watch_events_sent, 1);
}

#[tokio::test]
async fn field_selector_on_metadata_name_narrows_list_to_that_object() {
    let store = new_store();
    store.create(Some("ns1"), Widget::new("a", WidgetSpec { replicas: 1 }), &CreateOptions::default(), None).await.unwrap();
    store.create(Some("ns1"), Widget::new("b", WidgetSpec { replicas: 2 }), &CreateOptions::default(), None).await.unwrap();

    let (items, _rv) = store
        .list(Some("ns1"), &ListOptions::default().fields("metadata.name=a"))
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].metadata.name, "a");
}

#[tokio::test]
async fn dry_run_update_through_the_emptied_finalizers_shortcut_does_not_persist_a_delete() {
    let store = new_store();
    let mut obj = Widget::new("shortcut", WidgetSpec { replicas: 1 });
    obj.metadata.finalizers = vec!["widgets.example/cleanup".to_string()];
    let created = store.create(Some("ns1"), obj, &CreateOptions::default(), None).await.unwrap();
    store.delete(Some("ns1"), "shortcut", DeleteOptions::default().grace_period(0)).await.unwrap();

    let rv = created.metadata.resource_version.clone();
    let drop_finalizer = Arc::new(move |existing: Option<&Widget>| {
        let mut w = existing.unwrap().clone();
        w.metadata.resource_version = rv.clone();
        w.metadata.finalizers.clear();
        Ok(w)
    });
    let options = UpdateOptions { dry_run: true, ..Default::default() };
    store.update(Some("ns1"), "shortcut", drop_finalizer, &options, None, false, None).await.unwrap();

    // A dry-run update must not actually clear the finalizer-blocked object.
    let still_there = store.get(Some("ns1"), "shortcut", None).await.unwrap();
    assert!(still_there.metadata.is_being_deleted());
}

#[tokio::test]
async fn dry_run_create_is_invisible_to_a_later_real_get() {
    let store = new_store();
    let obj = Widget::new("ghost", WidgetSpec { replicas: 9 });
    let options = CreateOptions { dry_run: true, ..Default::default() };
    let created = store.create(Some("ns1"), obj, &options, None).await.unwrap();
    assert_eq!(created.metadata.resource_version, "1");

    assert!(store.get(Some("ns1"), "ghost", None).await.unwrap_err().is_not_found());
}
