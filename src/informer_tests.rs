// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `informer.rs`

#[cfg(test)]
mod tests {
    use crate::crd::resources::{Vcn, VcnSpec};
    use crate::crd::LabelSelector;
    use crate::informer::{InformerEvent, InformerFactory};
    use crate::store::memory::MemoryStore;
    use crate::store::{api_resource, to_dynamic, ObjectStore};
    use kube::api::DynamicObject;
    use kube::ResourceExt;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::watch;

    fn vcn(name: &str, role: &str) -> DynamicObject {
        let mut vcn = Vcn::new(
            name,
            VcnSpec {
                cidr_block: "10.0.0.0/16".into(),
                dns_label: None,
            },
        );
        vcn.metadata.namespace = Some("ns".into());
        vcn.labels_mut().insert("role".into(), role.into());
        to_dynamic(&vcn).expect("vcn converts")
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, crate::informer::Handler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: crate::informer::Handler = Arc::new(move |event: &InformerEvent| {
            let tag = match event {
                InformerEvent::Added(_) => "added",
                InformerEvent::Updated { .. } => "updated",
                InformerEvent::Deleted(_) => "deleted",
            };
            sink.lock()
                .expect("lock")
                .push(format!("{tag}:{}", event.object().name_any()));
        });
        (seen, handler)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_list_then_watch_dispatches_events() {
        let store = Arc::new(MemoryStore::new());
        let ar = api_resource::<Vcn>();
        store.create(&ar, &vcn("a", "x")).await.expect("create a");

        let factory = InformerFactory::new(store.clone(), None, None);
        let informer = factory.informer(&ar);
        let (seen, handler) = recorder();
        informer.add_handler(handler);

        let (stop_tx, stop_rx) = watch::channel(false);
        let tasks = factory.start(&stop_rx);
        factory.wait_for_sync().await;
        assert!(informer.get("ns/a").is_some());

        store.create(&ar, &vcn("b", "y")).await.expect("create b");
        store.delete(&ar, Some("ns"), "a").await.expect("delete a");
        settle().await;

        assert_eq!(
            *seen.lock().expect("lock"),
            vec!["added:a", "added:b", "deleted:a"]
        );
        assert!(informer.get("ns/a").is_none());

        stop_tx.send_replace(true);
        for task in tasks {
            task.await.expect("informer exits");
        }
    }

    #[tokio::test]
    async fn test_label_index_lister() {
        let store = Arc::new(MemoryStore::new());
        let ar = api_resource::<Vcn>();
        let factory = InformerFactory::new(store.clone(), None, None);
        let informer = factory.informer(&ar);
        let (_stop_tx, stop_rx) = watch::channel(false);
        factory.start(&stop_rx);
        factory.wait_for_sync().await;

        store.create(&ar, &vcn("a", "web")).await.expect("create");
        store.create(&ar, &vcn("b", "db")).await.expect("create");
        settle().await;

        let web = informer.list_by_selector(Some("ns"), &LabelSelector::from_labels([("role", "web")]));
        assert_eq!(web.len(), 1);
        assert_eq!(web[0].name_any(), "a");
        assert_eq!(
            informer
                .list_by_selector(Some("other"), &LabelSelector::default())
                .len(),
            0
        );
        assert_eq!(informer.list().len(), 2);
    }

    #[tokio::test]
    async fn test_apply_local_wins_over_stale_events() {
        let store = Arc::new(MemoryStore::new());
        let ar = api_resource::<Vcn>();
        let factory = InformerFactory::new(store.clone(), None, None);
        let informer = factory.informer(&ar);
        let created = store.create(&ar, &vcn("a", "x")).await.expect("create");

        let mut updated = created.clone();
        updated.labels_mut().insert("extra".into(), "1".into());
        let written = store.update(&ar, &updated).await.expect("update");

        informer.apply_local(written.clone());
        // The older version arriving late does not overwrite the newer one
        informer.apply_local(created);
        let cached = informer.get("ns/a").expect("cached");
        assert_eq!(cached.resource_version(), written.resource_version());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_redelivers_updates() {
        let store = Arc::new(MemoryStore::new());
        let ar = api_resource::<Vcn>();
        store.create(&ar, &vcn("a", "x")).await.expect("create");
        let factory = InformerFactory::new(store.clone(), None, Some(Duration::from_secs(60)));
        let informer = factory.informer(&ar);
        let (seen, handler) = recorder();
        informer.add_handler(handler);
        let (_stop_tx, stop_rx) = watch::channel(false);
        factory.start(&stop_rx);
        factory.wait_for_sync().await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(seen
            .lock()
            .expect("lock")
            .contains(&"updated:a".to_string()));
    }
}
