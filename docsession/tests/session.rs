mod common;

use common::{Product, Supplier, product, product_json, seed_products, store};
use docsession::{
    DocumentStore, SessionError,
    commands::PatchRequest,
    conventions::{DocumentConventions, SessionOptions},
    memory::InMemoryServer,
};
use futures::executor::block_on;

#[test]
fn stored_entities_are_saved_and_loaded_back() {
    let (server, store) = store();

    block_on(async {
        let mut session = store.open_session();
        let chai = session.store_with_id(product("Chai", 39), "products/1").unwrap();
        assert!(session.has_changes().unwrap());

        session.save_changes().await.unwrap();

        assert_eq!(server.request_count().await, 1);
        assert!(!session.has_changes().unwrap());
        assert_eq!(session.change_vector_of(chai).unwrap(), Some("A:1-test"));
        assert_eq!(session.metadata_for(chai).unwrap().collection.as_deref(), Some("Products"));

        let mut other = store.open_session();
        let loaded = other.load::<Product>("products/1").await.unwrap().unwrap();
        assert_eq!(other.get::<Product>(loaded).unwrap(), &product("Chai", 39));

        let again = other.load::<Product>("PRODUCTS/1").await.unwrap();
        assert_eq!(again, Some(loaded));
        assert_eq!(other.number_of_requests(), 1);
    });
}

#[test]
fn generated_ids_use_the_collection_prefix() {
    let (_server, store) = store();

    block_on(async {
        let mut session = store.open_session();
        let handle = session.store(Supplier { company_name: "Exotic Liquids".to_string() }).unwrap();
        let id = session.id_of(handle).unwrap().to_string();

        assert!(id.starts_with("suppliers/"));
        session.save_changes().await.unwrap();
        assert!(session.is_loaded(&id));
    });
}

#[test]
fn save_changes_without_changes_makes_no_request() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, &[("Chai", 39)]).await;

        let mut session = store.open_session();
        session.load::<Product>("products/1").await.unwrap();
        session.save_changes().await.unwrap();
        session.save_changes().await.unwrap();

        assert_eq!(session.number_of_requests(), 1);
        assert_eq!(server.request_count().await, 1);
    });
}

#[test]
fn only_modified_entities_are_sent() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, &[("Chai", 39), ("Chang", 17)]).await;

        let mut session = store.open_session();
        let handles = session.load_many::<Product>(&["products/1", "products/2"]).await.unwrap();
        let chang = handles[1].unwrap();

        session.get_mut::<Product>(chang).unwrap().units_in_stock = 20;
        assert!(session.has_changed(chang).unwrap());
        assert!(!session.has_changed(handles[0].unwrap()).unwrap());

        session.save_changes().await.unwrap();

        let stored = server.document("products/2").await.unwrap().unwrap();
        assert_eq!(stored["UnitsInStock"], 20);
        // One seed write per product, then one write for the update.
        assert_eq!(stored["@metadata"]["@change-vector"], "A:3-test");
        assert_eq!(session.change_vector_of(chang).unwrap(), Some("A:3-test"));
        assert_eq!(
            server.document("products/1").await.unwrap().unwrap()["@metadata"]["@change-vector"],
            "A:1-test"
        );
    });
}

#[test]
fn delete_is_sent_before_a_put_of_the_same_id() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, &[("Chai", 39)]).await;

        let mut session = store.open_session();
        let old = session.load::<Product>("products/1").await.unwrap().unwrap();
        session.delete(old).unwrap();
        let new = session.store_with_id(product("Chai Tea", 5), "products/1").unwrap();

        session.save_changes().await.unwrap();

        let stored = server.document("products/1").await.unwrap().unwrap();
        assert_eq!(stored["Name"], "Chai Tea");
        assert!(matches!(session.get::<Product>(old), Err(SessionError::NotTracked(_))));
        assert_eq!(session.get::<Product>(new).unwrap().name, "Chai Tea");
    });
}

#[test]
fn stale_change_vector_leaves_session_untouched() {
    let (server, store) = store();

    block_on(async {
        server
            .put_document("products/9", Some("Products"), product_json("Mishi Kobe Niku", 29))
            .await
            .unwrap();

        let mut session = store.open_session();
        let handle = session.load::<Product>("products/9").await.unwrap().unwrap();

        let tracked = session.identity_map().tracked(handle).unwrap();
        let snapshot_before = serde_json::to_string(tracked.original_state()).unwrap();
        let change_vector_before = tracked.change_vector().map(str::to_string);

        // Someone else writes the document in the meantime.
        server
            .put_document("products/9", Some("Products"), product_json("Mishi Kobe Niku", 0))
            .await
            .unwrap();

        session.get_mut::<Product>(handle).unwrap().units_in_stock = 30;
        let error = session.save_changes().await.unwrap_err();

        match &error {
            SessionError::Concurrency { id, expected, actual } => {
                assert_eq!(id, "products/9");
                assert_eq!(expected.as_deref(), Some("A:1-test"));
                assert_eq!(actual.as_deref(), Some("A:2-test"));
            }
            other => panic!("expected a concurrency error, got {other:?}"),
        }

        let tracked = session.identity_map().tracked(handle).unwrap();
        assert_eq!(serde_json::to_string(tracked.original_state()).unwrap(), snapshot_before);
        assert_eq!(tracked.change_vector().map(str::to_string), change_vector_before);
        assert!(session.has_changed(handle).unwrap());
        assert_eq!(session.get::<Product>(handle).unwrap().units_in_stock, 30);
        assert_eq!(server.document("products/9").await.unwrap().unwrap()["UnitsInStock"], 0);
    });
}

#[test]
fn transport_failure_keeps_changes_pending() {
    let (server, store) = store();

    block_on(async {
        let mut session = store.open_session();
        session.store_with_id(product("Aniseed Syrup", 13), "products/3").unwrap();

        server.fail_next("connection reset").await;
        let error = session.save_changes().await.unwrap_err();
        assert_eq!(error, SessionError::Transport("connection reset".to_string()));
        assert!(error.is_retryable());
        assert!(session.has_changes().unwrap());

        session.save_changes().await.unwrap();
        assert!(!session.has_changes().unwrap());
        assert_eq!(server.document_count().await, 1);
    });
}

#[test]
fn request_quota_is_enforced() {
    let server = InMemoryServer::new();
    let conventions = DocumentConventions::builder().max_requests_per_session(2).build();
    let store = DocumentStore::<InMemoryServer>::builder().conventions(conventions).build(server.clone());

    block_on(async {
        let mut session = store.open_session();
        session.exists("products/1").await.unwrap();
        session.exists("products/2").await.unwrap();

        let error = session.exists("products/3").await.unwrap_err();
        assert_eq!(error, SessionError::RequestQuotaExceeded { max: 2 });
        assert_eq!(server.request_count().await, 2);

        let mut limited = store.open_session_with(SessionOptions::builder().max_requests(1).build());
        limited.exists("products/1").await.unwrap();
        assert!(matches!(
            limited.exists("products/2").await,
            Err(SessionError::RequestQuotaExceeded { max: 1 })
        ));
    });
}

#[test]
fn no_tracking_sessions_never_save_loaded_documents() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, &[("Chai", 39)]).await;

        let mut session = store.open_session_with(SessionOptions::builder().no_tracking(true).build());
        let handle = session.load::<Product>("products/1").await.unwrap().unwrap();

        session.get_mut::<Product>(handle).unwrap().units_in_stock = 0;
        assert!(!session.is_loaded("products/1"));
        assert!(!session.has_changes().unwrap());
        assert!(matches!(session.delete(handle), Err(SessionError::NotTracked(_))));

        session.save_changes().await.unwrap();
        assert_eq!(server.request_count().await, 1);
        assert_eq!(server.document("products/1").await.unwrap().unwrap()["UnitsInStock"], 39);
    });
}

#[test]
fn exists_prefers_the_identity_map() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, &[("Chai", 39), ("Chang", 17)]).await;

        let mut session = store.open_session();
        assert!(session.exists("products/1").await.unwrap());
        assert!(!session.exists("products/404").await.unwrap());
        assert_eq!(session.number_of_requests(), 2);

        session.store_with_id(product("Ikura", 31), "products/10").unwrap();
        assert!(session.exists("products/10").await.unwrap());

        let chang = session.load::<Product>("products/2").await.unwrap().unwrap();
        session.delete(chang).unwrap();
        assert!(!session.exists("products/2").await.unwrap());

        assert_eq!(session.number_of_requests(), 3);
    });
}

#[test]
fn deleted_ids_load_as_missing_without_a_request() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, &[("Chai", 39), ("Chang", 17)]).await;

        let mut session = store.open_session();
        session.delete_by_id("products/2", None).unwrap();

        assert_eq!(session.load::<Product>("products/2").await.unwrap(), None);
        assert_eq!(session.number_of_requests(), 0);

        session.save_changes().await.unwrap();
        assert_eq!(server.document("products/2").await.unwrap(), None);
        assert_eq!(server.document_count().await, 1);
    });
}

#[test]
fn repeated_deletes_send_one_command() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, &[("Chai", 39), ("Chang", 17)]).await;

        let mut session = store.open_session();
        let chai = session.load::<Product>("products/1").await.unwrap().unwrap();
        session.delete(chai).unwrap();
        session.delete_by_id("products/1", None).unwrap();
        session.delete_by_id("products/2", None).unwrap();
        session.delete_by_id("products/2", Some("A:1-stale".to_string())).unwrap();

        let changes = session.identity_map().compute_change_set().unwrap();
        assert_eq!(changes.to_delete.len(), 1);
        assert_eq!(changes.deferred.len(), 1);

        session.save_changes().await.unwrap();
        assert_eq!(server.document_count().await, 0);
    });
}

#[test]
fn load_many_fetches_only_unknown_ids() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, &[("Chai", 39), ("Chang", 17), ("Aniseed Syrup", 13)]).await;

        let mut session = store.open_session();
        let chai = session.load::<Product>("products/1").await.unwrap();

        let handles = session
            .load_many::<Product>(&["products/1", "products/2", "products/404", "Products/2"])
            .await
            .unwrap();

        assert_eq!(handles[0], chai);
        assert!(handles[1].is_some());
        assert_eq!(handles[2], None);
        assert_eq!(handles[3], handles[1]);
        assert_eq!(session.number_of_requests(), 2);
    });
}

#[test]
fn refresh_discards_local_changes() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, &[("Chai", 39)]).await;

        let mut session = store.open_session();
        let handle = session.load::<Product>("products/1").await.unwrap().unwrap();
        session.get_mut::<Product>(handle).unwrap().units_in_stock = 1;

        let change_vector = server
            .put_document("products/1", Some("Products"), product_json("Chai", 50))
            .await
            .unwrap();

        session.refresh(handle).await.unwrap();

        assert_eq!(session.get::<Product>(handle).unwrap(), &product("Chai", 50));
        assert!(!session.has_changed(handle).unwrap());
        assert_eq!(session.change_vector_of(handle).unwrap(), Some(change_vector.as_str()));
    });
}

#[test]
fn patch_result_refreshes_tracked_entity() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, &[("Chai", 39)]).await;

        let mut session = store.open_session();
        let handle = session.load::<Product>("products/1").await.unwrap().unwrap();

        session
            .patch(
                "products/1",
                PatchRequest::new("this.UnitsInStock = args.stock;").with_value("stock", 3),
            )
            .unwrap();
        session.save_changes().await.unwrap();

        assert_eq!(session.get::<Product>(handle).unwrap().units_in_stock, 3);
        assert!(!session.has_changes().unwrap());
        assert_eq!(server.document("products/1").await.unwrap().unwrap()["UnitsInStock"], 3);
        assert_eq!(session.change_vector_of(handle).unwrap(), Some("A:2-test"));
    });
}

#[test]
fn evict_and_clear_drop_pending_changes() {
    let (server, store) = store();

    block_on(async {
        let mut session = store.open_session();
        let handle = session.store_with_id(product("Chai", 39), "products/1").unwrap();
        session.evict(handle).unwrap();
        assert!(!session.has_changes().unwrap());

        session.store_with_id(product("Chang", 17), "products/2").unwrap();
        session.delete_by_id("products/3", None).unwrap();
        session.clear();
        assert!(!session.has_changes().unwrap());

        session.save_changes().await.unwrap();
        assert_eq!(server.request_count().await, 0);
    });
}

#[test]
fn tracking_the_same_id_twice_is_rejected() {
    let (_server, store) = store();

    let mut session = store.open_session();
    session.store_with_id(product("Chai", 39), "products/1").unwrap();

    assert_eq!(
        session.store_with_id(product("Chai", 39), "Products/1"),
        Err(SessionError::DuplicateTracking("Products/1".to_string()))
    );
}

#[test]
fn typed_access_checks_the_collection() {
    let (_server, store) = store();

    let mut session = store.open_session();
    let handle = session.store_with_id(product("Chai", 39), "products/1").unwrap();

    assert!(matches!(session.get::<Supplier>(handle), Err(SessionError::TypeMismatch { .. })));
}
