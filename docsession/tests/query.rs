mod common;

use common::{Product, ProductName, seed_products, store};
use docsession::{
    DocumentStore, SessionError,
    memory::InMemoryServer,
    query::{DocumentQuery, Filter, RawQuery},
};
use futures::executor::block_on;

const CATALOG: &[(&str, u32)] = &[
    ("Chai", 39),
    ("Chang", 17),
    ("Aniseed Syrup", 13),
    ("Chef Anton's Cajun Seasoning", 53),
    ("Grandma's Boysenberry Spread", 120),
];

#[test]
fn filtered_queries_track_results_in_order() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, CATALOG).await;

        let mut session = store.open_session();
        let query = DocumentQuery::for_document::<Product>()
            .filter(Filter::gt("UnitsInStock", 20).and(Filter::starts_with("Name", "ch")))
            .order_by_descending("UnitsInStock");

        let handles = session.query::<Product>(&query).await.unwrap();
        let names: Vec<_> = handles
            .iter()
            .map(|handle| session.get::<Product>(*handle).unwrap().name.as_str())
            .collect();

        assert_eq!(names, vec!["Chef Anton's Cajun Seasoning", "Chai"]);
        assert!(session.is_loaded("products/1"));
        assert!(session.is_loaded("products/4"));
        assert!(!session.has_changes().unwrap());
    });
}

#[test]
fn counts_skip_and_take() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, CATALOG).await;

        let mut session = store.open_session();
        let all = DocumentQuery::for_document::<Product>().order_by("Name");

        assert_eq!(session.count(&all).await.unwrap(), 5);
        assert_eq!(
            session
                .count(&all.clone().filter(Filter::lt("UnitsInStock", 20)))
                .await
                .unwrap(),
            2
        );
        // Counting tracks nothing.
        assert!(!session.is_loaded("products/1"));

        let page = session.query::<Product>(&all.skip(1).take(2)).await.unwrap();
        let names: Vec<_> = page
            .iter()
            .map(|handle| session.get::<Product>(*handle).unwrap().name.as_str())
            .collect();
        assert_eq!(names, vec!["Chai", "Chang"]);
    });
}

#[test]
fn projections_are_read_only() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, CATALOG).await;

        let mut session = store.open_session();
        let query = DocumentQuery::for_document::<Product>()
            .filter(Filter::lte("UnitsInStock", 17))
            .select(["Name"])
            .order_by("Name");

        let handles = session.query::<ProductName>(&query).await.unwrap();
        assert_eq!(handles.len(), 2);
        assert_eq!(session.get::<ProductName>(handles[0]).unwrap().name, "Aniseed Syrup");

        let tracked = session.identity_map().tracked(handles[0]).unwrap();
        assert!(tracked.is_read_only());
        assert!(!session.is_loaded("products/3"));

        session.get_mut::<ProductName>(handles[1]).unwrap().name = "Renamed".to_string();
        assert!(!session.has_changes().unwrap());

        let before = server.request_count().await;
        session.save_changes().await.unwrap();
        assert_eq!(server.request_count().await, before);
    });
}

#[test]
fn distinct_projections_drop_duplicates() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, &[("Chai", 39), ("Chai", 12), ("Chang", 17)]).await;

        let mut session = store.open_session();
        let query = DocumentQuery::for_document::<Product>()
            .select(["Name"])
            .distinct()
            .order_by("Name");

        let handles = session.query::<ProductName>(&query).await.unwrap();
        let names: Vec<_> = handles
            .iter()
            .map(|handle| session.get::<ProductName>(*handle).unwrap().name.as_str())
            .collect();
        assert_eq!(names, vec!["Chai", "Chang"]);
    });
}

#[test]
fn tracked_entities_keep_local_changes() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, CATALOG).await;

        let mut session = store.open_session();
        let chai = session.load::<Product>("products/1").await.unwrap().unwrap();
        session.get_mut::<Product>(chai).unwrap().units_in_stock = 0;

        let query = DocumentQuery::for_document::<Product>().filter(Filter::eq("Name", "Chai"));
        let handles = session.query::<Product>(&query).await.unwrap();

        assert_eq!(handles, vec![chai]);
        assert_eq!(session.get::<Product>(chai).unwrap().units_in_stock, 0);
        assert!(session.has_changed(chai).unwrap());
    });
}

#[test]
fn documents_pending_deletion_stay_deleted_after_a_query() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, CATALOG).await;

        let mut session = store.open_session();
        let chai = session.load::<Product>("products/1").await.unwrap().unwrap();
        session.delete(chai).unwrap();
        session.delete_by_id("products/2", None).unwrap();

        let all = DocumentQuery::for_document::<Product>();
        let handles = session.query::<Product>(&all).await.unwrap();

        assert_eq!(handles.len(), 3);
        for handle in &handles {
            let id = session.id_of(*handle).unwrap();
            assert!(id != "products/1" && id != "products/2");
        }
        assert!(!session.is_loaded("products/1"));

        session.save_changes().await.unwrap();
        assert_eq!(server.document("products/1").await.unwrap(), None);
        assert_eq!(server.document("products/2").await.unwrap(), None);
        assert_eq!(server.document_count().await, 3);
    });
}

#[test]
fn lazy_queries_skip_documents_pending_deletion() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, CATALOG).await;

        let mut session = store.open_session();
        let chai = session.load::<Product>("products/1").await.unwrap().unwrap();
        session.delete(chai).unwrap();

        let named_chai = DocumentQuery::for_document::<Product>().filter(Filter::eq("Name", "Chai"));
        let lazy = session.lazily().query::<Product>(&named_chai).unwrap();

        assert!(session.lazy_value(&lazy).await.unwrap().is_empty());

        session.save_changes().await.unwrap();
        assert_eq!(server.document("products/1").await.unwrap(), None);
    });
}

#[test]
fn searches_and_set_membership() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, CATALOG).await;

        let mut session = store.open_session();

        let spread = DocumentQuery::for_document::<Product>().filter(Filter::search("Name", "boysenberry"));
        assert_eq!(session.count(&spread).await.unwrap(), 1);

        let picked = DocumentQuery::for_document::<Product>().filter(Filter::any_of("Name", ["Chai", "Chang", "Ikura"]));
        assert_eq!(session.count(&picked).await.unwrap(), 2);

        let others = DocumentQuery::for_document::<Product>().filter(Filter::any_of("Name", ["Chai", "Chang"]).not());
        assert_eq!(session.count(&others).await.unwrap(), 3);
    });
}

#[test]
fn grouped_queries_are_rejected_by_the_memory_server() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, CATALOG).await;

        let mut session = store.open_session();
        let query = DocumentQuery::for_document::<Product>()
            .group_by("Name")
            .select_key(Some("Name"), None)
            .select_count(Some("Count"));

        let error = session.query::<ProductName>(&query).await.unwrap_err();
        assert!(matches!(error, SessionError::Server { status: 400, .. }));
    });
}

#[test]
fn waiting_queries_retry_stale_results() {
    let server = InMemoryServer::builder().stale_queries(2).into_server();
    let store = DocumentStore::new(server.clone());

    block_on(async {
        seed_products(&server, CATALOG).await;

        let mut session = store.open_session();
        let fresh = DocumentQuery::for_document::<Product>().wait_for_non_stale_results();
        assert_eq!(session.query::<Product>(&fresh).await.unwrap().len(), 5);
        assert_eq!(session.number_of_requests(), 3);

        // Without waiting, stale results are returned as they are.
        server.mark_next_queries_stale(1).await;
        let relaxed = DocumentQuery::for_document::<Product>();
        assert_eq!(session.count(&relaxed).await.unwrap(), 5);
        assert_eq!(session.number_of_requests(), 4);
    });
}

#[test]
fn raw_queries_bind_parameters() {
    let (server, store) = store();

    block_on(async {
        seed_products(&server, CATALOG).await;

        let mut session = store.open_session();
        let well_stocked = RawQuery::new("from Products where UnitsInStock > $min order by Name")
            .add_parameter("min", 15)
            .take(2);
        let handles = session.raw_query::<Product>(&well_stocked).await.unwrap();

        let names: Vec<&str> = handles
            .iter()
            .map(|handle| session.get::<Product>(*handle).unwrap().name.as_str())
            .collect();
        assert_eq!(names, vec!["Chai", "Chang"]);

        let chang = RawQuery::new("from Products where Name = $name").add_parameter("$name", "Chang");
        let lazy = session.lazily().raw_query::<Product>(&chang).unwrap();
        assert_eq!(session.lazy_value(&lazy).await.unwrap(), vec![handles[1]]);

        let unbound = RawQuery::new("from Products where Name = $name");
        assert!(matches!(
            session.raw_query::<Product>(&unbound).await,
            Err(SessionError::Server { status: 400, .. })
        ));
        assert_eq!(session.number_of_requests(), 3);
    });
}
