mod common;

use common::{Product, seed_products, store};
use docsession::{Document, memory::InMemoryServer, serde_json::json};
use futures::executor::block_on;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Order {
    company: String,
    lines: Vec<OrderLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OrderLine {
    product: String,
    quantity: u32,
}

impl Document for Order {
    fn collection_name() -> &'static str {
        "Orders"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Company {
    name: String,
}

impl Document for Company {
    fn collection_name() -> &'static str {
        "Companies"
    }
}

/// Two products, one company and two orders, the second naming a company that does not exist.
async fn seed_orders(server: &InMemoryServer) {
    seed_products(server, &[("Chai", 39), ("Chang", 17), ("Aniseed Syrup", 13)]).await;
    server.put_document("companies/1", Some("Companies"), json!({ "Name": "Acme" })).await.unwrap();
    server
        .put_document(
            "orders/1",
            Some("Orders"),
            json!({
                "Company": "companies/1",
                "Lines": [
                    { "Product": "products/1", "Quantity": 2 },
                    { "Product": "products/2", "Quantity": 1 }
                ]
            }),
        )
        .await
        .unwrap();
    server
        .put_document("orders/2", Some("Orders"), json!({ "Company": "companies/2", "Lines": [] }))
        .await
        .unwrap();
}

#[test]
fn included_documents_load_without_a_request() {
    let (server, store) = store();

    block_on(async {
        seed_orders(&server).await;

        let mut session = store.open_session();
        let order = session
            .include("Company")
            .include("Lines.Product")
            .load::<Order>("orders/1")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(session.number_of_requests(), 1);
        assert!(session.is_loaded("companies/1"));
        assert!(session.is_loaded("Products/2"));
        assert!(!session.is_loaded("products/3"));
        assert!(!session.has_changes().unwrap());

        let company = session.load::<Company>("companies/1").await.unwrap().unwrap();
        let products = session.load_many::<Product>(&["products/1", "products/2"]).await.unwrap();

        assert_eq!(session.get::<Company>(company).unwrap().name, "Acme");
        assert_eq!(session.get::<Product>(products[1].unwrap()).unwrap().name, "Chang");
        assert_eq!(session.get::<Order>(order).unwrap().lines.len(), 2);

        // Everything the includes reference is now known.
        let again = session.include("Company").load::<Order>("orders/1").await.unwrap();
        assert_eq!(again, Some(order));
        assert_eq!(session.number_of_requests(), 1);
        assert_eq!(server.request_count().await, 1);
    });
}

#[test]
fn includes_of_known_documents_are_fetched_once() {
    let (server, store) = store();

    block_on(async {
        seed_orders(&server).await;

        let mut session = store.open_session();
        let order = session.load::<Order>("orders/1").await.unwrap().unwrap();
        session.get_mut::<Order>(order).unwrap().lines[0].quantity = 5;

        let included = session.include("Company").load::<Order>("orders/1").await.unwrap();
        assert_eq!(included, Some(order));
        assert_eq!(session.number_of_requests(), 2);
        assert_eq!(session.get::<Order>(order).unwrap().lines[0].quantity, 5);

        session.load::<Company>("companies/1").await.unwrap().unwrap();
        assert_eq!(session.number_of_requests(), 2);
    });
}

#[test]
fn missing_includes_are_not_kept() {
    let (server, store) = store();

    block_on(async {
        seed_orders(&server).await;

        let mut session = store.open_session();
        session.include("Company").load::<Order>("orders/2").await.unwrap().unwrap();
        assert!(!session.is_loaded("companies/2"));

        assert_eq!(session.load::<Company>("companies/2").await.unwrap(), None);
        assert_eq!(session.number_of_requests(), 2);
    });
}

#[test]
fn lazy_includes_share_the_round_trip() {
    let (server, store) = store();

    block_on(async {
        seed_orders(&server).await;

        let mut session = store.open_session();
        let order = session.lazily().include("Company").load::<Order>("orders/1").unwrap();
        let syrup = session.lazily().load::<Product>("products/3").unwrap();

        let order = session.lazy_value(&order).await.unwrap().unwrap();
        assert!(session.lazy_value(&syrup).await.unwrap().is_some());
        assert_eq!(session.number_of_requests(), 1);
        assert!(session.is_loaded("companies/1"));

        let company = session.lazily().load::<Company>("companies/1").unwrap();
        let again = session.lazily().include("Company").load::<Order>("orders/1").unwrap();
        assert!(!session.has_pending_lazy_operations());

        let company = session.lazy_value(&company).await.unwrap().unwrap();
        assert_eq!(session.get::<Company>(company).unwrap().name, "Acme");
        assert_eq!(session.lazy_value(&again).await.unwrap(), Some(order));
        assert_eq!(server.request_count().await, 1);
    });
}

#[test]
fn clear_and_delete_drop_included_documents() {
    let (server, store) = store();

    block_on(async {
        seed_orders(&server).await;

        let mut session = store.open_session();
        session.include("Lines.Product").load::<Order>("orders/1").await.unwrap();
        session.delete_by_id("products/1", None).unwrap();

        assert!(!session.is_loaded("products/1"));
        assert_eq!(session.load::<Product>("products/1").await.unwrap(), None);

        session.clear();
        assert!(!session.is_loaded("products/2"));
        session.load::<Product>("products/2").await.unwrap().unwrap();
        assert_eq!(session.number_of_requests(), 2);
    });
}
