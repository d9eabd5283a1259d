#![allow(dead_code)]

use docsession::{
    Document, DocumentStore,
    memory::InMemoryServer,
    serde_json::{Value, json},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Product {
    pub name: String,
    pub units_in_stock: u32,
}

impl Document for Product {
    fn collection_name() -> &'static str {
        "Products"
    }
}

/// A projection over products.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProductName {
    pub name: String,
}

impl Document for ProductName {
    fn collection_name() -> &'static str {
        "Products"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Supplier {
    pub company_name: String,
}

impl Document for Supplier {
    fn collection_name() -> &'static str {
        "Suppliers"
    }
}

pub fn product(name: &str, units_in_stock: u32) -> Product {
    Product { name: name.to_string(), units_in_stock }
}

pub fn product_json(name: &str, units_in_stock: u32) -> Value {
    json!({ "Name": name, "UnitsInStock": units_in_stock })
}

/// A server shared with a store, so tests can inspect it while sessions run.
pub fn store() -> (InMemoryServer, DocumentStore<InMemoryServer>) {
    let server = InMemoryServer::builder().database_id("test").into_server();
    (server.clone(), DocumentStore::new(server))
}

/// Seeds `products/1..` with the given names and stock levels.
pub async fn seed_products(server: &InMemoryServer, products: &[(&str, u32)]) {
    for (i, (name, stock)) in products.iter().enumerate() {
        server
            .put_document(&format!("products/{}", i + 1), Some("Products"), product_json(name, *stock))
            .await
            .unwrap();
    }
}
