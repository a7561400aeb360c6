//! Demo Database
//!
//! Creates and fills the e-commerce SQLite database used by the CLI. The data is
//! deliberately untidy: mixed-case categories, NULL and placeholder regions.

use crate::error::{PipelineError, Result};
use crate::execution::sqlite_engine::SqliteStore;
use chrono::{Duration as ChronoDuration, Local};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS customers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    join_date TEXT,
    region TEXT
);

CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    category TEXT,
    price REAL,
    inventory_count INTEGER
);

CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    customer_id INTEGER,
    order_date TEXT,
    status TEXT,
    FOREIGN KEY (customer_id) REFERENCES customers (id)
);

CREATE TABLE IF NOT EXISTS order_items (
    order_id INTEGER,
    product_id INTEGER,
    quantity INTEGER,
    FOREIGN KEY (order_id) REFERENCES orders (id),
    FOREIGN KEY (product_id) REFERENCES products (id)
);
"#;

const REGIONS: &[Option<&str>] = &[
    Some("North"),
    Some("South"),
    Some("East"),
    Some("West"),
    None,
    Some("n/a"),
    Some("Northeast"),
];

const CUSTOMER_NAMES: &[&str] = &[
    "Alice Smith",
    "Bob Jones",
    "Charlie Brown",
    "David Wilson",
    "Eva Green",
    "Frank White",
    "Grace Hall",
];

const CATEGORIES: &[&str] = &[
    "Electronics",
    "electronics",
    "Clothing",
    "Home",
    "Books",
    "Toys",
    "ELECTRONICS",
];

const ORDER_STATUSES: &[&str] = &["Pending", "Shipped", "Delivered", "Cancelled", "returned"];

/// Row counts written by a seeding run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub customers: usize,
    pub products: usize,
    pub orders: usize,
    pub order_items: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct SeedOptions {
    pub customers: usize,
    pub products: usize,
    pub orders: usize,
    /// Fixed RNG seed for reproducible data
    pub rng_seed: Option<u64>,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            customers: 20,
            products: 50,
            orders: 100,
            rng_seed: None,
        }
    }
}

/// Human descriptions for the demo tables, used for ranking
pub fn default_descriptions() -> HashMap<String, String> {
    [
        (
            "customers",
            "Contains customer information including unique ID, name, join date, and geographical region. Use this table to filter by customer demographics or tenure.",
        ),
        (
            "products",
            "Catalog of available items. Columns include product ID, name, category (e.g., Electronics, Clothing), price, and current inventory count. Use this for product-related queries.",
        ),
        (
            "orders",
            "Transactional records of purchases. Links customers to their orders. Includes order ID, customer ID, order date, and current status (e.g., Pending, Delivered).",
        ),
        (
            "order_items",
            "Line items for each order. Links orders to specific products. Contains order ID, product_id, and quantity purchased. Use this to calculate total sales or product popularity.",
        ),
    ]
    .into_iter()
    .map(|(table, description)| (table.to_string(), description.to_string()))
    .collect()
}

/// Replace any existing file at `path` with a freshly seeded database
pub fn create_demo_database(path: impl AsRef<Path>, options: SeedOptions) -> Result<SeedSummary> {
    let path = path.as_ref();
    if path.exists() {
        std::fs::remove_file(path)?;
        info!("Removed existing database {}", path.display());
    }

    let store = SqliteStore::open(path)?;
    let summary = seed_store(&store, options)?;
    info!(
        "Seeded {}: {} customers, {} products, {} orders, {} order items",
        path.display(),
        summary.customers,
        summary.products,
        summary.orders,
        summary.order_items
    );
    Ok(summary)
}

/// Create the demo tables in `store` and fill them
pub fn seed_store(store: &SqliteStore, options: SeedOptions) -> Result<SeedSummary> {
    let mut rng = match options.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    store.execute_batch(SCHEMA_SQL)?;
    store.with_connection(|conn| {
        let tx = conn.transaction()?;
        let today = Local::now().date_naive();
        let mut summary = SeedSummary::default();

        {
            let mut insert =
                tx.prepare("INSERT INTO customers (name, join_date, region) VALUES (?1, ?2, ?3)")?;
            for i in 0..options.customers {
                let name = format!("{} {}", pick(&mut rng, CUSTOMER_NAMES)?, i);
                let join_date = today - ChronoDuration::days(rng.gen_range(0..=730));
                let region = pick(&mut rng, REGIONS)?;
                insert.execute(rusqlite::params![
                    name,
                    join_date.format("%Y-%m-%d").to_string(),
                    region
                ])?;
                summary.customers += 1;
            }
        }

        {
            let mut insert = tx.prepare(
                "INSERT INTO products (name, category, price, inventory_count) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for _ in 0..options.products {
                let category = pick(&mut rng, CATEGORIES)?;
                let base = pick(&mut rng, product_names(category))?;
                let name = format!("{} {}", base, rng.gen_range(100..=999));
                let price: f64 = rng.gen_range(10.0..1000.0);
                let price = (price * 100.0).round() / 100.0;
                let inventory: i64 = rng.gen_range(0..=100);
                insert.execute(rusqlite::params![name, category, price, inventory])?;
                summary.products += 1;
            }
        }

        let customer_ids = ids(&tx, "SELECT id FROM customers")?;
        if !customer_ids.is_empty() {
            let mut insert = tx
                .prepare("INSERT INTO orders (customer_id, order_date, status) VALUES (?1, ?2, ?3)")?;
            for _ in 0..options.orders {
                let customer_id = pick(&mut rng, &customer_ids)?;
                let order_date = today - ChronoDuration::days(rng.gen_range(0..=60));
                let status = pick(&mut rng, ORDER_STATUSES)?;
                insert.execute(rusqlite::params![
                    customer_id,
                    order_date.format("%Y-%m-%d").to_string(),
                    status
                ])?;
                summary.orders += 1;
            }
        }

        let order_ids = ids(&tx, "SELECT id FROM orders")?;
        let product_ids = ids(&tx, "SELECT id FROM products")?;
        if !product_ids.is_empty() {
            let mut insert = tx.prepare(
                "INSERT INTO order_items (order_id, product_id, quantity) VALUES (?1, ?2, ?3)",
            )?;
            for order_id in order_ids {
                let count = rng.gen_range(1..=5usize).min(product_ids.len());
                for product_id in product_ids.choose_multiple(&mut rng, count) {
                    let quantity: i64 = rng.gen_range(1..=10);
                    insert.execute(rusqlite::params![order_id, product_id, quantity])?;
                    summary.order_items += 1;
                }
            }
        }

        tx.commit()?;
        Ok(summary)
    })
}

fn product_names(category: &str) -> &'static [&'static str] {
    match category.to_lowercase().as_str() {
        "clothing" => &["T-Shirt", "Jeans", "Jacket", "Sneakers", "Hat"],
        "home" => &["Blender", "Toaster", "Lamp", "Chair", "Table"],
        "books" => &["Novel", "Textbook", "Cookbook", "Biography", "Comic"],
        "toys" => &["Action Figure", "Doll", "Puzzle", "Board Game", "Lego Set"],
        _ => &["Smartphone", "Laptop", "Headphones", "Monitor", "Keyboard"],
    }
}

fn pick<T: Copy>(rng: &mut StdRng, items: &[T]) -> Result<T> {
    items
        .choose(rng)
        .copied()
        .ok_or_else(|| PipelineError::Schema("cannot pick from an empty list".to_string()))
}

fn ids(conn: &rusqlite::Connection, sql: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(ids)
}
