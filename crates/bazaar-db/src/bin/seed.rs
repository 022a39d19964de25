//! # Seed Data Generator
//!
//! Populates a database with a small demo marketplace and runs one
//! demonstration checkout so the settled state can be inspected.
//!
//! ## Usage
//! ```bash
//! # Seed ./bazaar_dev.db (default)
//! cargo run -p bazaar-db --bin seed
//!
//! # Specify database path
//! cargo run -p bazaar-db --bin seed -- --db ./data/bazaar.db
//! ```
//!
//! ## Generated Data
//! - Two buyers with opening balances and shipping addresses
//! - Two sellers (each with a payee party) listing offers across categories
//! - A handful of products in the `books` and `tools` categories
//! - One global coupon and one category-scoped coupon
//! - One committed checkout for the first buyer, printed as a receipt

use std::env;

use bazaar_core::{Coupon, Money, Product};
use bazaar_db::{Database, DbConfig};
use chrono::{Duration, Utc};
use uuid::Uuid;

/// (category, name, price_cents, stock) per product offer.
const CATALOG: &[(&str, &str, i64, i64)] = &[
    ("books", "Ledger Tales", 2000, 12),
    ("books", "The Art of Settlement", 3499, 5),
    ("books", "Concurrency for Merchants", 2750, 8),
    ("tools", "Wrench", 999, 30),
    ("tools", "Precision Scale", 8900, 3),
    ("tools", "Coin Counter", 4599, 7),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./bazaar_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Bazaar Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./bazaar_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Bazaar Seed Data Generator");
    println!("==========================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    // Skip seeding if the marketplace already has parties
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM parties")
        .fetch_one(db.pool())
        .await?;
    if existing > 0 {
        println!("⚠ Database already has {} parties", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    // Buyers
    let ada = db
        .parties()
        .create_party("Ada", 50_000, Some("12 Loop Road"))
        .await?;
    let grace = db
        .parties()
        .create_party("Grace", 25_000, Some("7 Compiler Lane"))
        .await?;
    println!("✓ Created buyers Ada and Grace");

    // Sellers, each settling to their own payee party
    let mut sellers = Vec::new();
    for name in ["Bookhouse", "Ironmonger"] {
        let payee = db.parties().create_party(name, 0, None).await?;
        let seller = db.parties().register_seller(&payee.id).await?;
        sellers.push(seller);
    }
    println!("✓ Registered {} sellers", sellers.len());

    // Products and offers: books at the first seller, tools at the second
    let mut first_book = None;
    for (category, name, price, stock) in CATALOG {
        let product = Product {
            id: Uuid::new_v4().to_string(),
            category_id: category.to_string(),
            name: name.to_string(),
        };
        db.products().insert(&product).await?;

        let seller = if *category == "books" {
            &sellers[0]
        } else {
            &sellers[1]
        };
        db.inventory()
            .set_offer(&seller.id, &product.id, *price, *stock)
            .await?;

        if first_book.is_none() && *category == "books" {
            first_book = Some((product, seller.id.clone()));
        }
    }
    println!("✓ Listed {} offers", CATALOG.len());

    // Coupons
    let now = Utc::now();
    db.coupons()
        .create(&Coupon {
            code: "WELCOME10".to_string(),
            discount_percent: 10,
            product_id: None,
            category_id: None,
            expires_at: now + Duration::days(30),
        })
        .await?;
    db.coupons()
        .create(&Coupon {
            code: "BOOKS25".to_string(),
            discount_percent: 25,
            product_id: None,
            category_id: Some("books".to_string()),
            expires_at: now + Duration::days(7),
        })
        .await?;
    println!("✓ Created coupons WELCOME10 and BOOKS25");

    // A demonstration checkout: Ada buys two copies of the first book with
    // the category coupon, Grace keeps a cart for later
    let (book, book_seller) = first_book.expect("catalog contains books");
    db.carts().add_line(&ada.id, &book.id, &book_seller, 2).await?;
    db.carts().add_line(&grace.id, &book.id, &book_seller, 1).await?;

    let receipt = db.checkout().place_order(&ada.id, Some("BOOKS25")).await?;

    println!();
    println!("Demonstration checkout");
    println!("----------------------");
    println!("Order:    {}", receipt.order_id);
    println!("Coupon:   {:?}", receipt.coupon);
    for line in &receipt.lines {
        println!(
            "  {} x{} @ {} - {} off = {}",
            line.product_id,
            line.quantity,
            Money::from_cents(line.unit_price_cents),
            Money::from_cents(line.line_discount_cents),
            Money::from_cents(line.line_total_cents),
        );
    }
    println!("Total:    {}", Money::from_cents(receipt.order_total_cents));
    println!(
        "Balances: Ada {}, Bookhouse {}",
        Money::from_cents(db.parties().balance(&ada.id).await?),
        Money::from_cents(
            db.parties()
                .balance(receipt.seller_totals.keys().next().expect("one payee"))
                .await?
        ),
    );

    println!();
    println!("Receipt (as a request handler would return it):");
    println!("{}", serde_json::to_string_pretty(&receipt)?);

    println!();
    println!("✓ Seed complete!");

    Ok(())
}
