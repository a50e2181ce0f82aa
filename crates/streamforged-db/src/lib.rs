//! Streamforged-DB: Job ledger storage.
//!
//! SQLite storage for cached conversion jobs using rusqlite and r2d2
//! connection pooling.
//!
//! # Modules
//!
//! - `migrations` - Database schema migrations
//! - `pool` - Connection pool management
//! - `models` - Rust models matching database schema
//! - `queries` - Database query operations
//!
//! # Example
//!
//! ```no_run
//! use streamforged_db::pool::{init_pool, get_conn};
//! use streamforged_db::queries::conversion_jobs;
//!
//! let pool = init_pool("/var/lib/streamforged/streamforged.db").unwrap();
//! let conn = get_conn(&pool).unwrap();
//!
//! let url = "https://example.com/a.mkv";
//! let (job, created) = conversion_jobs::get_or_create_job(&conn, url).unwrap();
//! println!("job {} (new: {})", job.id, created);
//! ```

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
