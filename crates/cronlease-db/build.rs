//! Build script for the embedded migrations.
//!
//! `sqlx::migrate!` embeds `migrations/` at compile time, so the crate has
//! to be rebuilt whenever a migration is added or edited.

fn main() {
    println!("cargo:rerun-if-changed=migrations/");
}
