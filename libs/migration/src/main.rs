//! Schema CLI for the match store, e.g. `cargo run -p migration -- up`
//! with `DATABASE_URL` pointing at the target Postgres.

use migration::Migrator;
use sea_orm_migration::cli;

#[tokio::main]
async fn main() {
    cli::run_cli(Migrator).await;
}
