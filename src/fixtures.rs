//! Seeding helpers standing in for the profile store in tests.

use std::sync::atomic::{AtomicI64, Ordering};

use sqlx::SqlitePool;
use uuid::Uuid;

static CLOCK: AtomicI64 = AtomicI64::new(1_700_000_000_000);

fn capitalize(user_id: &str) -> String {
    let mut chars = user_id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub(crate) async fn user(db_pool: &SqlitePool, user_id: &str) {
    sqlx::query("INSERT OR IGNORE INTO users (id,name) VALUES (?,?)")
        .bind(user_id)
        .bind(capitalize(user_id))
        .execute(db_pool)
        .await
        .unwrap();
}

pub(crate) async fn duo(
    db_pool: &SqlitePool,
    title: &str,
    [member1, member2]: [&str; 2],
    location: Option<(f64, f64)>,
) -> Uuid {
    user(db_pool, member1).await;
    user(db_pool, member2).await;

    let id = Uuid::now_v7();
    sqlx::query(
        "INSERT INTO duos (id,title,photos,member1,member2,latitude,longitude,created_at) \
         VALUES (?,?,'[]',?,?,?,?,?)",
    )
    .bind(id.to_string())
    .bind(title)
    .bind(member1)
    .bind(member2)
    .bind(location.map(|(lat, _)| lat))
    .bind(location.map(|(_, lon)| lon))
    .bind(CLOCK.fetch_add(1, Ordering::SeqCst))
    .execute(db_pool)
    .await
    .unwrap();
    id
}

pub(crate) async fn count(db_pool: &SqlitePool, table: &str) -> i64 {
    let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(db_pool)
        .await
        .unwrap();
    count
}
