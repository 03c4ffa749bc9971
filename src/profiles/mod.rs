//! Read-only view of the profile store: users, duos and who belongs to which.

mod duos;

use axum::{routing::get, Router};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{db, geo::Coordinates, AppError, AppResult, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/mine", get(duos::my_duos))
        .route("/{uuid}", get(duos::duo_page))
}

#[derive(Debug, Clone, Serialize)]
pub struct Duo {
    pub id: Uuid,
    pub title: String,
    pub bio: Option<String>,
    pub photos: Vec<String>,
    pub member1: String,
    pub member2: String,
    pub coordinates: Option<Coordinates>,
    pub location_name: Option<String>,
    pub created_at: i64,
}

impl Duo {
    pub fn members(&self) -> [&str; 2] {
        [&self.member1, &self.member2]
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.members().contains(&user_id)
    }

    pub fn shares_member(&self, other: &Duo) -> bool {
        other.members().iter().any(|m| self.is_member(m))
    }

    pub fn require_member(&self, user_id: &str) -> AppResult<()> {
        if self.is_member(user_id) {
            Ok(())
        } else {
            Err(AppError::denied(format!("not a member of duo {}", self.id)))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub name: String,
}

pub(crate) const DUO_COLUMNS: &str =
    "id,title,bio,photos,member1,member2,latitude,longitude,location_name,created_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DuoRow {
    id: String,
    title: String,
    bio: Option<String>,
    photos: String,
    member1: String,
    member2: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    location_name: Option<String>,
    created_at: i64,
}

impl TryFrom<DuoRow> for Duo {
    type Error = AppError;

    fn try_from(row: DuoRow) -> AppResult<Duo> {
        Ok(Duo {
            id: db::parse_id(&row.id)?,
            title: row.title,
            bio: row.bio,
            photos: serde_json::from_str(&row.photos)?,
            member1: row.member1,
            member2: row.member2,
            coordinates: Coordinates::new(row.latitude, row.longitude),
            location_name: row.location_name,
            created_at: row.created_at,
        })
    }
}

pub async fn find_duo(db_pool: &SqlitePool, duo_id: Uuid) -> AppResult<Option<Duo>> {
    sqlx::query_as::<_, DuoRow>(&format!("SELECT {DUO_COLUMNS} FROM duos WHERE id=?"))
        .bind(duo_id.to_string())
        .fetch_optional(db_pool)
        .await?
        .map(Duo::try_from)
        .transpose()
}

pub async fn duo(db_pool: &SqlitePool, duo_id: Uuid) -> AppResult<Duo> {
    find_duo(db_pool, duo_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("duo {duo_id}")))
}

pub async fn duos_of_user(db_pool: &SqlitePool, user_id: &str) -> AppResult<Vec<Duo>> {
    sqlx::query_as::<_, DuoRow>(&format!(
        "SELECT {DUO_COLUMNS} FROM duos WHERE member1=? OR member2=? ORDER BY created_at, id"
    ))
    .bind(user_id)
    .bind(user_id)
    .fetch_all(db_pool)
    .await?
    .into_iter()
    .map(Duo::try_from)
    .collect()
}

pub async fn user_name(db_pool: &SqlitePool, user_id: &str) -> AppResult<String> {
    let name: Option<(String,)> = sqlx::query_as("SELECT name FROM users WHERE id=?")
        .bind(user_id)
        .fetch_optional(db_pool)
        .await?;

    Ok(name.map(|(name,)| name).unwrap_or_else(|| "Anonymous".to_owned()))
}

/// Members of every given duo, in order, without repeats.
pub async fn participants(db_pool: &SqlitePool, duos: &[&Duo]) -> AppResult<Vec<Participant>> {
    let mut participants: Vec<Participant> = Vec::with_capacity(duos.len() * 2);
    for user_id in duos.iter().flat_map(|duo| duo.members()) {
        if participants.iter().any(|p| p.user_id == user_id) {
            continue;
        }
        participants.push(Participant {
            user_id: user_id.to_owned(),
            name: user_name(db_pool, user_id).await?,
        });
    }
    Ok(participants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn duo_lookup_and_membership() {
        let db_pool = db::test_pool().await;
        let duo_id = fixtures::duo(&db_pool, "Night Owls", ["ann", "bob"], Some((1.0, 2.0))).await;

        let duo = duo(&db_pool, duo_id).await.unwrap();
        assert_eq!(duo.title, "Night Owls");
        assert!(duo.is_member("ann"));
        assert!(!duo.is_member("eve"));
        assert!(matches!(duo.require_member("eve"), Err(AppError::PermissionDenied(_))));
        assert_eq!(duo.coordinates, Coordinates::new(Some(1.0), Some(2.0)));
    }

    #[tokio::test]
    async fn unknown_duo_is_not_found() {
        let db_pool = db::test_pool().await;
        assert!(matches!(duo(&db_pool, Uuid::now_v7()).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn duos_of_user_covers_both_member_slots() {
        let db_pool = db::test_pool().await;
        let first = fixtures::duo(&db_pool, "A", ["ann", "bob"], None).await;
        let second = fixtures::duo(&db_pool, "B", ["cat", "ann"], None).await;
        fixtures::duo(&db_pool, "C", ["cat", "dan"], None).await;

        let ids: Vec<Uuid> = duos_of_user(&db_pool, "ann").await.unwrap().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[tokio::test]
    async fn participants_are_deduplicated() {
        let db_pool = db::test_pool().await;
        let a = duo(&db_pool, fixtures::duo(&db_pool, "A", ["ann", "bob"], None).await).await.unwrap();
        let b = duo(&db_pool, fixtures::duo(&db_pool, "B", ["bob", "cat"], None).await).await.unwrap();

        let names: Vec<String> = participants(&db_pool, &[&a, &b])
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Ann", "Bob", "Cat"]);
    }
}
