use futures_util::{future, stream::{self, BoxStream}, StreamExt, TryStreamExt};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    geo,
    ledger,
    profiles::{self, Duo, DuoRow},
    AppError, AppResult,
};

/// Fetch order is the order duos were created in.
const ALL_DUOS: &str = "SELECT id,title,bio,photos,member1,member2,latitude,longitude,location_name,created_at \
                        FROM duos ORDER BY rowid";

#[derive(Debug, Clone, Copy, Default)]
pub struct CandidateQuery {
    /// Drops duos further away than this; duos without a distance stay.
    pub radius_km: Option<f64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub duo: Duo,
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuoSummary {
    pub id: Uuid,
    pub title: String,
    pub bio: Option<String>,
    pub photos: Vec<String>,
    pub location_name: Option<String>,
    pub distance: Option<f64>,
    pub distance_label: String,
}

impl From<Candidate> for DuoSummary {
    fn from(Candidate { duo, distance_km }: Candidate) -> Self {
        DuoSummary {
            id: duo.id,
            title: duo.title,
            bio: duo.bio,
            photos: duo.photos,
            location_name: duo.location_name,
            distance: distance_km,
            distance_label: geo::format_distance(distance_km),
        }
    }
}

impl CandidateQuery {
    fn validate(&self) -> AppResult<()> {
        match self.radius_km {
            Some(radius) if !radius.is_finite() || radius < 0.0 => Err(AppError::validation(format!(
                "radius_km must be a non-negative number, got {radius}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Duos `duo_id` has not judged yet, nearest first.
///
/// Excludes the duo itself, every duo it liked or disliked, and duos
/// sharing a member with it. Duos without a known location follow all
/// located ones in fetch order. If `duo_id` has no location itself, nothing
/// is ranked and rows stream straight from the store. Never writes.
pub async fn candidates<'a>(
    db_pool: &'a SqlitePool,
    duo_id: Uuid,
    query: CandidateQuery,
) -> AppResult<BoxStream<'a, AppResult<Candidate>>> {
    query.validate()?;
    let origin = profiles::duo(db_pool, duo_id).await?;
    let origin_at = origin.coordinates;
    let mut excluded = ledger::interacted_targets(db_pool, duo_id).await?;
    excluded.insert(duo_id);

    let eligible = sqlx::query_as::<_, DuoRow>(ALL_DUOS)
        .fetch(db_pool)
        .map_err(AppError::from)
        .and_then(|row| future::ready(Duo::try_from(row)))
        .try_filter(move |duo| future::ready(!excluded.contains(&duo.id) && !origin.shares_member(duo)));

    let limit = query.limit.unwrap_or(usize::MAX);

    if origin_at.is_none() {
        return Ok(eligible
            .map_ok(|duo| Candidate { duo, distance_km: None })
            .take(limit)
            .boxed());
    }

    let duos: Vec<Duo> = eligible.try_collect().await?;
    let (mut located, unlocated): (Vec<Candidate>, Vec<Candidate>) = duos
        .into_iter()
        .map(|duo| Candidate {
            distance_km: geo::distance_km(origin_at, duo.coordinates),
            duo,
        })
        .filter(|c| match (c.distance_km, query.radius_km) {
            (Some(km), Some(radius)) => km <= radius,
            _ => true,
        })
        .partition(|c| c.distance_km.is_some());

    // Stable, so equal distances keep fetch order.
    located.sort_by(|a, b| {
        let a = a.distance_km.unwrap_or(f64::INFINITY);
        let b = b.distance_km.unwrap_or(f64::INFINITY);
        a.total_cmp(&b)
    });

    let ranked = located.into_iter().chain(unlocated).take(limit).map(Ok);
    Ok(stream::iter(ranked).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, fixtures, ledger::Action};

    async fn ids(db_pool: &SqlitePool, duo_id: Uuid, query: CandidateQuery) -> Vec<Uuid> {
        candidates(db_pool, duo_id, query)
            .await
            .unwrap()
            .map_ok(|c| c.duo.id)
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn nearest_first_then_unlocated() {
        let db_pool = db::test_pool().await;
        let z = fixtures::duo(&db_pool, "Z", ["zed", "zoe"], None).await;
        let y = fixtures::duo(&db_pool, "Y", ["yan", "yul"], Some((0.0, 5.0))).await;
        let a = fixtures::duo(&db_pool, "A", ["ann", "bob"], Some((0.0, 0.0))).await;
        let x = fixtures::duo(&db_pool, "X", ["xia", "xoo"], Some((0.0, 1.0))).await;

        assert_eq!(ids(&db_pool, a, CandidateQuery::default()).await, vec![x, y, z]);

        let summaries: Vec<DuoSummary> = candidates(&db_pool, a, CandidateQuery::default())
            .await
            .unwrap()
            .map_ok(DuoSummary::from)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(summaries[0].distance_label, "111km");
        assert_eq!(summaries[2].distance, None);
        assert_eq!(summaries[2].distance_label, "Unknown");
    }

    #[tokio::test]
    async fn excludes_self_judged_and_own_duos() {
        let db_pool = db::test_pool().await;
        let a = fixtures::duo(&db_pool, "A", ["ann", "bob"], Some((0.0, 0.0))).await;
        let liked = fixtures::duo(&db_pool, "L", ["cat", "dan"], Some((0.0, 1.0))).await;
        let disliked = fixtures::duo(&db_pool, "D", ["eve", "fay"], Some((0.0, 2.0))).await;
        let own = fixtures::duo(&db_pool, "O", ["ann", "gus"], Some((0.0, 3.0))).await;
        let fresh = fixtures::duo(&db_pool, "F", ["hal", "ivy"], Some((0.0, 4.0))).await;

        ledger::record(&db_pool, a, liked, Action::Like).await.unwrap();
        ledger::record(&db_pool, a, disliked, Action::Dislike).await.unwrap();

        let found = ids(&db_pool, a, CandidateQuery::default()).await;
        assert_eq!(found, vec![fresh]);
        assert!(!found.contains(&a) && !found.contains(&own));
    }

    #[tokio::test]
    async fn liker_stays_a_candidate_until_judged_back() {
        let db_pool = db::test_pool().await;
        let d1 = fixtures::duo(&db_pool, "D1", ["ann", "bob"], None).await;
        let d2 = fixtures::duo(&db_pool, "D2", ["cat", "dan"], None).await;

        ledger::record(&db_pool, d1, d2, Action::Like).await.unwrap();
        assert_eq!(ids(&db_pool, d2, CandidateQuery::default()).await, vec![d1]);
        assert!(ids(&db_pool, d1, CandidateQuery::default()).await.is_empty());

        ledger::record(&db_pool, d2, d1, Action::Dislike).await.unwrap();
        assert!(ids(&db_pool, d2, CandidateQuery::default()).await.is_empty());
    }

    #[tokio::test]
    async fn unlocated_origin_keeps_fetch_order() {
        let db_pool = db::test_pool().await;
        let a = fixtures::duo(&db_pool, "A", ["ann", "bob"], None).await;
        let far = fixtures::duo(&db_pool, "Far", ["cat", "dan"], Some((40.0, 40.0))).await;
        let near = fixtures::duo(&db_pool, "Near", ["eve", "fay"], Some((0.0, 0.1))).await;
        let none = fixtures::duo(&db_pool, "None", ["gus", "hal"], None).await;

        assert_eq!(ids(&db_pool, a, CandidateQuery::default()).await, vec![far, near, none]);
    }

    #[tokio::test]
    async fn radius_and_limit() {
        let db_pool = db::test_pool().await;
        let a = fixtures::duo(&db_pool, "A", ["ann", "bob"], Some((0.0, 0.0))).await;
        let near = fixtures::duo(&db_pool, "Near", ["cat", "dan"], Some((0.0, 0.05))).await;
        fixtures::duo(&db_pool, "Far", ["eve", "fay"], Some((0.0, 5.0))).await;
        let unknown = fixtures::duo(&db_pool, "Unknown", ["gus", "hal"], None).await;

        let within_10km = CandidateQuery { radius_km: Some(10.0), limit: None };
        assert_eq!(ids(&db_pool, a, within_10km).await, vec![near, unknown]);

        let first_only = CandidateQuery { radius_km: None, limit: Some(1) };
        assert_eq!(ids(&db_pool, a, first_only).await, vec![near]);
    }

    #[tokio::test]
    async fn malformed_radius_is_rejected() {
        let db_pool = db::test_pool().await;
        let a = fixtures::duo(&db_pool, "A", ["ann", "bob"], Some((0.0, 0.0))).await;
        fixtures::duo(&db_pool, "B", ["cat", "dan"], Some((0.0, 0.01))).await;

        for radius in [f64::NAN, f64::INFINITY, -1.0] {
            let query = CandidateQuery { radius_km: Some(radius), limit: None };
            assert!(matches!(candidates(&db_pool, a, query).await, Err(AppError::Validation(_))));
        }

        let zero = CandidateQuery { radius_km: Some(0.0), limit: None };
        assert!(ids(&db_pool, a, zero).await.is_empty());
    }

    #[tokio::test]
    async fn candidates_never_touch_the_ledger() {
        let db_pool = db::test_pool().await;
        let a = fixtures::duo(&db_pool, "A", ["ann", "bob"], Some((0.0, 0.0))).await;
        fixtures::duo(&db_pool, "B", ["cat", "dan"], Some((0.0, 1.0))).await;

        ids(&db_pool, a, CandidateQuery::default()).await;
        assert_eq!(fixtures::count(&db_pool, "interactions").await, 0);
    }

    #[tokio::test]
    async fn unknown_duo_is_not_found() {
        let db_pool = db::test_pool().await;
        let result = candidates(&db_pool, Uuid::now_v7(), CandidateQuery::default()).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
