use anyhow::Context;
use coalesce::LoadError;
use futures::future::join_all;
use crate::domain::{Movement, Vehicle, VehicleRepo};
use crate::loaders::Loaders;

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMovement {
    pub movement: Movement,
    /// `None` when the vehicle no longer exists.
    pub vehicle: Option<Vehicle>,
}

/// Resolves the `vehicle` field of every movement through the request's loaders.
///
/// All lookups are registered before anything is awaited, so they coalesce
/// into as few vehicle queries as the loader's capacity allows.
pub async fn movements_with_vehicles(loaders: &Loaders, movements: Vec<Movement>) -> anyhow::Result<Vec<ResolvedMovement>> {
    let lookups: Vec<_> = movements
        .iter()
        .map(|movement| loaders.vehicle_by_id.load(movement.vehicle_id))
        .collect();

    join_all(lookups)
        .await
        .into_iter()
        .zip(movements)
        .map(|(vehicle, movement)| {
            let vehicle = vehicle.with_context(|| format!("resolving vehicle of movement {}", movement.id))?;
            Ok(ResolvedMovement {
                movement,
                vehicle: vehicle.found(),
            })
        })
        .collect()
}

/// Same resolution with one query per movement.
pub async fn movements_with_vehicles_unbatched(repo: &VehicleRepo, movements: Vec<Movement>) -> Vec<ResolvedMovement> {
    join_all(movements.into_iter().map(|movement| async move {
        let vehicle = repo.vehicle(movement.vehicle_id).await;
        ResolvedMovement { movement, vehicle }
    }))
    .await
}

/// Resolves the `vehicle(id: ID!)` query, where ids arrive as strings.
pub async fn vehicle(loaders: &Loaders, raw_id: &str) -> Result<Option<Vehicle>, LoadError> {
    Ok(loaders.vehicle_by_id.load_parsed(raw_id).await?.found())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use coalesce::RequestScope;
    use crate::domain::movements;
    use pretty_assertions::assert_eq;

    fn request(vehicles: i64) -> (RequestScope, Arc<VehicleRepo>, Loaders) {
        let scope = RequestScope::new();
        let repo = Arc::new(VehicleRepo::seeded(vehicles));
        let loaders = Loaders::with_defaults(&scope, Arc::clone(&repo)).unwrap();
        (scope, repo, loaders)
    }

    #[tokio::test(start_paused = true)]
    async fn test_movements_resolve_with_one_query() {
        let (_scope, repo, loaders) = request(10);

        let resolved = movements_with_vehicles(&loaders, movements(30, 10)).await.unwrap();

        assert_eq!(repo.queries(), 1);
        assert_eq!(resolved.len(), 30);
        assert_eq!(resolved[0].vehicle.as_ref().map(|v| v.id), Some(1));
        // id 11 has no vehicle
        assert_eq!(resolved[10].movement.vehicle_id, 11);
        assert_eq!(resolved[10].vehicle, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batched_matches_unbatched() {
        let (_scope, repo, loaders) = request(6);

        let batched = movements_with_vehicles(&loaders, movements(20, 6)).await.unwrap();
        let unbatched = movements_with_vehicles_unbatched(&repo, movements(20, 6)).await;

        assert_eq!(batched, unbatched);
        assert_eq!(repo.queries(), 1 + 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_resolution_served_from_cache() {
        let (_scope, repo, loaders) = request(4);

        movements_with_vehicles(&loaders, movements(8, 4)).await.unwrap();
        movements_with_vehicles(&loaders, movements(8, 4)).await.unwrap();

        assert_eq!(repo.queries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vehicle_lookup_by_raw_id() {
        let (_scope, repo, loaders) = request(3);

        assert_eq!(vehicle(&loaders, "2").await.unwrap().map(|v| v.id), Some(2));
        assert_eq!(vehicle(&loaders, "99").await.unwrap(), None);

        let err = vehicle(&loaders, "two").await.unwrap_err();
        assert!(matches!(err, LoadError::InvalidKey { .. }));
        assert_eq!(repo.queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_request_rejects_lookups() {
        let (scope, _repo, loaders) = request(3);
        scope.finish();

        let err = movements_with_vehicles(&loaders, movements(2, 3)).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<LoadError>(), Some(LoadError::Closed)));
    }
}
