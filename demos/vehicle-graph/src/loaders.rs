use std::sync::Arc;
use std::time::Duration;
use coalesce::{ConfigError, Loader, LoaderConfig, RequestScope};
use crate::domain::{Vehicle, VehicleRepo};

pub const VEHICLE_WINDOW: Duration = Duration::from_millis(1);
pub const VEHICLE_CAPACITY: usize = 100;

/// Every loader one request needs, built fresh per request.
#[derive(Debug, Clone)]
pub struct Loaders {
    pub vehicle_by_id: Loader<i64, Vehicle>,
}

impl Loaders {
    pub fn new(scope: &RequestScope, repo: Arc<VehicleRepo>, vehicles: LoaderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            vehicle_by_id: scope.loader(repo, vehicles)?,
        })
    }

    pub fn with_defaults(scope: &RequestScope, repo: Arc<VehicleRepo>) -> Result<Self, ConfigError> {
        Self::new(scope, repo, LoaderConfig::new(VEHICLE_WINDOW, VEHICLE_CAPACITY)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let scope = RequestScope::new();
        let loaders = Loaders::with_defaults(&scope, Arc::new(VehicleRepo::seeded(1))).unwrap();
        let config = loaders.vehicle_by_id.config();
        assert_eq!(config.window, Duration::from_millis(1));
        assert_eq!(config.capacity, 100);
    }

    #[test]
    fn test_finishing_the_request_closes_its_loaders() {
        let scope = RequestScope::new();
        let loaders = Loaders::with_defaults(&scope, Arc::new(VehicleRepo::seeded(1))).unwrap();
        scope.finish();
        assert!(loaders.vehicle_by_id.is_closed());
    }
}
