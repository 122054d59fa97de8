use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use coalesce::{BatchFn, Fetched};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traction {
    Rwd,
    Fwd,
    Awd,
    FourWd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleStatus {
    Active,
    Inactive,
    Discontinued,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vehicle {
    pub id: i64,
    pub vin: String,
    pub name: String,
    pub model_code: String,
    pub traction: Traction,
    pub release_year: u16,
    pub batch_number: String,
    pub color: Option<String>,
    pub mileage: u32,
    pub status: VehicleStatus,
}

/// Inventory lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementKind {
    Sale,
    Defect,
    Discontinued,
    Transfer,
    Return,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Movement {
    pub id: i64,
    pub vehicle_id: i64,
    pub kind: MovementKind,
    pub description: String,
}

const MODELS: [(&str, &str, Traction); 4] = [
    ("Ranger", "RG-22", Traction::FourWd),
    ("Corsa", "CS-10", Traction::Fwd),
    ("Mustang", "MS-50", Traction::Rwd),
    ("Outback", "OB-31", Traction::Awd),
];

const COLORS: [Option<&str>; 4] = [Some("red"), Some("graphite"), None, Some("white")];

const KINDS: [MovementKind; 5] = [
    MovementKind::Sale,
    MovementKind::Transfer,
    MovementKind::Return,
    MovementKind::Defect,
    MovementKind::Discontinued,
];

impl Vehicle {
    fn seeded(id: i64) -> Self {
        let slot = id.unsigned_abs() as usize;
        let (name, model_code, traction) = MODELS[slot % MODELS.len()];
        Self {
            id,
            vin: format!("1GC{id:014}"),
            name: name.to_string(),
            model_code: model_code.to_string(),
            traction,
            release_year: 2015 + (slot % 10) as u16,
            batch_number: format!("B-{:04}", slot / 10),
            color: COLORS[slot % COLORS.len()].map(str::to_string),
            mileage: ((slot % 90_000) as u32 * 1_370) % 90_000,
            status: match slot {
                s if s % 7 == 0 => VehicleStatus::Discontinued,
                s if s % 5 == 0 => VehicleStatus::Inactive,
                _ => VehicleStatus::Active,
            },
        }
    }
}

/// Movements spread over vehicle ids `1..=vehicles + 1`.
///
/// The last id has no vehicle, standing in for a movement whose vehicle
/// was deleted.
pub fn movements(count: usize, vehicles: i64) -> Vec<Movement> {
    let span = vehicles.max(0) + 1;
    (0..count)
        .map(|i| {
            let kind = KINDS[i % KINDS.len()];
            Movement {
                id: i as i64 + 1,
                vehicle_id: (i as i64 % span) + 1,
                kind,
                description: format!("{kind:?} #{}", i + 1),
            }
        })
        .collect()
}

/// In-memory vehicle table that counts the queries issued against it.
#[derive(Debug, Default)]
pub struct VehicleRepo {
    rows: HashMap<i64, Vehicle>,
    latency: Duration,
    queries: AtomicUsize,
}

impl VehicleRepo {
    pub fn seeded(count: i64) -> Self {
        Self {
            rows: (1..=count).map(|id| (id, Vehicle::seeded(id))).collect(),
            ..Self::default()
        }
    }

    /// Simulated round trip added to every query.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// `SELECT * FROM vehicles WHERE id = $1`
    pub async fn vehicle(&self, id: i64) -> Option<Vehicle> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.latency).await;
        self.rows.get(&id).cloned()
    }
}

#[async_trait]
impl BatchFn<i64, Vehicle> for VehicleRepo {
    /// `SELECT * FROM vehicles WHERE id IN (...)`
    async fn load(&self, ids: &[i64], cancel: CancellationToken) -> anyhow::Result<Fetched<i64, Vehicle>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(ids = ids.len(), "querying vehicles");

        tokio::select! {
            _ = cancel.cancelled() => anyhow::bail!("vehicle query cancelled"),
            _ = tokio::time::sleep(self.latency) => {}
        }

        Ok(Fetched::found(
            ids.iter().filter_map(|id| self.rows.get(id).map(|v| (*id, v.clone()))),
        ))
    }
}
