mod domain;
mod loaders;
mod resolver;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;
use clap::Parser;
use coalesce::{LoaderConfig, RequestScope};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use crate::domain::{Movement, VehicleRepo};
use crate::loaders::Loaders;
use crate::resolver::ResolvedMovement;
use crate::telemetry::LogFormat;

/// Resolves a page of vehicle movements the way a GraphQL `movements { vehicle }`
/// query would, once through per-request loaders and once naively.
#[derive(Debug, Parser)]
#[command(name = "vehicle-graph", version)]
struct Args {
    /// How long a vehicle batch collects keys before it is dispatched [default: 1ms]
    #[arg(long, env = "VEHICLE_GRAPH_WINDOW", value_parser = humantime::parse_duration)]
    window: Option<Duration>,
    /// Maximum unique vehicle ids per query [default: 100]
    #[arg(long, env = "VEHICLE_GRAPH_CAPACITY")]
    capacity: Option<usize>,
    /// Number of movements in the page.
    #[arg(long, default_value_t = 250)]
    movements: usize,
    /// Number of vehicles in the table.
    #[arg(long, default_value_t = 40)]
    vehicles: i64,
    /// Simulated database round trip.
    #[arg(long, default_value = "2ms", value_parser = humantime::parse_duration)]
    latency: Duration,
    /// Extra `vehicle(id:)` lookups, passed as raw ids.
    #[arg(long = "lookup")]
    lookups: Vec<String>,
    #[arg(long, env = "VEHICLE_GRAPH_LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init(args.log_format)?;

    let page = domain::movements(args.movements, args.vehicles);

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling request");
                shutdown.cancel();
            }
        }
    });

    let repo = Arc::new(VehicleRepo::seeded(args.vehicles).with_latency(args.latency));
    let scope = RequestScope::with_parent(&shutdown);
    let span = tracing::info_span!("request", scope = %scope.id());
    let loaders = match (args.window, args.capacity) {
        (None, None) => Loaders::with_defaults(&scope, Arc::clone(&repo))?,
        (window, capacity) => {
            let config = LoaderConfig::new(
                window.unwrap_or(loaders::VEHICLE_WINDOW),
                capacity.unwrap_or(loaders::VEHICLE_CAPACITY),
            )?;
            Loaders::new(&scope, Arc::clone(&repo), config)?
        }
    };

    let resolved = serve(&loaders, page.clone(), &args.lookups).instrument(span).await?;
    let mut orphans = 0;
    for orphan in resolved.iter().filter(|r| r.vehicle.is_none()) {
        orphans += 1;
        tracing::debug!(
            movement = orphan.movement.id,
            kind = ?orphan.movement.kind,
            description = %orphan.movement.description,
            "movement without vehicle"
        );
    }
    let batched_queries = repo.queries();
    scope.finish();

    let naive = VehicleRepo::seeded(args.vehicles).with_latency(args.latency);
    resolver::movements_with_vehicles_unbatched(&naive, page).await;

    tracing::info!(
        movements = resolved.len(),
        orphans,
        batched_queries,
        unbatched_queries = naive.queries(),
        "resolved movements"
    );
    Ok(())
}

async fn serve(loaders: &Loaders, page: Vec<Movement>, lookups: &[String]) -> anyhow::Result<Vec<ResolvedMovement>> {
    let resolved = resolver::movements_with_vehicles(loaders, page).await?;

    for raw in lookups {
        match resolver::vehicle(loaders, raw).await {
            Ok(Some(vehicle)) => tracing::info!(
                id = vehicle.id,
                vin = %vehicle.vin,
                name = %vehicle.name,
                model = %vehicle.model_code,
                traction = ?vehicle.traction,
                year = vehicle.release_year,
                batch = %vehicle.batch_number,
                color = vehicle.color.as_deref().unwrap_or("unpainted"),
                mileage = vehicle.mileage,
                status = ?vehicle.status,
                "vehicle"
            ),
            Ok(None) => tracing::info!(id = %raw, "vehicle not found"),
            Err(err) => tracing::warn!(%err, "rejected lookup"),
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["vehicle-graph"]).unwrap();
        assert_eq!(args.window, None);
        assert_eq!(args.capacity, None);
        assert_eq!(args.log_format, LogFormat::Compact);
        assert!(args.lookups.is_empty());
    }

    #[test]
    fn test_args_parse_durations_and_lookups() {
        let args = Args::try_parse_from([
            "vehicle-graph",
            "--window", "5ms",
            "--capacity", "10",
            "--lookup", "3",
            "--lookup", "x",
            "--log-format", "json",
        ])
        .unwrap();
        assert_eq!(args.window, Some(Duration::from_millis(5)));
        assert_eq!(args.capacity, Some(10));
        assert_eq!(args.lookups, vec!["3".to_string(), "x".to_string()]);
        assert_eq!(args.log_format, LogFormat::Json);
    }
}
