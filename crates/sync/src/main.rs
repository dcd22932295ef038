//! Fishlog Sync Service - Main Entry Point
//!
//! Serves the data API and the viewer WebSocket, and bridges change
//! notifications through the AMQP broker. Starts without the broker if it is
//! unreachable and keeps retrying in the background.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use actix_web::web;
use fishlog_core::models::{FishingTrip, Project};
use fishlog_core::{
    init_logging, load_dotenv, BrokerConfig, ConfigLoader, DatabaseConfig, LogConfig,
    ServiceConfig, ShutdownCoordinator,
};
use fishlog_sync::repository::{
    connect_pool, run_migrations, PgFishingTripRepository, PgProjectRepository,
    PgTripEventRepository,
};
use fishlog_sync::{
    forward_resyncs, start_server, AppState, BrokerBridge, BrokerPublisher, ConnectionHub,
    InMemoryRepository, InMemoryTripRepository, ProjectService, Repository, SessionSettings,
    TripEventRepository, TripEventService, TripService,
};

const DEFAULT_LOG_FILTER: &str = "fishlog_sync=debug,fishlog_core=info,actix_web=info";

const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const PUBLISHER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct Repositories {
    trips: Arc<dyn Repository<FishingTrip>>,
    events: Arc<dyn TripEventRepository>,
    projects: Arc<dyn Repository<Project>>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_logging(&LogConfig::new("fishlog-sync", DEFAULT_LOG_FILTER).with_env_format())?;

    let service_config = ServiceConfig::from_env()?;
    service_config.validate()?;
    let broker_config = BrokerConfig::from_env()?;
    broker_config.validate()?;
    let database_config = DatabaseConfig::from_env()?;
    database_config.validate()?;

    let repositories = build_repositories(&database_config).await?;

    // Broker -> hub
    let hub = Arc::new(ConnectionHub::new());
    let bridge = BrokerBridge::new(broker_config.clone());
    for pattern in &broker_config.patterns {
        bridge
            .subscribe(pattern, Arc::clone(&hub))
            .await
            .with_context(|| format!("Failed to subscribe to {}", pattern))?;
    }

    if let Err(e) = bridge.connect().await {
        warn!(error = %e, "Broker unavailable at startup, serving without live updates");
    }
    let supervisor = bridge.start()?;

    let coordinator = ShutdownCoordinator::new();
    let forwarder = tokio::spawn(forward_resyncs(
        bridge.reconnected(),
        Arc::clone(&hub),
        coordinator.handle(),
    ));

    // Write path -> broker
    let (publisher, publisher_worker) =
        BrokerPublisher::spawn(Arc::clone(&bridge), broker_config.publish_buffer);

    let state = web::Data::new(AppState {
        trips: TripService::new(repositories.trips, publisher.clone()),
        events: TripEventService::new(repositories.events, publisher.clone()),
        projects: ProjectService::new(repositories.projects, publisher.clone()),
        hub: Arc::clone(&hub),
        bridge: Arc::clone(&bridge),
        session: SessionSettings {
            heartbeat_interval: service_config.heartbeat_interval,
            client_timeout: service_config.client_timeout,
            mailbox_capacity: service_config.ws_outbound_buffer,
        },
    });
    drop(publisher);

    let server = start_server(state.clone(), &service_config)?;
    let server_handle = server.handle();
    let mut server_task = actix_rt::spawn(server);

    info!(
        host = %service_config.host,
        port = service_config.port,
        "Fishlog sync service ready"
    );

    let server_exited = tokio::select! {
        signal = coordinator.wait_for_signal() => {
            signal?;
            false
        }
        exited = &mut server_task => {
            match exited {
                Ok(Ok(())) => warn!("HTTP server stopped"),
                Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
                Err(e) => error!(error = %e, "HTTP server task failed"),
            }
            coordinator.trigger();
            true
        }
    };

    if !server_exited {
        coordinator
            .run_step("http server", SERVER_STOP_TIMEOUT, async {
                server_handle.stop(true).await;
                let _ = server_task.await;
            })
            .await;
    }

    // The publisher worker ends once the last service handle is gone
    drop(state);
    coordinator
        .run_step("publisher drain", PUBLISHER_DRAIN_TIMEOUT, async {
            let _ = publisher_worker.await;
        })
        .await;

    coordinator
        .run_step(
            "broker bridge",
            broker_config.close_timeout + Duration::from_secs(1),
            bridge.close(),
        )
        .await;

    let _ = supervisor.await;
    let _ = forwarder.await;

    info!(
        frames_sent = hub.frames_sent(),
        evictions = hub.evictions(),
        "Fishlog sync service stopped"
    );

    Ok(())
}

async fn build_repositories(config: &DatabaseConfig) -> anyhow::Result<Repositories> {
    if config.url.is_none() {
        warn!("No database URL configured, using in-memory repositories");

        let trip_repository = InMemoryTripRepository::new();
        let events: Arc<dyn TripEventRepository> = Arc::new(trip_repository.events());
        let trips: Arc<dyn Repository<FishingTrip>> = Arc::new(trip_repository);
        let projects: Arc<dyn Repository<Project>> =
            Arc::new(InMemoryRepository::<Project>::new());

        return Ok(Repositories {
            trips,
            events,
            projects,
        });
    }

    let pool = connect_pool(config).await?;
    run_migrations(&pool).await?;
    info!("Database migrations applied");

    Ok(Repositories {
        trips: Arc::new(PgFishingTripRepository::new(pool.clone())),
        events: Arc::new(PgTripEventRepository::new(pool.clone())),
        projects: Arc::new(PgProjectRepository::new(pool)),
    })
}
