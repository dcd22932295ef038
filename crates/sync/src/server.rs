/// Actix-web HTTP server for the fishlog sync service
///
/// Port: 4001
/// Endpoints:
/// - GET /health - Broker state and viewer count
/// - WebSocket /ws - Live change notifications
/// - GET/POST /api/v1/trips, GET/PATCH/DELETE /api/v1/trips/{id}
/// - GET /api/v1/trips/{id}/events, GET /api/v1/trips/{id}/event-counts
/// - POST /api/v1/events, GET/PATCH/DELETE /api/v1/events/{id}
/// - GET/POST /api/v1/projects, GET/PATCH/DELETE /api/v1/projects/{id}
use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::http::StatusCode;
use actix_web::{
    delete, get, patch, post, web, App, HttpRequest, HttpResponse, HttpServer, ResponseError,
};
use actix_web_actors::ws;
use std::sync::Arc;

use crate::broker::BrokerBridge;
use crate::service::{ProjectService, TripEventService, TripService};
use crate::ws::{ConnectionHub, SessionSettings, ViewerSocket};
use fishlog_core::models::{
    NewFishingTrip, NewProject, NewTripEvent, UpdateFishingTrip, UpdateProject, UpdateTripEvent,
};
use fishlog_core::{FishlogError, ServiceConfig};

/// Server state shared across handlers
pub struct AppState {
    pub trips: TripService,
    pub events: TripEventService,
    pub projects: ProjectService,

    /// Live viewer connections
    pub hub: Arc<ConnectionHub>,

    /// Reported by the health endpoint
    pub bridge: Arc<BrokerBridge>,

    pub session: SessionSettings,
}

/// `FishlogError` rendered as `{"error": message}`
#[derive(Debug)]
pub struct ApiError(pub FishlogError);

impl From<FishlogError> for ApiError {
    fn from(error: FishlogError) -> Self {
        Self(error)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        if self.status_code().is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.0.to_string()
        }))
    }
}

type ApiResult = Result<HttpResponse, ApiError>;

fn deleted() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "success": true }))
}

/// Health check endpoint
#[get("/health")]
async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "fishlog-sync",
        "version": env!("CARGO_PKG_VERSION"),
        "broker": state.bridge.state().as_str(),
        "viewers": state.hub.connection_count(),
    }))
}

/// WebSocket connection endpoint
#[get("/ws")]
async fn websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let session = ViewerSocket::new(Arc::clone(&state.hub), state.session);
    ws::start(session, &req, stream)
}

// Fishing trips

#[get("/trips")]
async fn list_trips(state: web::Data<AppState>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.trips.list().await?))
}

#[get("/trips/{id}")]
async fn get_trip(state: web::Data<AppState>, id: web::Path<String>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.trips.get(&id).await?))
}

#[post("/trips")]
async fn create_trip(state: web::Data<AppState>, body: web::Json<NewFishingTrip>) -> ApiResult {
    let trip = state.trips.create(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(trip))
}

#[patch("/trips/{id}")]
async fn update_trip(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<UpdateFishingTrip>,
) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.trips.update(&id, body.into_inner()).await?))
}

#[delete("/trips/{id}")]
async fn delete_trip(state: web::Data<AppState>, id: web::Path<String>) -> ApiResult {
    state.trips.delete(&id).await?;
    Ok(deleted())
}

#[get("/trips/{id}/events")]
async fn list_trip_events(state: web::Data<AppState>, id: web::Path<String>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.events.list_by_trip(&id).await?))
}

#[get("/trips/{id}/event-counts")]
async fn count_trip_events(state: web::Data<AppState>, id: web::Path<String>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.events.count_by_trip(&id).await?))
}

// Trip events

#[get("/events/{id}")]
async fn get_event(state: web::Data<AppState>, id: web::Path<String>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.events.get(&id).await?))
}

#[post("/events")]
async fn create_event(state: web::Data<AppState>, body: web::Json<NewTripEvent>) -> ApiResult {
    let event = state.events.create(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(event))
}

#[patch("/events/{id}")]
async fn update_event(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<UpdateTripEvent>,
) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.events.update(&id, body.into_inner()).await?))
}

#[delete("/events/{id}")]
async fn delete_event(state: web::Data<AppState>, id: web::Path<String>) -> ApiResult {
    state.events.delete(&id).await?;
    Ok(deleted())
}

// Projects

#[get("/projects")]
async fn list_projects(state: web::Data<AppState>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.projects.list().await?))
}

#[get("/projects/{id}")]
async fn get_project(state: web::Data<AppState>, id: web::Path<String>) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.projects.get(&id).await?))
}

#[post("/projects")]
async fn create_project(state: web::Data<AppState>, body: web::Json<NewProject>) -> ApiResult {
    let project = state.projects.create(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(project))
}

#[patch("/projects/{id}")]
async fn update_project(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<UpdateProject>,
) -> ApiResult {
    Ok(HttpResponse::Ok().json(state.projects.update(&id, body.into_inner()).await?))
}

#[delete("/projects/{id}")]
async fn delete_project(state: web::Data<AppState>, id: web::Path<String>) -> ApiResult {
    state.projects.delete(&id).await?;
    Ok(deleted())
}

/// Malformed JSON bodies get the same `{"error"}` shape as validation failures
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let message = err.to_string();
        actix_web::error::InternalError::from_response(
            err,
            HttpResponse::BadRequest().json(serde_json::json!({ "error": message })),
        )
        .into()
    })
}

/// Register every route on an app
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check).service(websocket).service(
        web::scope("/api/v1")
            .app_data(json_config())
            .service(list_trips)
            .service(create_trip)
            .service(list_trip_events)
            .service(count_trip_events)
            .service(get_trip)
            .service(update_trip)
            .service(delete_trip)
            .service(create_event)
            .service(get_event)
            .service(update_event)
            .service(delete_event)
            .service(list_projects)
            .service(create_project)
            .service(get_project)
            .service(update_project)
            .service(delete_project),
    );
}

/// Bind and start the server; the returned [`Server`] resolves when it stops
pub fn start_server(state: web::Data<AppState>, config: &ServiceConfig) -> std::io::Result<Server> {
    tracing::info!(
        host = %config.host,
        port = config.port,
        workers = config.workers,
        "Starting fishlog sync service"
    );

    let cors_origin = config.cors_origin.clone();

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&cors_origin)
            .allowed_methods(vec!["GET", "POST", "PATCH", "DELETE"])
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(configure)
    })
    .workers(config.workers)
    // The binary owns signal handling and stops the server through its handle
    .disable_signals()
    .shutdown_timeout(5)
    .bind((config.host.as_str(), config.port))?
    .run();

    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::EventPublisher;
    use crate::envelope::Envelope;
    use crate::repository::{
        InMemoryRepository, InMemoryTripRepository, Repository, TripEventRepository,
    };
    use actix_web::test;
    use fishlog_core::models::{FishingTrip, Project};
    use fishlog_core::BrokerConfig;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<Envelope>>,
    }

    impl EventPublisher for RecordingPublisher {
        fn publish(&self, envelope: Envelope) {
            self.published.lock().push(envelope);
        }
    }

    fn test_state() -> (web::Data<AppState>, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        let trips = InMemoryTripRepository::new();
        let events: Arc<dyn TripEventRepository> = Arc::new(trips.events());
        let trips: Arc<dyn Repository<FishingTrip>> = Arc::new(trips);

        let state = web::Data::new(AppState {
            trips: TripService::new(trips, publisher.clone()),
            events: TripEventService::new(events, publisher.clone()),
            projects: ProjectService::new(
                Arc::new(InMemoryRepository::<Project>::new()),
                publisher.clone(),
            ),
            hub: Arc::new(ConnectionHub::new()),
            bridge: BrokerBridge::new(BrokerConfig::default()),
            session: SessionSettings::default(),
        });

        (state, publisher)
    }

    fn clear_creek() -> Value {
        json!({
            "date": "2024-05-18",
            "locationName": "Clear Creek",
            "latitude": 39.74,
            "longitude": -105.51
        })
    }

    #[actix_web::test]
    async fn test_health_check() {
        let (state, _) = test_state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["broker"], "disconnected");
        assert_eq!(body["viewers"], 0);
    }

    #[actix_web::test]
    async fn test_trip_lifecycle() {
        let (state, publisher) = test_state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/trips")
            .set_json(clear_creek())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let trip: Value = test::read_body_json(resp).await;
        let id = trip["id"].as_str().unwrap().to_string();
        assert_eq!(trip["locationName"], "Clear Creek");

        let req = test::TestRequest::patch()
            .uri(&format!("/api/v1/trips/{}", id))
            .set_json(json!({ "notes": "high water" }))
            .to_request();
        let updated: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(updated["notes"], "high water");

        let req = test::TestRequest::get().uri("/api/v1/trips").to_request();
        let trips: Vec<Value> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(trips.len(), 1);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/v1/trips/{}", id))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({ "success": true }));

        let topics: Vec<String> = publisher
            .published
            .lock()
            .iter()
            .map(|e| e.topic().to_string())
            .collect();
        assert_eq!(
            topics,
            vec!["fishingTrip.created", "fishingTrip.updated", "fishingTrip.deleted"]
        );
    }

    #[actix_web::test]
    async fn test_not_found_and_validation_errors() {
        let (state, publisher) = test_state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/v1/trips/t1").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Fishing trip not found: t1");

        let req = test::TestRequest::delete().uri("/api/v1/projects/p1").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let mut invalid = clear_creek();
        invalid["latitude"] = json!(95.0);
        let req = test::TestRequest::post()
            .uri("/api/v1/trips")
            .set_json(invalid)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/v1/trips")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert!(body["error"].is_string());

        assert!(publisher.published.lock().is_empty());
    }

    #[actix_web::test]
    async fn test_trip_events_and_counts() {
        let (state, _) = test_state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/trips")
            .set_json(clear_creek())
            .to_request();
        let trip: Value = test::call_and_read_body_json(&app, req).await;
        let trip_id = trip["id"].as_str().unwrap().to_string();

        for (event_type, minute) in [("catch", 10), ("hooked", 5), ("catch", 20)] {
            let req = test::TestRequest::post()
                .uri("/api/v1/events")
                .set_json(json!({
                    "tripId": trip_id,
                    "eventType": event_type,
                    "latitude": 39.74,
                    "longitude": -105.51,
                    "timestamp": format!("2024-05-18T06:{:02}:00Z", minute)
                }))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::CREATED);
        }

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/trips/{}/events", trip_id))
            .to_request();
        let events: Vec<Value> = test::call_and_read_body_json(&app, req).await;
        let types: Vec<&str> = events
            .iter()
            .map(|e| e["eventType"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["hooked", "catch", "catch"]);

        let counts_uri = format!("/api/v1/trips/{}/event-counts", trip_id);
        let req = test::TestRequest::get().uri(&counts_uri).to_request();
        let counts: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(counts, json!({ "catches": 2, "hooked": 1, "misses": 0 }));

        // events always belong to a stored trip
        let req = test::TestRequest::post()
            .uri("/api/v1/events")
            .set_json(json!({
                "tripId": "no-such-trip",
                "eventType": "catch",
                "latitude": 39.74,
                "longitude": -105.51,
                "timestamp": "2024-05-18T07:00:00Z"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Validation error: trip does not exist");

        // deleting the trip takes its events with it
        let req = test::TestRequest::delete()
            .uri(&format!("/api/v1/trips/{}", trip_id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/trips/{}/events", trip_id))
            .to_request();
        let events: Vec<Value> = test::call_and_read_body_json(&app, req).await;
        assert!(events.is_empty());

        let req = test::TestRequest::get().uri(&counts_uri).to_request();
        let counts: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(counts, json!({ "catches": 0, "hooked": 0, "misses": 0 }));
    }

    #[actix_web::test]
    async fn test_project_defaults() {
        let (state, _) = test_state();
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/projects")
            .set_json(json!({ "name": "Delta survey", "latitude": 38.0, "longitude": -121.5 }))
            .to_request();
        let project: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(project["status"], "active");
    }
}
