use crate::api::{self, AppState, PROFILES_PATH};
use crate::settings::CorsSettings;
use anyhow::Context;
use axum::http::{HeaderValue, Method};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub fn router(state: AppState, cors: &CorsSettings) -> anyhow::Result<Router> {
    let app = Router::new()
        .route(
            PROFILES_PATH,
            get(api::search_profiles)
                .post(api::create_profile)
                .put(api::update_profile),
        )
        .route(
            &format!("{}/:id", PROFILES_PATH),
            get(api::get_profile).delete(api::delete_profile),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors.allowed_origins.is_empty() {
        return Ok(app);
    }

    let origins = cors
        .allowed_origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .with_context(|| format!("invalid CORS origin {}", origin))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(AllowOrigin::list(origins));

    Ok(app.layer(cors))
}

pub async fn start_webserver(addr: SocketAddr, app: Router) -> anyhow::Result<()> {
    let server = axum::Server::try_bind(&addr)
        .with_context(|| format!("binding HTTP listener on {}", addr))?;
    info!("HTTP server listening on {}", addr);

    server
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Couldn't listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Problem;
    use crate::profile::Profile;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use quickstart_lib::{BootstrapService, DocumentStore, SledStore, StoreConfig};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    const TEST_COST: u32 = 4;

    fn app_with(store: SledStore, config: &StoreConfig) -> Router {
        let state = AppState::new(Arc::new(store), config, TEST_COST);
        router(state, &CorsSettings::default()).unwrap()
    }

    async fn bootstrapped_app() -> Router {
        let store = SledStore::temporary().unwrap();
        let config = StoreConfig {
            create_bucket: true,
            ..Default::default()
        };
        assert!(BootstrapService::new(&store, &config).run().await.is_ready());
        app_with(store, &config)
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };

        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn john() -> Value {
        json!({
            "firstName": "John",
            "lastName": "Doe",
            "email": "john.doe@x.com",
            "password": "pw"
        })
    }

    async fn create(app: &Router, body: Value) -> Profile {
        let (status, value) = send(app, Method::POST, PROFILES_PATH, Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn test_create_get_delete_scenario() {
        let app = bootstrapped_app().await;

        let created = create(&app, john()).await;
        assert!(!created.pid.is_nil());
        assert_eq!(created.first_name, "John");
        assert_eq!(created.last_name, "Doe");
        assert_eq!(created.email, "john.doe@x.com");
        assert_ne!(created.password, "pw");

        let uri = format!("{}/{}", PROFILES_PATH, created.pid);
        let (status, value) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_value::<Profile>(value).unwrap(), created);

        let (status, value) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value, json!(created.pid.to_string()));

        let (status, _) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_sets_location_and_fresh_ids() {
        let app = bootstrapped_app().await;

        let request = Request::builder()
            .method(Method::POST)
            .uri(PROFILES_PATH)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(john().to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
        assert!(location.starts_with("/api/v1/profiles/"));

        let first = create(&app, john()).await;
        let second = create(&app, john()).await;
        assert_ne!(first.pid, second.pid);
    }

    #[tokio::test]
    async fn test_update_overwrites_whole_profile() {
        let app = bootstrapped_app().await;
        let created = create(&app, john()).await;

        let update = json!({
            "pid": created.pid,
            "firstName": "Jane",
            "lastName": "Smith",
            "email": "jane.smith@x.com",
            "password": "pw"
        });
        let (status, value) = send(&app, Method::PUT, PROFILES_PATH, Some(update)).await;
        assert_eq!(status, StatusCode::OK);
        let updated: Profile = serde_json::from_value(value).unwrap();
        assert_eq!(updated.pid, created.pid);
        assert_eq!(updated.first_name, "Jane");
        // The password is hashed again even though it did not change.
        assert_ne!(updated.password, created.password);

        let uri = format!("{}/{}", PROFILES_PATH, created.pid);
        let (_, value) = send(&app, Method::GET, &uri, None).await;
        let stored: Profile = serde_json::from_value(value).unwrap();
        assert_eq!(stored.first_name, "Jane");
        assert_eq!(stored.last_name, "Smith");
        assert_eq!(stored.email, "jane.smith@x.com");
    }

    #[tokio::test]
    async fn test_update_without_fields_clears_them() {
        let app = bootstrapped_app().await;
        let created = create(&app, john()).await;

        let update = json!({ "pid": created.pid, "firstName": "Jane" });
        let (status, value) = send(&app, Method::PUT, PROFILES_PATH, Some(update)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["lastName"], "");
        assert_eq!(value["email"], "");
    }

    #[tokio::test]
    async fn test_update_and_delete_of_unknown_profile() {
        let app = bootstrapped_app().await;
        let pid = Uuid::new_v4();

        let update = json!({ "pid": pid, "firstName": "Jane" });
        let (status, value) = send(&app, Method::PUT, PROFILES_PATH, Some(update)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let problem: Problem = serde_json::from_value(value).unwrap();
        assert_eq!(problem.status, 404);

        let uri = format!("{}/{}", PROFILES_PATH, pid);
        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_search() {
        let app = bootstrapped_app().await;
        create(&app, john()).await;
        create(
            &app,
            json!({"firstName": "Jane", "lastName": "Smith", "email": "j@x", "password": "p"}),
        )
        .await;
        create(
            &app,
            json!({"firstName": "Doeg", "lastName": "Edomite", "email": "d@x", "password": "p"}),
        )
        .await;

        let (status, _) = send(&app, Method::GET, PROFILES_PATH, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, Method::GET, "/api/v1/profiles?search=nobody", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, value) = send(&app, Method::GET, "/api/v1/profiles?search=DOE", None).await;
        assert_eq!(status, StatusCode::OK);
        let found: Vec<Profile> = serde_json::from_value(value).unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.first_name != "Jane"));

        let (status, value) =
            send(&app, Method::GET, "/api/v1/profiles?search=mit&limit=5&skip=0", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value.as_array().unwrap().len(), 2);

        let (status, value) =
            send(&app, Method::GET, "/api/v1/profiles?search=doe&limit=1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value.as_array().unwrap().len(), 1);

        let (status, _) =
            send(&app, Method::GET, "/api/v1/profiles?search=doe&skip=2", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) =
            send(&app, Method::GET, "/api/v1/profiles?search=doe&limit=-1", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_identifier_is_rejected() {
        let app = bootstrapped_app().await;
        let (status, _) = send(&app, Method::GET, "/api/v1/profiles/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_store_failures_are_not_reported_as_missing() {
        // Nothing was bootstrapped: no bucket, collection, or index.
        let app = app_with(SledStore::temporary().unwrap(), &StoreConfig::default());

        let uri = format!("{}/{}", PROFILES_PATH, Uuid::new_v4());
        let (status, value) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let problem: Problem = serde_json::from_value(value).unwrap();
        assert!(problem.detail.contains("collection"));

        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_search_without_index_fails() {
        let store = SledStore::temporary().unwrap();
        let config = StoreConfig::default();
        store.create_bucket(&config.bucket_name).await.unwrap();
        store.create_collection(&config.keyspace()).await.unwrap();
        let app = app_with(store, &config);

        create(&app, john()).await;
        let (status, value) =
            send(&app, Method::GET, "/api/v1/profiles?search=john", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(value["status"], 500);
    }

    #[tokio::test]
    async fn test_cors_origins() {
        let cors = CorsSettings {
            allowed_origins: vec!["http://localhost:5000".to_string()],
        };
        let state = AppState::new(
            Arc::new(SledStore::temporary().unwrap()),
            &StoreConfig::default(),
            TEST_COST,
        );
        let app = router(state, &cors).unwrap();

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri(PROFILES_PATH)
            .header(header::ORIGIN, "http://localhost:5000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PUT")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:5000"
        );

        let bad = CorsSettings {
            allowed_origins: vec!["bad\norigin".to_string()],
        };
        let state = AppState::new(
            Arc::new(SledStore::temporary().unwrap()),
            &StoreConfig::default(),
            TEST_COST,
        );
        assert!(router(state, &bad).is_err());
    }
}
