use crate::{
    controller::{health_check_controller, shipment_controller, stream_controller},
    extractors::tenant_context::{BUSINESS_UNIT_ID_HEADER, ORGANIZATION_ID_HEADER, USER_ID_HEADER},
    sse::handler,
    AppState,
};
use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Json, Router,
};
use log::*;
use service::config::Config;
use tower_http::cors::{AllowOrigin, CorsLayer};
use utoipa::OpenApi;

// This is the global definition of our OpenAPI spec. To be a part
// of the rendered spec, a path and schema must be listed here.
#[derive(OpenApi)]
#[openapi(
        info(
            title = "TMS Platform API"
        ),
        paths(
            health_check_controller::health_check,
            handler::shipments_live,
            shipment_controller::create,
            shipment_controller::read,
            stream_controller::metrics,
            stream_controller::active,
        ),
        components(
            schemas(
                domain::Shipment,
                domain::NewShipment,
                domain::ShipmentStatus,
                stream_controller::ActiveConnections,
            )
        ),
        tags(
            (name = "tms_platform", description = "TMS live data streaming API")
        )
    )]
struct ApiDoc;

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(shipment_routes(app_state.clone()))
        .merge(stream_routes(app_state))
        .route("/api-docs/openapi.json", get(openapi))
}

/// CORS for the configured browser origins. Tenant identity headers must be
/// allowed explicitly since browsers preflight them.
pub fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring invalid CORS origin {origin}: {e}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            header::CONTENT_TYPE,
            header::CACHE_CONTROL,
            HeaderName::from_static(USER_ID_HEADER),
            HeaderName::from_static(ORGANIZATION_ID_HEADER),
            HeaderName::from_static(BUSINESS_UNIT_ID_HEADER),
        ])
        .allow_credentials(true)
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

fn health_routes() -> Router {
    Router::new().route("/health", get(health_check_controller::health_check))
}

fn shipment_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/shipments", post(shipment_controller::create))
        .route("/shipments/live", get(handler::shipments_live))
        .route("/shipments/:id", get(shipment_controller::read))
        .with_state(app_state)
}

fn stream_routes(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/streams/:stream_key/metrics",
            get(stream_controller::metrics),
        )
        .route(
            "/streams/:stream_key/active",
            get(stream_controller::active),
        )
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use clap::Parser;
    use futures::StreamExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app_state() -> AppState {
        AppState::new(Config::parse_from(["tms_platform"]))
    }

    fn request(method: Method, uri: &str, user: &str, org: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(USER_ID_HEADER, user)
            .header(ORGANIZATION_ID_HEADER, org)
            .header(BUSINESS_UNIT_ID_HEADER, "bu_1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap()
    }

    fn live(user: &str, org: &str) -> Request<Body> {
        request(Method::GET, "/shipments/live", user, org, Body::empty())
    }

    fn create(org: &str, pro_number: &str) -> Request<Body> {
        let body = json!({
            "pro_number": pro_number,
            "origin": "Chicago, IL",
            "destination": "Dallas, TX",
        });
        request(
            Method::POST,
            "/shipments",
            "usr_1",
            org,
            Body::from(body.to_string()),
        )
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Reads the next SSE frame of a streaming response body.
    async fn next_frame(body: &mut axum::body::BodyDataStream) -> String {
        let chunk = body.next().await.unwrap().unwrap();
        String::from_utf8(chunk.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_check_responds_ok() {
        let app = define_routes(app_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn live_stream_without_tenant_headers_is_unauthorized() {
        let state = app_state();
        let app = define_routes(state.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/shipments/live")
                    .header(USER_ID_HEADER, "usr_1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.streaming.user_connection_count("usr_1"), 0);
    }

    #[tokio::test]
    async fn live_stream_opens_with_a_connected_event() {
        let app = define_routes(app_state());
        let response = app.oneshot(live("usr_1", "org_1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        let mut body = response.into_body().into_data_stream();
        let frame = next_frame(&mut body).await;
        assert!(frame.starts_with("event: connected\ndata: {\"status\":\"connected\""));
        assert!(frame.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn sixth_stream_for_a_user_is_rejected() {
        let state = app_state();
        let app = define_routes(state.clone());

        let mut open = Vec::new();
        for _ in 0..5 {
            let response = app.clone().oneshot(live("usr_1", "org_1")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            open.push(response);
        }

        let response = app.oneshot(live("usr_1", "org_1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(state.streaming.user_connection_count("usr_1"), 5);
    }

    #[tokio::test]
    async fn created_shipment_is_pushed_to_the_live_stream() {
        let state = app_state();
        let app = define_routes(state.clone());

        let stream = app.clone().oneshot(live("usr_1", "org_1")).await.unwrap();
        let mut body = stream.into_body().into_data_stream();
        assert!(next_frame(&mut body)
            .await
            .starts_with("event: connected\n"));

        let response = app.clone().oneshot(create("org_1", "PRO-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;
        assert_eq!(created["data"]["pro_number"], "PRO-1");

        let frame = next_frame(&mut body).await;
        assert!(frame.starts_with("event: new-entry\ndata: "));
        let data: Value = serde_json::from_str(
            frame
                .trim_end()
                .strip_prefix("event: new-entry\ndata: ")
                .unwrap(),
        )
        .unwrap();
        assert_eq!(data["id"], created["data"]["id"]);
        assert_eq!(data["organization_id"], "org_1");
    }

    #[tokio::test]
    async fn shipments_are_only_visible_to_their_tenant() {
        let app = define_routes(app_state());
        let created = json_body(app.clone().oneshot(create("org_1", "PRO-1")).await.unwrap()).await;
        let uri = format!("/shipments/{}", created["data"]["id"].as_str().unwrap());

        let own = app
            .clone()
            .oneshot(request(Method::GET, &uri, "usr_1", "org_1", Body::empty()))
            .await
            .unwrap();
        let other = app
            .oneshot(request(Method::GET, &uri, "usr_2", "org_2", Body::empty()))
            .await
            .unwrap();

        assert_eq!(own.status(), StatusCode::OK);
        assert_eq!(other.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn shipment_without_pro_number_is_unprocessable() {
        let app = define_routes(app_state());
        let response = app.oneshot(create("org_1", "")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn stream_metrics_are_scoped_to_the_caller_tenant() {
        let app = define_routes(app_state());
        let _stream = app.clone().oneshot(live("usr_1", "org_1")).await.unwrap();

        let metrics = app
            .clone()
            .oneshot(request(
                Method::GET,
                "/streams/shipments-live/metrics",
                "usr_1",
                "org_1",
                Body::empty(),
            ))
            .await
            .unwrap();
        assert_eq!(metrics.status(), StatusCode::OK);
        let metrics = json_body(metrics).await;
        assert_eq!(metrics["data"]["activeConnections"], 1);
        assert_eq!(metrics["data"]["totalConnections"], 1);
        assert_eq!(metrics["data"]["dataFetchErrors"], 0);

        let other_tenant = app
            .clone()
            .oneshot(request(
                Method::GET,
                "/streams/shipments-live/metrics",
                "usr_2",
                "org_2",
                Body::empty(),
            ))
            .await
            .unwrap();
        assert_eq!(other_tenant.status(), StatusCode::NOT_FOUND);

        let active = |user: &'static str, org: &'static str| {
            request(
                Method::GET,
                "/streams/shipments-live/active",
                user,
                org,
                Body::empty(),
            )
        };
        let own = json_body(app.clone().oneshot(active("usr_1", "org_1")).await.unwrap()).await;
        assert_eq!(own["data"]["active_clients"], 1);

        // Another tenant sees neither the first tenant's clients nor their total.
        let other = json_body(app.oneshot(active("usr_2", "org_2")).await.unwrap()).await;
        assert_eq!(other["data"]["active_clients"], 0);
        assert!(other["data"].get("active_streams").is_none());
    }

    #[tokio::test]
    async fn openapi_document_lists_the_live_stream() {
        let app = define_routes(app_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api-docs/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let document = json_body(response).await;
        assert!(document["paths"]["/shipments/live"].is_object());
    }

    #[test]
    fn cors_allows_configured_origins() {
        let config = Config::parse_from([
            "tms_platform",
            "--allowed-origins",
            "https://app.example.com,not a header\nvalue",
        ]);
        // Invalid origins are skipped rather than failing startup
        let _layer = cors_layer(&config);
    }
}
