//! Debug HTTP server exposing the snapshot cache and the last sync input.

use std::collections::BTreeMap;
use std::sync::Arc;

use actix_web::{
    App, HttpResponse, HttpServer, Responder, get, middleware::Logger, web,
};
use serde_json::json;
use skiff_mesh::{InMemoryStatusReporter, TranslatorSyncer, XdsSnapshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::ShutdownSignal;

/// State shared by the debug handlers
#[derive(Clone)]
pub struct DebugState {
    pub syncer: Arc<TranslatorSyncer>,
    pub reporter: Arc<InMemoryStatusReporter>,
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "UP" }))
}

#[get("/snapshots/xds")]
async fn xds_snapshots(state: web::Data<DebugState>) -> impl Responder {
    let snapshots = state.syncer.cache().snapshots();
    let body: BTreeMap<&str, &XdsSnapshot> = snapshots
        .iter()
        .map(|(node, snapshot)| (node.as_str(), snapshot.as_ref()))
        .collect();
    HttpResponse::Ok().json(body)
}

#[get("/snapshots/xds/{node}")]
async fn xds_snapshot(state: web::Data<DebugState>, path: web::Path<String>) -> impl Responder {
    let node = path.into_inner();
    match state.syncer.cache().get_snapshot(&node) {
        Ok(snapshot) => HttpResponse::Ok().json(snapshot.as_ref()),
        Err(e) => HttpResponse::NotFound().json(json!({ "error": e.to_string() })),
    }
}

#[get("/snapshots/api")]
async fn api_snapshot(state: web::Data<DebugState>) -> impl Responder {
    match state.syncer.latest_snapshot() {
        Some(snapshot) => HttpResponse::Ok().json(snapshot.as_ref()),
        None => HttpResponse::NotFound().json(json!({ "error": "no sync has run yet" })),
    }
}

#[get("/statuses")]
async fn statuses(state: web::Data<DebugState>) -> impl Responder {
    let body: BTreeMap<String, _> = state
        .reporter
        .statuses()
        .into_iter()
        .map(|(key, status)| (key.to_string(), status))
        .collect();
    HttpResponse::Ok().json(body)
}

#[get("/stats")]
async fn stats(state: web::Data<DebugState>) -> impl Responder {
    HttpResponse::Ok().json(state.syncer.cache().stats())
}

/// Register the debug routes
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(xds_snapshots)
        .service(xds_snapshot)
        .service(api_snapshot)
        .service(statuses)
        .service(stats);
}

/// Creates and binds the debug HTTP server.
pub fn debug_server(
    state: DebugState,
    address: String,
    port: u16,
) -> Result<actix_web::dev::Server, std::io::Error> {
    Ok(HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes)
    })
    .workers(1)
    .disable_signals()
    .bind((address, port))?
    .run())
}

/// Run the debug server on the actix runtime until `shutdown` fires
pub fn spawn_debug_server(
    state: DebugState,
    address: String,
    port: u16,
    shutdown: ShutdownSignal,
) -> Result<JoinHandle<()>, std::io::Error> {
    let server = debug_server(state, address.clone(), port)?;
    let handle = server.handle();
    info!(%address, port, "Debug server listening");

    Ok(actix_web::rt::spawn(async move {
        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    error!(error = %e, "Debug server failed");
                }
            }
            _ = shutdown.wait() => {
                handle.stop(true).await;
                info!("Debug server stopped");
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test};
    use skiff_mesh::{DeclarativeSnapshot, Settings, SnapshotCache};

    fn state() -> DebugState {
        let reporter = Arc::new(InMemoryStatusReporter::new("skiff-gateway"));
        let syncer = Arc::new(TranslatorSyncer::new(
            Settings::default(),
            Arc::new(SnapshotCache::new()),
            reporter.clone(),
        ));
        DebugState { syncer, reporter }
    }

    #[actix_web::test]
    async fn test_health() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state()))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_xds_snapshot_by_node() {
        let state = state();
        state
            .syncer
            .cache()
            .set_snapshot("skiff-system~gateway-proxy", XdsSnapshot::empty())
            .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/snapshots/xds/skiff-system~gateway-proxy")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get()
            .uri("/snapshots/xds/unknown~node")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/snapshots/xds").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert!(body.get("skiff-system~gateway-proxy").is_some());
    }

    #[actix_web::test]
    async fn test_api_snapshot_after_sync() {
        let state = state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/snapshots/api").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        state.syncer.sync(DeclarativeSnapshot::default()).await.unwrap();

        let req = test::TestRequest::get().uri("/snapshots/api").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/stats").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["backup_enabled"], false);
    }
}
