//! The GraphQL server for staff office hours and appointments

use std::net::SocketAddr;
use std::sync::Arc;

use async_graphql::http::{playground_source, GraphQLPlaygroundConfig};
use async_graphql::{Request, Response};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Html;
use axum::routing::get;
use axum::{Extension, Json, Router};
use tower_http::cors::CorsLayer;

use office_hours::config::Settings;
use office_hours::db::postgres::PgStore;
use office_hours::graphql::guards::{Caller, CALLER_ID_HEADER};
use office_hours::graphql::{build_schema, OfficeHoursSchema};
use office_hours::scheduler::Scheduler;
use office_hours::util::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load()?;
    init_logging(&settings.logging.level);

    let store = PgStore::connect(&settings.database.url, settings.database.max_connections).await?;
    let schema = build_schema(Scheduler::new(Arc::new(store), settings.capacity));

    let app = Router::new()
        .route("/", get(playground).post(query))
        .layer(Extension(schema))
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = settings.server.address().parse()?;
    tracing::info!(%addr, "serving office hours API");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

async fn query(
    Extension(schema): Extension<OfficeHoursSchema>,
    headers: HeaderMap,
    Json(request): Json<Request>,
) -> Result<Json<Response>, (StatusCode, String)> {
    let caller = Caller::from_headers(&headers).map_err(|err| (StatusCode::BAD_REQUEST, err))?;
    let request = match caller {
        Some(caller) => request.data(caller),
        None => request,
    };

    Ok(Json(schema.execute(request).await))
}

async fn playground() -> Html<String> {
    Html(playground_source(
        GraphQLPlaygroundConfig::new("/").with_header(CALLER_ID_HEADER, "1"),
    ))
}
