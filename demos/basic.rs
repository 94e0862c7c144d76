//! Minimal adapter example: JSON endpoints, a file download and CORS.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -X DELETE http://localhost:3000/users/42
//!   curl -OJ http://localhost:3000/report
//!
//! `HOST` / `PORT` override the default `0.0.0.0:3000`.

use http::StatusCode;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use tsu_adapter::{
    CorsLayer, Error, HttpAdapter, HyperAdapter, ReplyPayload, Request, Response, RouteTarget,
    ServerConfig, StreamableFile, reply,
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_env()?;
    let app = HyperAdapter::from_config(&config);
    app.enable_cors(CorsLayer::permissive());

    app.get(RouteTarget::at("/users/{id}", get_user))?;
    app.post(RouteTarget::at("/users", create_user))?;
    app.delete(RouteTarget::at("/users/{id}", delete_user))?;
    app.get(RouteTarget::at("/report", report))?;

    app.set_not_found_handler(not_found, None);
    app.set_error_handler(
        |_req, res: Response, err: Error| async move {
            let status = err.status();
            let body = json!({ "statusCode": status.as_u16(), "message": err.to_string() });
            if let Err(e) = reply(&res, ReplyPayload::error(status, body), Some(status)) {
                tracing::error!("error reply failed: {e}");
            }
        },
        None,
    );

    let addr = config.addr();
    app.listen(config.port, config.host).await?;
    tracing::info!(%addr, "ready");

    tsu_adapter::shutdown_signal().await;
    app.close().await;
    Ok(())
}

// GET /users/{id}
async fn get_user(req: Request, res: Response) -> Result<(), Error> {
    let id = req.param("id").unwrap_or("unknown").to_owned();
    reply(&res, json!({ "id": id, "name": "alice" }), None)
}

// POST /users
//
// The route wrapper has already parsed the body; an empty body shows up as {}.
// Errors returned with `?` before a reply is sent go to the error handler
// registered in `main`.
async fn create_user(req: Request, res: Response) -> Result<(), Error> {
    let name = req
        .body()
        .and_then(|body| body.get("name").and_then(|n| n.as_str().map(str::to_owned)));

    let Some(name) = name else {
        let body = json!({ "statusCode": 400, "message": "name is required" });
        return reply(&res, ReplyPayload::error(StatusCode::BAD_REQUEST, body), Some(StatusCode::BAD_REQUEST));
    };

    res.set_header("location", "/users/99")?;
    reply(&res, json!({ "id": "99", "name": name }), Some(StatusCode::CREATED))
}

// DELETE /users/{id} → 204 No Content
async fn delete_user(_req: Request, res: Response) -> Result<(), Error> {
    reply(&res, ReplyPayload::Empty, Some(StatusCode::NO_CONTENT))
}

// GET /report → streamed CSV attachment
async fn report(_req: Request, res: Response) -> Result<(), Error> {
    let file = StreamableFile::from_bytes("id,name\n42,alice\n99,bob\n")
        .content_type("text/csv")
        .disposition(r#"attachment; filename="users.csv""#);
    reply(&res, file, None)
}

async fn not_found(req: Request, res: Response) {
    res.status(StatusCode::NOT_FOUND);
    let body = json!({ "statusCode": 404, "message": format!("Cannot {} {}", req.method(), req.path()) });
    if let Err(e) = res.json(&body) {
        tracing::error!("not-found reply failed: {e}");
    }
}
