use hyper::{
    Body, Request, Response, Server,
    header::CONTENT_TYPE,
    service::{make_service_fn, service_fn},
};
use owo_colors::OwoColorize;
use prometheus::{Encoder, TextEncoder};
use std::convert::Infallible;

async fn serve_req(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        eprintln!("{}", format!("Failed to encode metrics: {}", e).red());
        return Ok(Response::builder()
            .status(500)
            .body(Body::empty())
            .unwrap());
    }
    Ok(Response::builder()
        .status(200)
        .header(CONTENT_TYPE, encoder.format_type())
        .body(Body::from(buffer))
        .unwrap())
}

/// Serves the process-wide prometheus registry on `0.0.0.0:<port>`.
/// Runs until the process exits; a bind failure is fatal because the
/// scrape endpoint was explicitly requested.
pub async fn run_server(port: u16) {
    let addr = ([0, 0, 0, 0], port).into();
    println!(
        "{}{}",
        "📈 Starting metrics server on port ".green(),
        port.green()
    );
    let make_svc =
        make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(serve_req)) });
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .expect("metrics server failed");
}
