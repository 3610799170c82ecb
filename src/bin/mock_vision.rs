//! Mock vision services
//!
//! Serves both wire contracts the gate depends on, for local runs without a
//! real inference server or OCR account.
//!
//! Endpoints:
//! - GET  /models/{model}  readiness probe, always 200
//! - POST /detect          raw image body -> one box in the lower middle of
//!                         the frame (none with --no-plate)
//! - POST /parse/image     OCR.space-shaped response with --plate as text
//!
//! Usage:
//!   cargo run --bin mock_vision -- --port 8500 --plate "XYZ 123"

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[command(name = "mock_vision")]
#[command(about = "Mock plate detector and OCR service for local simulation")]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "8500")]
    port: u16,

    /// Text returned by the OCR endpoint
    #[arg(long, default_value = "XYZ 123")]
    plate: String,

    /// Detection score reported for the box
    #[arg(long, default_value = "0.9")]
    score: f32,

    /// Report no boxes at all
    #[arg(long)]
    no_plate: bool,

    /// Artificial OCR latency (ms), useful for exercising timeouts
    #[arg(long, default_value = "0")]
    ocr_delay_ms: u64,
}

struct Mock {
    args: Args,
    detect_requests: AtomicU64,
    ocr_requests: AtomicU64,
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(value.to_string())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

async fn handle_detect(mock: &Mock, body: Bytes) -> Response<Full<Bytes>> {
    let n = mock.detect_requests.fetch_add(1, Ordering::Relaxed) + 1;

    let (width, height) = match image::load_from_memory(&body) {
        Ok(img) => (img.width() as f32, img.height() as f32),
        Err(e) => {
            eprintln!("[MOCK] detect #{n}: undecodable image ({e})");
            return json_response(StatusCode::BAD_REQUEST, json!({ "error": e.to_string() }));
        }
    };

    if mock.args.no_plate {
        println!("[MOCK] detect #{n}: {width}x{height} -> no boxes");
        return json_response(StatusCode::OK, json!({ "boxes": [] }));
    }

    let plate_box = json!({
        "x1": width * 0.30,
        "y1": height * 0.55,
        "x2": width * 0.70,
        "y2": height * 0.70,
        "score": mock.args.score,
    });
    println!("[MOCK] detect #{n}: {width}x{height} -> 1 box (score {})", mock.args.score);
    json_response(StatusCode::OK, json!({ "boxes": [plate_box] }))
}

async fn handle_ocr(mock: &Mock, body: Bytes) -> Response<Full<Bytes>> {
    let n = mock.ocr_requests.fetch_add(1, Ordering::Relaxed) + 1;
    if mock.args.ocr_delay_ms > 0 {
        tokio::time::sleep(Duration::from_millis(mock.args.ocr_delay_ms)).await;
    }

    println!("[MOCK] ocr #{n}: {} bytes -> {:?}", body.len(), mock.args.plate);
    json_response(
        StatusCode::OK,
        json!({
            "ParsedResults": [{ "ParsedText": mock.args.plate, "FileParseExitCode": 1 }],
            "OCRExitCode": 1,
            "IsErroredOnProcessing": false,
        }),
    )
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    mock: Arc<Mock>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            eprintln!("[MOCK] body read failed: {e}");
            return Ok(json_response(StatusCode::BAD_REQUEST, json!({ "error": "bad body" })));
        }
    };

    let response = match (&method, path.as_str()) {
        (&Method::GET, p) if p.starts_with("/models/") => {
            let model = &p["/models/".len()..];
            println!("[MOCK] probe model={model}");
            json_response(StatusCode::OK, json!({ "model": model, "ready": true }))
        }
        (&Method::POST, "/detect") => handle_detect(&mock, body).await,
        (&Method::POST, "/parse/image") => handle_ocr(&mock, body).await,
        _ => json_response(StatusCode::NOT_FOUND, json!({ "error": "not found" })),
    };
    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║              Mock Plate Vision Services                  ║");
    println!("╠══════════════════════════════════════════════════════════╣");
    println!("║ Port:            {:>5}                                   ║", args.port);
    println!("║ Plate text:      {:<38} ║", args.plate);
    println!("║ Boxes:           {:<38} ║", if args.no_plate { "none" } else { "1" });
    println!("║ OCR delay:       {:>5} ms                                ║", args.ocr_delay_ms);
    println!("╚══════════════════════════════════════════════════════════╝");

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    let mock = Arc::new(Mock { args, detect_requests: AtomicU64::new(0), ocr_requests: AtomicU64::new(0) });

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let mock = mock.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let mock = mock.clone();
                async move { handle_request(req, mock).await }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                eprintln!("[MOCK] connection from {peer} failed: {e}");
            }
        });
    }
}
