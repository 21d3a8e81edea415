#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use image::{DynamicImage, Rgb, RgbImage};
use sdgate_core::{GenerationRequest, ModelLike};
use sdgate_server::{AuthGuard, Credential, GenerationPolicy, InferenceGateway};
use tokio::net::TcpListener;

pub const SECRET: &str = "secret123";
pub const PROMPT: &str = "a red fox in snow";

/// Paints a solid image and remembers what it was asked.
#[derive(Default)]
pub struct StubModel {
    calls: AtomicUsize,
    last_request: Mutex<Option<GenerationRequest>>,
}

impl StubModel {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

impl ModelLike for StubModel {
    fn run(&self, request: &GenerationRequest) -> anyhow::Result<DynamicImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            64,
            48,
            Rgb([180, 60, 20]),
        )))
    }
}

pub struct FailingModel;

impl ModelLike for FailingModel {
    fn run(&self, _request: &GenerationRequest) -> anyhow::Result<DynamicImage> {
        anyhow::bail!("CUDA out of memory: tried to allocate 20.00 GiB")
    }
}

pub struct SlowModel(pub Duration);

impl ModelLike for SlowModel {
    fn run(&self, _request: &GenerationRequest) -> anyhow::Result<DynamicImage> {
        std::thread::sleep(self.0);
        Ok(DynamicImage::ImageRgb8(RgbImage::new(8, 8)))
    }
}

pub fn authenticated_gateway(model: Arc<dyn ModelLike>) -> InferenceGateway {
    InferenceGateway::new(
        AuthGuard::authenticated(Credential::new(SECRET)),
        model,
        GenerationPolicy::default(),
    )
}

pub fn open_gateway(model: Arc<dyn ModelLike>) -> InferenceGateway {
    InferenceGateway::new(AuthGuard::open(), model, GenerationPolicy::default())
}

pub fn gateway_with_timeout(model: Arc<dyn ModelLike>, timeout: Duration) -> InferenceGateway {
    InferenceGateway::new(
        AuthGuard::authenticated(Credential::new(SECRET)),
        model,
        GenerationPolicy {
            inference_timeout: Some(timeout),
            ..GenerationPolicy::default()
        },
    )
}

/// Serves `app` on an ephemeral loopback port.
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn decode_jpeg(bytes: &[u8]) -> DynamicImage {
    image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg).unwrap()
}
