use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{GrayImage, Luma, Rgb, RgbImage};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use url::Url;

use inpaint_service::model::remote::{RemoteModelConfig, RemoteModelLoader};
use inpaint_service::model::{
    ComputeDevice, InferenceRequest, InpaintModel, ModelError, ModelLoader, SamplingGenerator,
};

#[derive(Clone, Default)]
struct WorkerLog {
    loads: Arc<Mutex<Vec<Value>>>,
    generate_fields: Arc<Mutex<Vec<BTreeMap<String, String>>>>,
}

async fn load_handler(State(log): State<WorkerLog>, Json(body): Json<Value>) -> Json<Value> {
    log.loads.lock().expect("load log").push(body);
    Json(json!({ "device": "cuda" }))
}

/// Echoes the submitted image back as the single generated result.
async fn generate_handler(
    State(log): State<WorkerLog>,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    let mut fields = BTreeMap::new();
    let mut image = Vec::new();
    while let Some(field) = multipart.next_field().await.expect("multipart field") {
        let name = field.name().unwrap_or_default().to_string();
        let data = field.bytes().await.expect("field bytes");
        match name.as_str() {
            "image" => image = data.to_vec(),
            "mask" => {
                fields.insert(name, format!("{} bytes", data.len()));
            }
            _ => {
                fields.insert(name, String::from_utf8_lossy(&data).into_owned());
            }
        }
    }
    log.generate_fields.lock().expect("field log").push(fields);
    (
        StatusCode::OK,
        Json(json!({ "images": [STANDARD.encode(image)] })),
    )
}

async fn failing_generate_handler() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "sampler crashed")
}

async fn spawn_worker(app: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind worker");
    let addr = listener.local_addr().expect("worker addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("worker serve");
    });
    Url::parse(&format!("http://{addr}/")).expect("worker url")
}

fn loader(endpoint: Url, device: ComputeDevice) -> RemoteModelLoader {
    RemoteModelLoader::new(RemoteModelConfig {
        model_id: String::from("runwayml/stable-diffusion-inpainting"),
        device,
        endpoint: Some(endpoint),
        timeout: Duration::from_secs(10),
    })
}

fn inputs() -> (RgbImage, GrayImage) {
    (
        RgbImage::from_pixel(16, 8, Rgb([10, 20, 30])),
        GrayImage::from_pixel(16, 8, Luma([255])),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_worker_receives_load_and_generate_protocol() {
    let log = WorkerLog::default();
    let app = Router::new()
        .route("/load", post(load_handler))
        .route("/generate", post(generate_handler))
        .with_state(log.clone());
    let endpoint = spawn_worker(app).await;

    let (device, output) = tokio::task::spawn_blocking(move || {
        let model = loader(endpoint, ComputeDevice::Auto)
            .load()
            .expect("load should succeed");
        let (image, mask) = inputs();
        let generator = SamplingGenerator {
            device: model.device().clone(),
            seed: 99,
        };
        let outputs = model
            .generate(&InferenceRequest {
                image: &image,
                mask: &mask,
                prompt: "red ball",
                negative_prompt: "blurry",
                num_inference_steps: 20,
                guidance_scale: 7.5,
                strength: 0.8,
                generator: Some(&generator),
            })
            .expect("generate should succeed");
        (model.device().clone(), outputs)
    })
    .await
    .expect("blocking task");

    // `auto` resolves to whatever the worker reports and sends no precision.
    assert_eq!(device, ComputeDevice::Cuda);
    assert_eq!(output.len(), 1);
    assert_eq!(output[0], inputs().0);

    let loads = log.loads.lock().expect("load log").clone();
    assert_eq!(
        loads,
        vec![json!({
            "model": "runwayml/stable-diffusion-inpainting",
            "device": "auto",
        })]
    );

    let fields = log.generate_fields.lock().expect("field log")[0].clone();
    assert_eq!(fields["prompt"], "red ball");
    assert_eq!(fields["negative_prompt"], "blurry");
    assert_eq!(fields["num_inference_steps"], "20");
    assert_eq!(fields["guidance_scale"], "7.5");
    assert_eq!(fields["strength"], "0.8");
    assert_eq!(fields["seed"], "99");
    assert_eq!(fields["generator_device"], "cuda");
    assert_eq!(fields["device"], "cuda");
    assert!(fields.contains_key("mask"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn worker_errors_surface_as_status_errors() {
    let log = WorkerLog::default();
    let app = Router::new()
        .route("/load", post(load_handler))
        .route("/generate", post(failing_generate_handler))
        .with_state(log.clone());
    let endpoint = spawn_worker(app).await;

    let err = tokio::task::spawn_blocking(move || {
        let model = loader(endpoint, ComputeDevice::Cuda)
            .load()
            .expect("load should succeed");
        let (image, mask) = inputs();
        model
            .generate(&InferenceRequest {
                image: &image,
                mask: &mask,
                prompt: "x",
                negative_prompt: "",
                num_inference_steps: 1,
                guidance_scale: 1.0,
                strength: 1.0,
                generator: None,
            })
            .expect_err("worker failure should surface")
    })
    .await
    .expect("blocking task");

    match err {
        ModelError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "sampler crashed");
        }
        other => panic!("unexpected error: {other}"),
    }
    // An explicit CUDA device asks the worker for half precision.
    let loads = log.loads.lock().expect("load log").clone();
    assert_eq!(
        loads,
        vec![json!({
            "model": "runwayml/stable-diffusion-inpainting",
            "device": "cuda",
            "precision": "float16",
        })]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_worker_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind scratch listener");
    let addr = listener.local_addr().expect("scratch addr");
    drop(listener);
    let endpoint = Url::parse(&format!("http://{addr}/")).expect("url");

    let err = tokio::task::spawn_blocking(move || {
        loader(endpoint, ComputeDevice::Cpu)
            .load()
            .err()
            .expect("load should fail")
    })
    .await
    .expect("blocking task");
    assert!(matches!(err, ModelError::Transport(_)), "{err}");
}
