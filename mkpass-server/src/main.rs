use std::env;
use std::path::PathBuf;
use std::sync::RwLock;

use actix_web::{get, put, web, App, HttpResponse, HttpServer, Responder};
use log::{error, info};
use serde::Deserialize;

use mkpass_core::io::{get_filename, list_files, load_generator, normalize_folder};
use mkpass_core::model::generator::PasswordGenerator;

const MODEL_EXTENSION: &str = "bin";
const MAX_COUNT: usize = 1000;
const MAX_LENGTH: usize = 256;

/// Query parameters of the `/v1/generate` endpoint
#[derive(Deserialize)]
struct GenerateParams {
	length: Option<usize>,
	count: Option<usize>,
	seed: Option<u64>,
}

#[derive(Deserialize)]
struct ModelQuery {
	name: Option<String>,
}

struct LoadedModel {
	name: String,
	generator: PasswordGenerator,
}

/// State shared by every worker.
///
/// Generation only needs read access, so concurrent requests sample in
/// parallel; loading a model takes the write lock.
struct SharedData {
	data_folder: PathBuf,
	model: Option<LoadedModel>,
}

impl GenerateParams {
	fn validate(&self) -> Result<(usize, usize), String> {
		let length = self.length.unwrap_or(6);
		let count = self.count.unwrap_or(5);
		if length == 0 || length > MAX_LENGTH {
			return Err(format!("length must be between 1 and {MAX_LENGTH}"));
		}
		if count == 0 || count > MAX_COUNT {
			return Err(format!("count must be between 1 and {MAX_COUNT}"));
		}
		Ok((length, count))
	}
}

/// HTTP GET endpoint `/v1/generate`
///
/// Generates `count` words of `length` characters with the loaded model.
/// Returns one word per line.
#[get("/v1/generate")]
async fn get_generated(data: web::Data<RwLock<SharedData>>, query: web::Query<GenerateParams>) -> impl Responder {
	let (length, count) = match query.validate() {
		Ok(v) => v,
		Err(e) => return HttpResponse::BadRequest().body(e),
	};

	let shared_data = match data.read() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};
	let model = match &shared_data.model {
		Some(model) => model,
		None => return HttpResponse::Conflict().body("No model loaded"),
	};

	match model.generator.generate_many(count, length, query.seed) {
		Ok(words) => HttpResponse::Ok().body(words.join("\n")),
		Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
	}
}

/// HTTP GET endpoint `/v1/models`
///
/// Lists the loadable model names, one per line.
#[get("/v1/models")]
async fn get_models(data: web::Data<RwLock<SharedData>>) -> impl Responder {
	let folder = match data.read() {
		Ok(m) => m.data_folder.clone(),
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};
	match list_files(&folder, MODEL_EXTENSION) {
		Ok(files) => {
			let names: Vec<String> = files.iter().filter_map(|f| get_filename(f).ok()).collect();
			HttpResponse::Ok().body(names.join("\n"))
		}
		Err(_) => HttpResponse::InternalServerError().body("Failed to list models"),
	}
}

#[get("/v1/loaded_model")]
async fn get_loaded_model(data: web::Data<RwLock<SharedData>>) -> impl Responder {
	let shared_data = match data.read() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};
	match &shared_data.model {
		Some(model) => HttpResponse::Ok().body(format!(
			"{}\nstates: {}\nsymbols: {}",
			model.name,
			model.generator.hmm().n_states(),
			model.generator.hmm().n_symbols()
		)),
		None => HttpResponse::Ok().body(""),
	}
}

#[put("/v1/load_model")]
async fn put_model(data: web::Data<RwLock<SharedData>>, query: web::Query<ModelQuery>) -> impl Responder {
	let name = match &query.name {
		Some(s) if !s.trim().is_empty() => s.trim().to_owned(),
		_ => return HttpResponse::BadRequest().body("Missing or empty model name"),
	};
	if name.contains(['/', '\\']) || name.starts_with('.') {
		return HttpResponse::BadRequest().body("Invalid model name");
	}

	let model_path = match data.read() {
		Ok(m) => m.data_folder.join(format!("{name}.{MODEL_EXTENSION}")),
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};

	// Decode outside the lock, swap under it
	let generator = match load_generator(&model_path) {
		Ok(g) => g,
		Err(e) => {
			error!("Failed to load {}: {}", model_path.display(), e);
			return HttpResponse::InternalServerError().body(format!("Failed to load model: {e}"));
		}
	};

	let mut shared_data = match data.write() {
		Ok(m) => m,
		Err(_) => return HttpResponse::InternalServerError().body("Model lock failed"),
	};
	info!("Loaded model {} ({} states)", name, generator.hmm().n_states());
	shared_data.model = Some(LoadedModel { name, generator });

	HttpResponse::Ok().body("Model loaded successfully")
}

/// Main entry point for the server.
///
/// # Configuration
/// - `MKPASS_BIND`: listen address (default `127.0.0.1:5000`)
/// - `MKPASS_DATA`: folder holding `*.bin` models (default `./data`)
#[actix_web::main]
async fn main() -> std::io::Result<()> {
	env_logger::init();

	let bind = env::var("MKPASS_BIND").unwrap_or_else(|_| "127.0.0.1:5000".to_owned());
	let data_folder = normalize_folder(&env::var("MKPASS_DATA").unwrap_or_else(|_| "./data".to_owned()));
	info!("Serving models from {} on {}", data_folder.display(), bind);

	let shared_data = SharedData { data_folder, model: None };
	let shared_model = web::Data::new(RwLock::new(shared_data));

	HttpServer::new(move || {
		App::new()
			.app_data(shared_model.clone())
			.service(get_generated)
			.service(get_models)
			.service(put_model)
			.service(get_loaded_model)
	})
		.bind(bind)?
		.run()
		.await
}
