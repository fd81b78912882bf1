//! Field Extractor - key/value extraction from images and PDFs via a vision model.

mod config;
mod document;
mod error;
mod extractor;
mod normalize;
mod pdf;
mod schema;
mod vision;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use config::{ExtractionProfile, ProfileStore, ServiceSettings};
use extractor::Extractor;
use schema::ExtractionOutcome;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vision::{VisionClient, VisionProviderKind};

#[derive(Parser)]
#[command(name = "field-extractor")]
#[command(about = "Extract key-value fields from images and PDFs with a vision model")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract fields from one or more files and print them as JSON
    Extract {
        /// Extraction profile name
        #[arg(short, long)]
        profile: Option<String>,

        /// Model backend (ollama, openrouter)
        #[arg(long)]
        provider: Option<String>,

        /// Model name, e.g. llava
        #[arg(short, long)]
        model: Option<String>,

        /// Image (.png, .jpg, .jpeg, .bmp) or PDF files
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Run the HTTP extraction server
    Serve {
        /// Bind address
        #[arg(long)]
        addr: Option<String>,
    },
    /// List available extraction profiles
    Profiles,
}

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    client: Arc<dyn VisionClient>,
    profiles: Arc<ProfileStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Logs go to stderr; stdout carries the JSON results
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "field_extractor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut settings = ServiceSettings::from_env()?;
    let profiles = ProfileStore::load_from_dir(&settings.config_dir)?;

    match cli.command {
        Command::Profiles => {
            for name in profiles.list() {
                println!("{}", name);
            }
            Ok(())
        }
        Command::Extract {
            profile,
            provider,
            model,
            paths,
        } => {
            if let Some(raw) = provider {
                settings.provider = VisionProviderKind::parse(&raw)
                    .with_context(|| format!("Unknown provider: {}", raw))?;
            }
            if let Some(model) = model {
                settings.model = model;
            }
            let profile = resolve_profile(&profiles, profile.as_deref())?;
            run_extract(&settings, profile, &paths).await
        }
        Command::Serve { addr } => {
            if let Some(addr) = addr {
                settings.bind_addr = addr;
            }
            serve(settings, profiles).await
        }
    }
}

fn resolve_profile(profiles: &ProfileStore, name: Option<&str>) -> anyhow::Result<ExtractionProfile> {
    profiles.resolve(name).cloned().with_context(|| {
        format!(
            "Unknown profile: {}. Available: {:?}",
            name.unwrap_or_default(),
            profiles.list()
        )
    })
}

/// Extract each path in turn and print one pretty JSON document per path.
async fn run_extract(
    settings: &ServiceSettings,
    profile: ExtractionProfile,
    paths: &[PathBuf],
) -> anyhow::Result<()> {
    let client = vision::build_client(settings)?;
    info!(
        "Vision client initialized: {}/{}",
        client.name(),
        client.model()
    );
    let extractor = Extractor::new(client, profile);

    let mut stdout = std::io::stdout().lock();
    for path in paths {
        info!("Extracting {}", path.display());
        let outcome = extractor.extract_path(path).await;
        if outcome.is_error() {
            warn!("Extraction failed for {}", path.display());
        }
        write_outcome(&mut stdout, &outcome)?;
    }
    Ok(())
}

fn write_outcome(out: &mut impl Write, outcome: &ExtractionOutcome) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, outcome)?;
    writeln!(out)?;
    Ok(())
}

async fn serve(settings: ServiceSettings, profiles: ProfileStore) -> anyhow::Result<()> {
    let client = vision::build_client(&settings)?;
    info!(
        "Vision client initialized: {}/{}",
        client.name(),
        client.model()
    );
    info!("Loaded {} profiles: {:?}", profiles.list().len(), profiles.list());

    let state = AppState {
        client,
        profiles: Arc::new(profiles),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/profiles", get(list_profiles))
        .route("/profiles/:name", get(get_profile))
        .route("/extract", post(extract_document))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024)) // 50MB
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_addr))?;
    info!("Server listening on http://{}", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

/// List available profiles.
async fn list_profiles(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.profiles.list())
}

/// Get a specific profile.
async fn get_profile(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ExtractionProfile>, StatusCode> {
    state
        .profiles
        .get(&name)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(serde::Deserialize)]
struct ExtractQuery {
    profile: Option<String>,
}

/// Upload a document and extract its fields.
///
/// Extraction failures are part of the 200 response body as
/// `{"error": ...}`; only request problems map to 4xx.
async fn extract_document(
    State(state): State<AppState>,
    Query(query): Query<ExtractQuery>,
    mut multipart: Multipart,
) -> Result<Json<ExtractionOutcome>, (StatusCode, String)> {
    let profile = state
        .profiles
        .resolve(query.profile.as_deref())
        .cloned()
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!(
                    "Unknown profile: {}. Available: {:?}",
                    query.profile.as_deref().unwrap_or_default(),
                    state.profiles.list()
                ),
            )
        })?;

    let mut filename = String::new();
    let mut file_data = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        if field.name() == Some("file") {
            filename = field.file_name().unwrap_or("document").to_string();
            file_data = field
                .bytes()
                .await
                .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read file: {}", e)))?
                .to_vec();
            break;
        }
    }

    if file_data.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No file uploaded".to_string()));
    }

    info!(
        "Received file: {} ({} bytes) with profile: {}",
        filename,
        file_data.len(),
        profile.name
    );

    let extractor = Extractor::new(state.client.clone(), profile);
    Ok(Json(extractor.extract_bytes(&filename, &file_data).await))
}
