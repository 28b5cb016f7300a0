//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, OpenAiQuestionAdapter, SeededRandom},
    config::Config,
    error::ApiError,
    study::{
        BatchGenerator, ChunkRotator, GenerationSettings, RefillScheduler, StudyService,
        StudySettings,
    },
    web::{
        record_answer_handler, rest::ApiDoc, review_question_handler, state::AppState,
        study_question_handler, sweep_handler,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{routing::post, Router};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            config.log_level.to_string(),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);
    let question_adapter = Arc::new(OpenAiQuestionAdapter::new(
        openai_client,
        config.question_model.clone(),
    ));
    let rng = Arc::new(SeededRandom::from_entropy());

    // --- 4. Assemble the Study Engine ---
    let rotator = ChunkRotator::new(db.clone(), rng.clone());
    let generator = Arc::new(BatchGenerator::new(
        db.clone(),
        db.clone(),
        question_adapter,
        rotator,
        rng.clone(),
        GenerationSettings {
            cache_hit_probability: config.cache_hit_probability,
            chunk_size: config.chunk_size,
        },
    ));
    let refill = RefillScheduler::new(
        generator.clone(),
        db.clone(),
        config.buffer_target_size,
        config.buffer_ttl(),
    );
    let study = Arc::new(StudyService::new(
        db.clone(),
        db.clone(),
        db.clone(),
        rng,
        generator,
        refill,
        StudySettings {
            initial_batch_size: config.initial_batch_size,
            buffer_ttl: config.buffer_ttl(),
        },
    ));

    // --- 5. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        study,
        config: config.clone(),
    });

    // --- 6. Spawn the Periodic Buffer Sweep ---
    // Same detachment discipline as the refill task: failures are logged,
    // never surfaced.
    let sweep_state = app_state.clone();
    let sweep_interval = config.sweep_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        // The first tick completes immediately; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sweep_state.study.sweep_buffers().await {
                Ok(removed) if removed > 0 => {
                    info!(removed, "purged expired buffer entries");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "periodic buffer sweep failed"),
            }
        }
    });

    // --- 7. Create the Web Router ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_router = Router::new()
        .route("/study/question", post(study_question_handler))
        .route("/study/answer", post(record_answer_handler))
        .route("/study/review", post(review_question_handler))
        .route("/maintenance/sweep", post(sweep_handler))
        .layer(cors)
        .with_state(app_state);

    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 8. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
