use std::sync::Arc;

use meal_assist::broadcast::MealBroadcaster;
use meal_assist::channels::{MessageSender, WebhookState, WhatsAppSender, webhook_routes};
use meal_assist::clock::{Clock, SystemClock};
use meal_assist::config::AppConfig;
use meal_assist::conversation::{ConversationCore, CoreConfig};
use meal_assist::llm::{FailoverGateway, create_providers};
use meal_assist::onboarding::{OnboardingEngine, OnboardingRouteState, onboarding_routes};
use meal_assist::scheduler::{MealScheduler, spawn_scheduler};
use meal_assist::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export WHATSAPP_ACCESS_TOKEN=... WHATSAPP_PHONE_NUMBER_ID=... WEBHOOK_VERIFY_TOKEN=... LLM_API_KEY=...");
        std::process::exit(1);
    });

    eprintln!("🍽️  Meal Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Models: {}", config.llm.models.join(" → "));
    eprintln!("   Timezone: {}", config.timezone);
    eprintln!("   Webhook: http://0.0.0.0:{}/webhook", config.port);
    eprintln!("   Status API: http://0.0.0.0:{}/api/onboarding/{{phone}}", config.port);

    // ── Text generation ─────────────────────────────────────────────────
    let providers = create_providers(&config.llm)?;
    let gateway = Arc::new(FailoverGateway::new(providers, config.gateway));

    // ── Database ────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.db_path.display());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.timezone));
    let sender: Arc<dyn MessageSender> = Arc::new(WhatsAppSender::new(config.whatsapp.clone()));

    // ── Core ────────────────────────────────────────────────────────────
    let onboarding = Arc::new(OnboardingEngine::new(
        Arc::clone(&db),
        Arc::clone(&gateway),
        Arc::clone(&sender),
        Arc::clone(&clock),
    ));
    let core = Arc::new(ConversationCore::new(
        Arc::clone(&db),
        Arc::clone(&gateway),
        Arc::clone(&onboarding),
        Arc::clone(&sender),
        Arc::clone(&clock),
        CoreConfig {
            context_turns: config.context_turns,
        },
    ));

    // ── Scheduler ───────────────────────────────────────────────────────
    let broadcaster = Arc::new(MealBroadcaster::new(
        Arc::clone(&db),
        Arc::clone(&gateway),
        Arc::clone(&sender),
        Arc::clone(&clock),
    ));
    let scheduler = Arc::new(MealScheduler::new(
        &config.schedules,
        broadcaster,
        Arc::clone(&onboarding),
        Arc::clone(&clock),
    )?);
    let _scheduler_handle = spawn_scheduler(scheduler, config.schedules.tick_interval);
    eprintln!(
        "   Schedules: breakfast `{}`, lunch `{}`, dinner `{}`, onboarding `{}`\n",
        config.schedules.breakfast,
        config.schedules.lunch,
        config.schedules.dinner,
        config.schedules.onboarding
    );

    // ── HTTP ────────────────────────────────────────────────────────────
    let app = webhook_routes(WebhookState {
        core,
        verify_token: config.verify_token.clone(),
    })
    .merge(onboarding_routes(OnboardingRouteState { engine: onboarding }));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "HTTP server started");
    axum::serve(listener, app).await?;

    Ok(())
}
