use dotenvy::dotenv;
use service::api::http_routes::{routes, AppState};
use service::config::Settings;
use service::infrastructure::gateways::fake_fx_converter::FakeFxConverter;
use service::infrastructure::gateways::fake_payment_provider::FakePaymentProvider;
use service::infrastructure::gateways::http_payment_provider::HttpPaymentProvider;
use service::infrastructure::uow::SqlxUnitOfWork;
use service::infrastructure::{self as service_infra};
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::FmtSubscriber;
use txn_core::bus::EventBus;
use txn_core::contracts::fx_converter::FxConverter;
use txn_core::contracts::payment_provider::PaymentProvider;
use txn_core::idempotency::IdempotencyTracker;
use txn_core::uow::UnitOfWork;
use txn_core::wiring::Dependencies;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(components(schemas(
    service::api::http_routes::DepositRequest,
    service::api::http_routes::WithdrawalRequest,
    service::api::http_routes::TransferRequest,
    service::api::http_routes::PaymentWebhook
)))]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!("Starting transaction workflow service...");

    let settings = Settings::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&settings.database_url)
        .await?;

    info!("Connected to database");

    sqlx::migrate!("./migrations").run(&pool).await?;

    let uow: Arc<dyn UnitOfWork> = Arc::new(SqlxUnitOfWork::new(pool));

    let payment_provider: Arc<dyn PaymentProvider> = match env::var("PAYMENT_PROVIDER_API_KEY") {
        Ok(api_key) => Arc::new(HttpPaymentProvider::new(
            settings.payment_provider_base_url.clone(),
            api_key,
        )),
        Err(_) => {
            info!("PAYMENT_PROVIDER_API_KEY not set, using fake payment provider");
            Arc::new(FakePaymentProvider::new())
        }
    };

    let fx_converter: Arc<dyn FxConverter> = Arc::new(FakeFxConverter::new());

    let bus = EventBus::new();
    let tracker = Arc::new(IdempotencyTracker::from_config(
        settings.core.idempotency_enabled,
        settings.core.idempotency_ttl,
    ));
    let deps = Dependencies {
        uow: uow.clone(),
        payment_provider,
    };
    service_infra::register_all(&bus, &deps, tracker, fx_converter);

    let app_state = Arc::new(AppState { bus, uow });

    let app = routes(app_state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let addr = settings.addr();
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
