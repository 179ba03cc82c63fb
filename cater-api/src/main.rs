use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cater_api::{
    app,
    state::{AppState, AuthConfig, RateLimit},
};
use cater_booking::{
    BookingManager, MirrorSync, MirrorWorker, NotificationDispatcher, PaymentOrchestrator,
    PersistenceGateway, RetryPolicy, UserService,
};
use cater_core::outbox::OutboxStore;
use cater_store::{
    DbClient, ElasticIndex, MandrillClient, PgOutbox, RedisClient, StoreBookingRepository,
    StorePaymentRepository, StoreSettingsProvider, StoreUserRepository, StoreVendorRepository,
    StripeClient,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cater_api=debug,cater_booking=debug,cater_store=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = cater_store::app_config::Config::load()?;
    tracing::info!("Starting Cater API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url, config.database.max_connections).await?;
    db.migrate().await?;

    let redis = match RedisClient::new(&config.redis.url).await {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!("Redis unavailable, rate limiting disabled: {}", e);
            None
        }
    };

    let users_repo = Arc::new(StoreUserRepository::new(db.pool.clone()));
    let gateway = PersistenceGateway::new(
        Arc::new(StoreBookingRepository::new(db.pool.clone())),
        Arc::new(StorePaymentRepository::new(db.pool.clone())),
        users_repo.clone(),
        Arc::new(StoreVendorRepository::new(db.pool.clone())),
        Arc::new(StoreSettingsProvider::new(db.clone(), config.fees.into())),
    );

    let outbox: Arc<dyn OutboxStore> = Arc::new(PgOutbox::new(db.pool.clone()));
    let index = Arc::new(ElasticIndex::new(
        &config.search.url,
        &config.search.index_prefix,
    ));
    let mirror = Arc::new(MirrorSync::new(index, outbox.clone(), gateway.clone()));

    let mailer = Arc::new(MandrillClient::new(
        &config.mail.api_url,
        &config.mail.api_key,
        &config.mail.from_email,
    ));
    let notifier = Arc::new(NotificationDispatcher::new(mailer));

    let stripe = Arc::new(StripeClient::new(
        &config.payments.api_url,
        &config.payments.secret_key,
    ));
    let payments = Arc::new(PaymentOrchestrator::new(
        stripe,
        config.payments.currency.clone(),
    ));

    let worker = MirrorWorker::new(
        mirror.clone(),
        outbox,
        RetryPolicy::with_max_attempts(config.outbox.max_attempts),
        config.outbox.batch_size,
        Duration::from_millis(config.outbox.poll_interval_ms),
    );
    tokio::spawn(worker.run());

    let app_state = AppState {
        bookings: Arc::new(BookingManager::new(
            gateway,
            mirror.clone(),
            notifier.clone(),
            payments.clone(),
        )),
        users: Arc::new(UserService::new(users_repo, mirror, notifier, payments)),
        redis,
        rate_limit: RateLimit {
            requests: config.rate_limit.requests,
            window_seconds: config.rate_limit.window_seconds,
        },
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
