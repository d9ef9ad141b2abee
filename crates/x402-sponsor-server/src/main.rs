use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{web, App, HttpServer};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sponsor::campaign;
use sponsor::config::SponsorConfig;
use sponsor::ledger::Ledger;
use sponsor::offers::OfferEngine;
use sponsor::payout::SimulatedPayoutSender;
use sponsor::processor::WebhookProcessor;
use sponsor::verify::HttpPaymentVerifier;

use sponsor_server::routes;
use sponsor_server::state::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match SponsorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };

    let ledger = match Ledger::open_sqlite(&config.database_path) {
        Ok(ledger) => {
            tracing::info!("Ledger: SQLite at {}", config.database_path.display());
            ledger
        }
        Err(e) => {
            tracing::error!(
                "Failed to open SQLite ledger at {}: {e}",
                config.database_path.display()
            );
            tracing::error!(
                "Refusing to start: an in-memory fallback would forget settled \
                 sessions on restart and reopen them to replay"
            );
            std::process::exit(1);
        }
    };

    // Idempotent provisioning: existing campaigns keep their spent budgets,
    // so restarts never re-fund a drained campaign.
    if config.campaigns_path.exists() {
        let campaigns = match campaign::load_seed_file(&config.campaigns_path) {
            Ok(campaigns) => campaigns,
            Err(e) => {
                tracing::error!(
                    "Malformed campaign seed {}: {e}",
                    config.campaigns_path.display()
                );
                std::process::exit(1);
            }
        };
        let total = campaigns.len();
        match ledger.seed_campaigns(&campaigns) {
            Ok(inserted) => tracing::info!(
                "Campaign seed: {inserted} new, {} already provisioned",
                total - inserted
            ),
            Err(e) => {
                tracing::error!("Campaign seeding failed: {e}");
                std::process::exit(1);
            }
        }
    } else {
        tracing::info!(
            "No campaign seed at {}; campaigns may be provisioned out of band",
            config.campaigns_path.display()
        );
    }

    let metrics_token = std::env::var("METRICS_TOKEN")
        .ok()
        .filter(|s| !s.is_empty())
        .map(|s| s.into_bytes());

    if metrics_token.is_none() {
        tracing::warn!("METRICS_TOKEN not set; /metrics responds 404");
    }

    let verifier = HttpPaymentVerifier::new(&config.verifier_url);
    let offer_engine = OfferEngine::new(ledger.campaigns.clone(), &config.checkout_base_url);
    let processor = WebhookProcessor::new(
        ledger.clone(),
        SimulatedPayoutSender::new(),
        config.webhook_secret.clone(),
    )
    .with_payout_timeout(config.payout_timeout);

    let state = web::Data::new(AppState {
        ledger,
        offer_engine,
        verifier,
        processor,
        content_price: config.content_price,
        metrics_token,
    });

    let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(4022);

    let rate_limit_rpm: u64 = std::env::var("RATE_LIMIT_PER_MINUTE")
        .ok()
        .and_then(|r| r.parse().ok())
        .unwrap_or(120);

    tracing::info!("x402 sponsorship service listening on {host}:{port}");
    tracing::info!("Verifier upstream: {}", config.verifier_url);
    tracing::info!("Rate limit: {rate_limit_rpm} req/min per IP");
    tracing::info!("  POST http://localhost:{port}/verify");
    tracing::info!("  POST http://localhost:{port}/webhooks/conversion");
    tracing::info!("  GET  http://localhost:{port}/sponsors/{{session_id}}");

    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(rate_limit_rpm)
        .finish()
        .expect("failed to build rate limiter config");

    HttpServer::new(move || {
        App::new()
            .wrap(Governor::new(&governor_conf))
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().limit(65_536))
            .app_data(web::PayloadConfig::new(65_536))
            .service(routes::health)
            .service(routes::metrics_endpoint)
            .service(routes::verify)
            .service(routes::conversion_webhook)
            .service(routes::sponsors)
    })
    .bind((host, port))?
    .run()
    .await
}
