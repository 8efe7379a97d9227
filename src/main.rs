use std::{path::PathBuf, sync::Arc};

use anyhow::{Error, Result, anyhow};
use chrono::Local;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use web_push_sender::{
    clients::{database::PostgresSubscriptionStore, push::PushClient},
    config::{Config, load_claims, load_notification_data, load_vapid_signer},
    fanout::FanoutCoordinator,
    models::notification::{NotificationRequest, Urgency},
};

/// Send a push notification to every stored push subscription
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[arg(short = 't', long, default_value = "Test")]
    title: String,

    #[arg(short = 'm', long, default_value = "This is a test")]
    message: String,

    /// Seconds the push service may hold the message
    #[arg(short = 'l', long, default_value_t = NotificationRequest::DEFAULT_TTL)]
    ttl: u32,

    /// very-low, low, normal or high
    #[arg(short = 'u', long, default_value = "normal")]
    urgency: Urgency,

    #[arg(short = 'r', long)]
    require_interaction: bool,

    /// JSON file with optional icon, badge and url
    #[arg(short = 'p', long, default_value = "push_data/push_data.json")]
    push_data_file: PathBuf,

    #[arg(long, default_value = "secrets/private_key.pem")]
    private_key: PathBuf,

    /// JSON file with the VAPID `sub` claim
    #[arg(long, default_value = "secrets/claims.json")]
    claims_file: PathBuf,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    init_tracing();

    if !cli.push_data_file.exists() {
        return Err(anyhow!(
            "The push data file {} does not exist",
            cli.push_data_file.display()
        ));
    }

    let config = Config::load()?;
    let data = load_notification_data(&cli.push_data_file)?;
    let claims = load_claims(&cli.claims_file)?;
    let signer = load_vapid_signer(&cli.private_key, &claims.sub, config.vapid_token_ttl())?;

    let current_time = Local::now().format("%H:%M:%S").to_string();
    let body = format!("{}\n{}\nUrgency: {}", current_time, cli.message, cli.urgency);

    let request = NotificationRequest::new(cli.title, body)
        .with_ttl(cli.ttl)
        .with_urgency(cli.urgency)
        .with_require_interaction(cli.require_interaction)
        .with_data(data);

    info!(
        current_time = %current_time,
        title = %request.title,
        ttl = request.ttl,
        urgency = %request.urgency,
        require_interaction = request.require_interaction,
        push_data_file = %cli.push_data_file.display(),
        "Preparing push notification"
    );

    let store = PostgresSubscriptionStore::connect(&config.database_url, &config.subscriptions_table).await?;
    store.health_check().await?;
    let push_client = PushClient::new(config.request_timeout())?;

    let coordinator = FanoutCoordinator::new(
        Arc::new(store),
        push_client,
        Arc::new(signer),
        config.fanout_config(),
    );

    let cancel = CancellationToken::new();

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight deliveries");
            on_signal.cancel();
        }
    });

    if let Some(deadline) = config.delivery_deadline() {
        let on_deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            warn!(deadline_secs = deadline.as_secs(), "Delivery deadline reached");
            on_deadline.cancel();
        });
    }

    let summary = coordinator.run(&request, cancel).await?;

    println!("Push notification summary: {}", summary);
    for failure in &summary.failures {
        println!("  failed: {} ({})", failure.endpoint, failure.reason);
    }

    Ok(())
}
