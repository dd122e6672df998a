use chrono::{Local, NaiveDate};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use eatfit_photo_batch::{
    app_state::AppState,
    config::AppConfig,
    models::batch::{BatchEvent, BatchResults},
    models::queue::{BatchContext, MealType, PhotoInput, PhotoSource},
};

/// Analyze a batch of food photos with the EatFit24 recognition service.
#[derive(Debug, Parser)]
#[command(name = "eatfit-batch", version)]
struct Cli {
    /// Photos to analyze, processed in the given order
    #[arg(required = true)]
    photos: Vec<PathBuf>,

    /// Meal category (breakfast, lunch, dinner, snack)
    #[arg(long, default_value = "lunch")]
    meal_type: MealType,

    /// Meal date (YYYY-MM-DD), defaults to today
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Comment sent with every photo (e.g. "no sugar")
    #[arg(long)]
    comment: Option<String>,

    /// Attach photos to an existing meal
    #[arg(long)]
    meal_id: Option<i64>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    if let Some(addr) = &config.metrics_bind_addr {
        let addr: SocketAddr = addr.parse().expect("Invalid METRICS_BIND_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus metrics exporter");
        tracing::info!(%addr, "Prometheus exporter listening");
    }

    metrics::describe_counter!(
        "photo_batch_items_total",
        "Photos that reached a terminal state, by outcome"
    );
    metrics::describe_histogram!(
        "photo_recognition_seconds",
        "Time to take one photo from compression to a terminal state"
    );
    metrics::describe_counter!("photo_task_polls_total", "Task status requests sent");
    metrics::describe_counter!(
        "photo_fallback_lookups_total",
        "Meal lookups issued for empty task results"
    );

    let state = AppState::new(config).expect("Failed to initialize API client");
    let analyzer = state.analyzer.clone();

    let mut events = analyzer.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => report_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Progress reporter fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let photos = cli
        .photos
        .into_iter()
        .map(|path| {
            let photo = PhotoInput::new(PhotoSource::Path(path));
            match &cli.comment {
                Some(comment) => photo.with_comment(comment.clone()),
                None => photo,
            }
        })
        .collect();
    let context = BatchContext {
        date: cli.date.unwrap_or_else(|| Local::now().date_naive()),
        meal_type: cli.meal_type,
        meal_id: cli.meal_id,
    };

    let batch_id = analyzer
        .start_batch(photos, context)
        .expect("Failed to start batch");
    tracing::info!(%batch_id, "Batch submitted");

    tokio::select! {
        _ = analyzer.wait_until_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, cancelling batch");
            analyzer.cancel_batch();
            analyzer.wait_until_idle().await;
        }
    }

    let results = analyzer.results();
    reporter.abort();

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&results).expect("Failed to serialize results")
        );
    } else {
        print_results(&results);
    }

    if results.summary.failed > 0 {
        std::process::exit(1);
    }
}

fn report_event(event: &BatchEvent) {
    match event {
        BatchEvent::ItemUpdated { item } => {
            tracing::info!(item_id = %item.id, photo = %item.preview, status = %item.status, "Photo updated");
        }
        BatchEvent::QuotaExceeded { details, .. } => {
            tracing::warn!(
                daily_limit = ?details.daily_limit,
                used = ?details.used,
                plan = ?details.plan,
                "Daily photo limit reached; remaining photos stay pending"
            );
        }
        other => tracing::debug!(event = ?other, "Batch event"),
    }
}

fn print_results(results: &BatchResults) {
    for item in &results.items {
        match (&item.result, &item.error) {
            (Some(result), _) if result.neutral => {
                println!("{:<32} saved, items are still being processed", item.preview);
            }
            (Some(result), _) => {
                let names: Vec<&str> = result.items.iter().map(|i| i.name.as_str()).collect();
                println!(
                    "{:<32} {:>6.0} kcal  P {:.1}  F {:.1}  C {:.1}  [{}]",
                    item.preview,
                    result.totals.calories,
                    result.totals.protein,
                    result.totals.fat,
                    result.totals.carbohydrates,
                    names.join(", ")
                );
            }
            (None, Some(error)) => println!("{:<32} {}: {}", item.preview, item.status, error.message),
            (None, None) => println!("{:<32} {}", item.preview, item.status),
        }
    }

    let summary = &results.summary;
    println!(
        "\n{} photos: {} succeeded ({} pending on server), {} failed, {} cancelled, {} not processed",
        summary.total,
        summary.succeeded,
        summary.neutral,
        summary.failed,
        summary.cancelled,
        summary.pending
    );
}
