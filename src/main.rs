//! # Sport Newsletter
//!
//! Scrapes sports news for each subscriber's sports of interest, indexes the
//! scraped text, renders an HTML newsletter, and emails it to subscribers
//! whose preferences say they are due.
//!
//! ## Usage
//!
//! ```sh
//! FIREBASE_CREDENTIALS_PATH=./creds.json SENDGRID_API_KEY=... sport_newsletter -f weekly
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture:
//! 1. **Scheduling**: Find active subscribers due for their frequency
//! 2. **Resolving**: Map each sport to candidate URLs from a keyword table
//! 3. **Fetching**: Download candidate pages one at a time with a fixed delay
//! 4. **Indexing**: Accumulate the text and rebuild a TF-IDF index over it
//! 5. **Output**: Render HTML, send through SendGrid, and stamp the send time

use clap::Parser;
use std::error::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod index;
mod mailer;
mod models;
mod outputs;
mod pipeline;
mod schedule;
mod scrapers;
mod store;
#[cfg(test)]
mod test_support;
mod utils;

use cli::Cli;
use config::Settings;
use mailer::{NewsletterSender, SendGridMailer};
use models::Frequency;
use pipeline::Pipeline;
use schedule::Scheduler;
use store::firestore::FirestoreStore;
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let dotenv = dotenvy::dotenv();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("sport_newsletter starting up");
    if let Ok(path) = dotenv {
        debug!(path = %path.display(), "Loaded .env");
    }

    let args = Cli::parse();
    debug!(?args.frequency, ?args.query, ?args.html_output_dir, dry_run = args.dry_run, "Parsed CLI arguments");

    let settings = Settings::load(args.config.as_deref())?;

    if let Some(dir) = &args.html_output_dir {
        ensure_writable_dir(dir).await?;
    }

    let store = FirestoreStore::from_credentials_file(&args.firebase_credentials_path)?;
    let mailer = SendGridMailer::new(&args.sendgrid_api_key)?;
    let sender = NewsletterSender::new(mailer, &settings.from_address);
    let mut pipeline = Pipeline::new(Scheduler::new(store), sender, settings)?
        .with_html_output_dir(args.html_output_dir.clone())
        .dry_run(args.dry_run);

    if args.list_subscribers {
        for user in pipeline.scheduler().get_active_subscribers().await {
            let due = schedule::is_due(user.last_newsletter_sent, &user.notification_frequency);
            println!(
                "{}\t{}\t{}\t{}\t{}",
                user.user_id,
                user.email.as_deref().unwrap_or("-"),
                user.notification_frequency,
                if due { "due" } else { "-" },
                user.sport_preferences.join(",")
            );
        }
        return Ok(());
    }

    if let Some(query) = &args.query {
        match pipeline.run_query(query).await {
            Some(rendered) => {
                info!(
                    sport = %rendered.newsletter.sport,
                    articles = rendered.newsletter.articles.len(),
                    "Rendered newsletter"
                );
                if args.html_output_dir.is_none() {
                    println!("{}", rendered.html);
                }
            }
            None => warn!(%query, "{}", index::NO_CONTENT),
        }
    } else {
        let frequencies = if args.frequency.is_empty() {
            Frequency::ALL.to_vec()
        } else {
            args.frequency.clone()
        };
        for frequency in frequencies {
            pipeline.run_frequency(frequency).await;
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        documents = pipeline.indexer().documents().len(),
        "Execution complete"
    );

    Ok(())
}
