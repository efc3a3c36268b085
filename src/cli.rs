//! Command-line interface definitions for the sport newsletter.
//!
//! All arguments can be provided via command-line flags or environment
//! variables; a `.env` file in the working directory is read first.

use crate::models::Frequency;
use clap::Parser;

/// Command-line arguments for the sport newsletter.
///
/// # Examples
///
/// ```sh
/// # Send to everyone who is due, any frequency
/// sport_newsletter
///
/// # Weekly subscribers only, keeping a copy of each newsletter
/// sport_newsletter --frequency weekly --html-output-dir ./out
///
/// # Render one newsletter for a query and print it
/// sport_newsletter --query "basketball"
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the Firebase service account key file
    #[arg(long, env = "FIREBASE_CREDENTIALS_PATH")]
    pub firebase_credentials_path: String,

    /// SendGrid API key
    #[arg(long, env = "SENDGRID_API_KEY", hide_env_values = true)]
    pub sendgrid_api_key: String,

    /// Optional path to a YAML settings file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Frequencies to process (repeatable); all of them when omitted
    #[arg(short, long, value_enum)]
    pub frequency: Vec<Frequency>,

    /// Render a newsletter for this query instead of sending to subscribers
    #[arg(short, long)]
    pub query: Option<String>,

    /// Also write rendered newsletters and the subscriber log here
    #[arg(long, env = "NEWSLETTER_OUTPUT_DIR")]
    pub html_output_dir: Option<String>,

    /// Render and write newsletters without sending or marking anyone as sent
    #[arg(long)]
    pub dry_run: bool,

    /// List active subscribers and exit
    #[arg(long)]
    pub list_subscribers: bool,
}
