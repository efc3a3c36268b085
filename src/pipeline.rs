//! One newsletter run: resolve, fetch, index, render, send, record.
//!
//! Each distinct sport is scraped and rendered at most once per run; every due
//! subscriber then receives one newsletter per preferred sport. A subscriber is
//! marked as sent only when every newsletter addressed to them was accepted,
//! so anyone with a failed send stays due for the next run.

use crate::config::Settings;
use crate::index::{ContentIndexer, DocId, IngestOutcome};
use crate::mailer::{Mailer, NewsletterSender};
use crate::models::{Frequency, Newsletter, NewsletterArticle, UserPreference};
use crate::outputs::{html, json};
use crate::schedule::Scheduler;
use crate::scrapers::fetcher::RateLimitedFetcher;
use crate::scrapers::urls;
use crate::store::DocumentStore;
use crate::utils::preview;
use chrono::Local;
use itertools::Itertools;
use std::collections::HashMap;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Label used for subscribers who have not picked a sport.
pub const GENERIC_SPORT: &str = "Sports";

type Resolver = Box<dyn Fn(&str) -> Vec<String>>;

/// A rendered newsletter, ready to send.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub newsletter: Newsletter,
    pub html: String,
}

/// Counts for one frequency pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    pub marked: usize,
}

pub struct Pipeline<S, M> {
    scheduler: Scheduler<S>,
    sender: NewsletterSender<M>,
    fetcher: RateLimitedFetcher,
    indexer: ContentIndexer,
    settings: Settings,
    delay: Duration,
    resolve: Resolver,
    html_output_dir: Option<String>,
    dry_run: bool,
    rendered: HashMap<String, Option<Rendered>>,
}

impl<S: DocumentStore, M: Mailer> Pipeline<S, M> {
    pub fn new(
        scheduler: Scheduler<S>,
        sender: NewsletterSender<M>,
        settings: Settings,
    ) -> Result<Self, Box<dyn Error>> {
        let delay = settings.rate_limit_delay()?;
        let fetcher = RateLimitedFetcher::new(&settings.user_agent, settings.request_timeout())?;
        Ok(Self {
            scheduler,
            sender,
            fetcher,
            indexer: ContentIndexer::new(settings.summary_chars)
                .with_max_terms(settings.max_index_terms),
            settings,
            delay,
            resolve: Box::new(urls::resolve),
            html_output_dir: None,
            dry_run: false,
            rendered: HashMap::new(),
        })
    }

    /// Replace the keyword table lookup.
    #[cfg(test)]
    pub fn with_resolver(mut self, resolve: impl Fn(&str) -> Vec<String> + 'static) -> Self {
        self.resolve = Box::new(resolve);
        self
    }

    pub fn with_html_output_dir(mut self, dir: Option<String>) -> Self {
        self.html_output_dir = dir;
        self
    }

    /// Render and write, but never send or mark sent.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn scheduler(&self) -> &Scheduler<S> {
        &self.scheduler
    }

    #[cfg(test)]
    pub fn sender(&self) -> &NewsletterSender<M> {
        &self.sender
    }

    pub fn indexer(&self) -> &ContentIndexer {
        &self.indexer
    }

    /// Scrape and render a newsletter for one sport.
    ///
    /// `None` when nothing could be scraped or the index rebuild failed.
    #[instrument(level = "info", skip(self))]
    pub async fn build_newsletter(&mut self, sport: &str, query: &str) -> Option<Rendered> {
        let candidate_urls = (self.resolve)(query);
        debug!(urls = ?candidate_urls, "Candidate URLs");
        let docs = self.fetcher.fetch(&candidate_urls, self.delay).await;

        let added = match self.indexer.ingest(docs) {
            IngestOutcome::Indexed { summary, added } => {
                info!(
                    documents = added.len(),
                    summary = %crate::utils::truncate_for_log(&summary, 120),
                    "Indexed scraped content"
                );
                added
            }
            outcome @ IngestOutcome::Empty => {
                warn!(%outcome, "Nothing to send");
                return None;
            }
            outcome @ IngestOutcome::Failed { .. } => {
                error!(%outcome, "Skipping newsletter");
                return None;
            }
        };

        let newsletter = Newsletter {
            sport: sport.to_string(),
            articles: self.assemble_articles(added, query),
            date: Local::now().date_naive().to_string(),
        };
        let html = html::render_newsletter(&newsletter);

        if let Some(dir) = &self.html_output_dir {
            if let Err(e) = html::write_newsletter(dir, &newsletter, &html).await {
                error!(%dir, error = %e, "Failed to write newsletter HTML");
            }
        }
        Some(Rendered { newsletter, html })
    }

    /// Articles for buffer positions `ids`, most relevant to `query` first.
    fn assemble_articles(&self, ids: std::ops::Range<usize>, query: &str) -> Vec<NewsletterArticle> {
        let Some(index) = self.indexer.index() else {
            return Vec::new();
        };
        let scores: HashMap<DocId, f32> = index
            .search(query, index.len())
            .into_iter()
            .map(|hit| (hit.doc_id, hit.score))
            .collect();
        let docs = self.indexer.documents();

        ids.map(|i| i as DocId)
            .sorted_by(|a, b| {
                let sa = scores.get(a).copied().unwrap_or(0.0);
                let sb = scores.get(b).copied().unwrap_or(0.0);
                sb.partial_cmp(&sa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.cmp(b))
            })
            .map(|id| {
                let doc = &docs[id as usize];
                NewsletterArticle {
                    title: doc.source_tag().unwrap_or_else(|| doc.source_url.clone()),
                    summary: preview(&doc.text, self.settings.preview_chars).to_string(),
                    keywords: index.top_terms(id, self.settings.keywords_per_article),
                }
            })
            .collect()
    }

    async fn rendered_for(&mut self, sport: &str, query: &str) -> Option<Rendered> {
        let key = query.to_lowercase();
        if !self.rendered.contains_key(&key) {
            let rendered = self.build_newsletter(sport, query).await;
            self.rendered.insert(key.clone(), rendered);
        }
        self.rendered.get(&key).cloned().flatten()
    }

    /// Render a newsletter for an ad-hoc query without touching subscribers.
    pub async fn run_query(&mut self, query: &str) -> Option<Rendered> {
        let sport = if query.trim().is_empty() {
            GENERIC_SPORT
        } else {
            query.trim()
        };
        self.rendered_for(sport, query).await
    }

    /// Send to every subscriber due at `frequency`.
    ///
    /// Each due subscriber gets one newsletter per sport preference (or a
    /// generic one if they have none). They are marked sent only when every
    /// send was accepted, and never on a dry run.
    ///
    /// # Returns
    ///
    /// Counts of due users, accepted and failed sends, and users marked sent.
    #[instrument(level = "info", skip(self))]
    pub async fn run_frequency(&mut self, frequency: Frequency) -> RunReport {
        let users = self.scheduler.users_due_for(frequency).await;
        let mut report = RunReport {
            due: users.len(),
            ..RunReport::default()
        };

        for user in users {
            self.deliver_to(&user, &mut report).await;
        }

        info!(
            %frequency,
            due = report.due,
            sent = report.sent,
            failed = report.failed,
            marked = report.marked,
            dry_run = self.dry_run,
            "Frequency pass complete"
        );
        report
    }

    async fn deliver_to(&mut self, user: &UserPreference, report: &mut RunReport) {
        let Some(email) = user.email.as_deref().filter(|e| !e.trim().is_empty()) else {
            warn!(user_id = %user.user_id, "Subscriber has no email address; skipping");
            return;
        };

        let sports: Vec<(String, String)> = if user.sport_preferences.is_empty() {
            vec![(GENERIC_SPORT.to_string(), String::new())]
        } else {
            user.sport_preferences
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unique_by(|s| s.to_lowercase())
                .map(|s| (s.clone(), s))
                .collect()
        };

        let mut all_sent = !sports.is_empty();
        for (sport, query) in sports {
            let Some(rendered) = self.rendered_for(&sport, &query).await else {
                all_sent = false;
                continue;
            };
            if self.dry_run {
                debug!(user_id = %user.user_id, %sport, "Dry run; not sending");
                continue;
            }
            if self.sender.send_newsletter(email, &rendered.html, &sport).await {
                report.sent += 1;
                if let Some(dir) = &self.html_output_dir {
                    if let Err(e) = json::record_subscriber_preference(dir, email, &sport).await {
                        warn!(error = %e, "Failed to update subscriber preference log");
                    }
                }
            } else {
                report.failed += 1;
                all_sent = false;
            }
        }

        if self.dry_run {
            return;
        }
        if all_sent && self.scheduler.mark_sent(&user.user_id).await {
            report.marked += 1;
        }
    }
}
