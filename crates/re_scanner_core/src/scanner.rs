use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::document::Document;
use crate::error::IoFailure;
use crate::http::{io_failure, is_auth_failure, is_transient};
use crate::ledger::Ledger;
use crate::mediawiki::DocumentStore;
use crate::petscan::{QueryService, SearchFilters};
use crate::tasks::Task;

pub const SUMMARY_PREFIX: &str = "RE-Scanner";

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub max_pages: Option<usize>,
    /// Wall-clock budget, checked between pages.
    pub deadline: Option<Duration>,
    pub dry_run: bool,
    /// Maintenance category added to pages whose tasks fail, and removed
    /// again once they all pass.
    pub error_category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageError {
    pub lemma: String,
    pub reason: String,
}

/// Per-page failures collected over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ErrorReport {
    entries: Vec<PageError>,
}

impl ErrorReport {
    pub fn record(&mut self, lemma: &str, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(lemma, reason = %reason, "page error");
        self.entries.push(PageError {
            lemma: lemma.to_string(),
            reason,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageError> {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub processed: usize,
    pub saved: usize,
    pub skipped: usize,
    pub errors: ErrorReport,
    pub deadline_reached: bool,
}

enum PageOutcome {
    Saved,
    Unchanged,
    Skipped,
    Failed,
}

/// Find candidate lemmas and order them so unprocessed and stale pages come
/// first.
pub fn discover_lemmas(
    query: &mut dyn QueryService,
    filters: &SearchFilters,
    ledger: &Ledger,
) -> Result<Vec<String>> {
    let hits = query.search(filters).context("failed to search for pages")?;
    let lemmas = hits.iter().map(|hit| hit.full_title()).collect();
    ledger.order_by_ledger(lemmas)
}

pub struct Scanner<'a> {
    store: &'a mut dyn DocumentStore,
    tasks: Vec<Box<dyn Task + 'a>>,
    ledger: &'a Ledger,
    options: ScanOptions,
}

impl<'a> Scanner<'a> {
    pub fn new(
        store: &'a mut dyn DocumentStore,
        tasks: Vec<Box<dyn Task + 'a>>,
        ledger: &'a Ledger,
        options: ScanOptions,
    ) -> Self {
        Self {
            store,
            tasks,
            ledger,
            options,
        }
    }

    /// Process lemmas in order until the list, the page limit or the
    /// deadline runs out. Errors returned here abort the whole run.
    pub fn run(&mut self, lemmas: &[String]) -> Result<ScanReport> {
        let started = Instant::now();
        let mut report = ScanReport::default();

        for lemma in lemmas {
            if self
                .options
                .max_pages
                .is_some_and(|max| report.processed >= max)
            {
                break;
            }
            if self
                .options
                .deadline
                .is_some_and(|deadline| started.elapsed() >= deadline)
            {
                tracing::info!(processed = report.processed, "deadline reached");
                report.deadline_reached = true;
                break;
            }

            match self.process_page(lemma, &mut report.errors)? {
                PageOutcome::Saved => report.saved += 1,
                PageOutcome::Skipped => {
                    report.skipped += 1;
                    continue;
                }
                PageOutcome::Unchanged | PageOutcome::Failed => {}
            }
            report.processed += 1;
            if !self.options.dry_run {
                self.ledger.mark_processed_now(lemma)?;
            }
        }

        tracing::info!(
            processed = report.processed,
            saved = report.saved,
            skipped = report.skipped,
            errors = report.errors.len(),
            "scan finished"
        );
        Ok(report)
    }

    fn process_page(&mut self, lemma: &str, errors: &mut ErrorReport) -> Result<PageOutcome> {
        let page = match self.store.fetch_page(lemma) {
            Ok(Some(page)) => page,
            Ok(None) => {
                tracing::warn!(lemma, "page does not exist, skipping");
                return Ok(PageOutcome::Skipped);
            }
            Err(error) => return io_outcome(lemma, "fetch", error, errors),
        };

        let mut document = match Document::from_text(lemma, &page.content) {
            Ok(document) => document,
            Err(error) => {
                errors.record(lemma, error.to_string());
                return Ok(PageOutcome::Failed);
            }
        };

        let mut changed_tasks = Vec::new();
        let mut failed_tasks = Vec::new();
        for task in &mut self.tasks {
            let before = document.content_hash();
            let result = task.process(&mut document);
            let mutated = document.content_hash() != before;
            match result {
                Ok(()) => {
                    if mutated {
                        changed_tasks.push(task.name());
                    }
                }
                Err(error) if mutated || is_auth_failure(&error) => {
                    tracing::error!(lemma, task = task.name(), "task failed, aborting the run");
                    return Err(error.context(format!("{} failed on {lemma}", task.name())));
                }
                Err(error) if is_transient(&error) => {
                    tracing::warn!(
                        lemma,
                        task = task.name(),
                        error = %format!("{error:#}"),
                        "skipping page"
                    );
                    return Ok(PageOutcome::Skipped);
                }
                Err(error) => {
                    errors.record(lemma, format!("{}: {error:#}", task.name()));
                    failed_tasks.push(task.name());
                }
            }
        }

        let mut marked = false;
        if let Some(category) = &self.options.error_category {
            let before = document.content_hash();
            if failed_tasks.is_empty() {
                document.remove_error_category(category);
            } else {
                document.add_error_category(category, Some(&failed_tasks.join(",")));
            }
            marked = document.content_hash() != before;
        }

        if (changed_tasks.is_empty() && !marked) || !document.has_changed() {
            return Ok(PageOutcome::Unchanged);
        }
        let summary = if changed_tasks.is_empty() {
            format!("{SUMMARY_PREFIX}: error category")
        } else {
            format!("{SUMMARY_PREFIX}: {}", changed_tasks.join(", "))
        };
        if self.options.dry_run {
            tracing::info!(lemma, summary = %summary, "would save");
            return Ok(PageOutcome::Saved);
        }
        match self.store.save_page(&page, &document.to_text(), &summary) {
            Ok(()) => {
                tracing::info!(lemma, tasks = %changed_tasks.join(","), "saved");
                Ok(PageOutcome::Saved)
            }
            Err(error) => io_outcome(lemma, "save", error, errors),
        }
    }
}

/// Authentication failures abort the run. Transient failures and edit
/// conflicts skip the page for a later run. Anything else is recorded.
fn io_outcome(
    lemma: &str,
    step: &str,
    error: anyhow::Error,
    errors: &mut ErrorReport,
) -> Result<PageOutcome> {
    if is_auth_failure(&error) {
        return Err(error);
    }
    let retry_later = matches!(
        io_failure(&error),
        Some(IoFailure::Transient { .. } | IoFailure::EditConflict(_))
    );
    if retry_later {
        tracing::warn!(lemma, step, error = %format!("{error:#}"), "skipping page");
        return Ok(PageOutcome::Skipped);
    }
    errors.record(lemma, format!("{step} failed: {error:#}"));
    Ok(PageOutcome::Failed)
}
