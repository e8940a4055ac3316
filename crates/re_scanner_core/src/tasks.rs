use std::sync::Arc;

use anyhow::{Context, Result, bail};

use crate::article::{Field, parse_year};
use crate::claims::factories::{ClaimFactory, collect_changes};
use crate::claims::Claim;
use crate::document::Document;
use crate::tables::ReferenceTables;
use crate::wikidata::{EntityStore, apply_changes};

pub const DATA: &str = "DATA";
pub const AUTH: &str = "AUTH";
pub const ALL_TASKS: [&str; 2] = [AUTH, DATA];

pub trait Task {
    /// Four-letter code used in edit summaries and config.
    fn name(&self) -> &'static str;
    fn process(&mut self, document: &mut Document) -> Result<()>;
}

/// Reconciles the page's claims with its entity, creating and sitelinking
/// the entity when none exists.
pub struct DataTask<'a> {
    store: &'a mut dyn EntityStore,
    factories: Vec<Box<dyn ClaimFactory>>,
    site: String,
    dry_run: bool,
}

impl<'a> DataTask<'a> {
    pub fn new(
        store: &'a mut dyn EntityStore,
        factories: Vec<Box<dyn ClaimFactory>>,
        site: &str,
        dry_run: bool,
    ) -> Self {
        Self {
            store,
            factories,
            site: site.to_string(),
            dry_run,
        }
    }

    fn desired_claims(&self, document: &Document) -> Result<Vec<Claim>> {
        let mut claims = Vec::new();
        for factory in &self.factories {
            claims.extend(
                factory
                    .desired_claims(document)
                    .with_context(|| format!("{} failed", factory.property_id()))?,
            );
        }
        Ok(claims)
    }
}

impl Task for DataTask<'_> {
    fn name(&self) -> &'static str {
        DATA
    }

    fn process(&mut self, document: &mut Document) -> Result<()> {
        let lemma = document.lemma().to_string();
        let Some(entity) = self.store.get_entity(&self.site, &lemma)? else {
            let claims = self.desired_claims(document)?;
            if self.dry_run {
                tracing::info!(lemma = %lemma, claims = claims.len(), "would create entity");
                return Ok(());
            }
            let id = self.store.create_entity(
                &self.site,
                &lemma,
                document.lemma_without_prefix(),
                &claims,
            )?;
            tracing::info!(lemma = %lemma, entity = %id, claims = claims.len(), "created entity");
            return Ok(());
        };

        let changes = collect_changes(&self.factories, document, &entity)?;
        tracing::debug!(
            lemma = %lemma,
            entity = %entity.id,
            add = changes.add_count(),
            remove = changes.remove.len(),
            "reconciled claims"
        );
        if changes.is_empty() || self.dry_run {
            return Ok(());
        }
        let summary = format!("update claims from {lemma}");
        let written = apply_changes(&mut *self.store, &entity.id, &changes, &summary)?;
        tracing::info!(lemma = %lemma, entity = %entity.id, written, "updated entity");
        Ok(())
    }
}

/// Fills empty death and birth years of the first article from the author
/// table.
pub struct AuthTask {
    tables: Arc<ReferenceTables>,
}

impl AuthTask {
    pub fn new(tables: Arc<ReferenceTables>) -> Self {
        Self { tables }
    }
}

impl Task for AuthTask {
    fn name(&self) -> &'static str {
        AUTH
    }

    fn process(&mut self, document: &mut Document) -> Result<()> {
        let article = document.first_article_mut()?;
        let volume = if article.author().issue.is_empty() {
            article.text(Field::Band).to_string()
        } else {
            article.author().issue.clone()
        };
        let Some(record) = self.tables.authors.resolve(&article.author().name, &volume) else {
            return Ok(());
        };

        let years = [(Field::Todesjahr, record.death), (Field::Geburtsjahr, record.birth)];
        for (field, year) in years {
            let Some(year) = year else { continue };
            let current = article.text(field);
            if current.is_empty() {
                article.get_mut(field).set_value(year.to_string())?;
            } else if parse_year(current).is_some_and(|existing| existing != year) {
                tracing::warn!(
                    field = field.key(),
                    page = current,
                    table = year,
                    "author year differs from table"
                );
            }
        }
        Ok(())
    }
}

/// Keep only the tasks named in `selected`; all when empty.
pub fn select_tasks<'a>(
    tasks: Vec<Box<dyn Task + 'a>>,
    selected: &[String],
) -> Result<Vec<Box<dyn Task + 'a>>> {
    if selected.is_empty() {
        return Ok(tasks);
    }
    for name in selected {
        if !ALL_TASKS.contains(&name.as_str()) {
            bail!("unknown task: {name}");
        }
    }
    Ok(tasks
        .into_iter()
        .filter(|task| selected.iter().any(|name| name == task.name()))
        .collect())
}
