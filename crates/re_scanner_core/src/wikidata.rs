use std::collections::BTreeMap;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};

use crate::claims::factories::ObservedClaims;
use crate::claims::{ChangeSet, Claim};
use crate::config::ScannerConfig;
use crate::http::ApiClient;

pub const LABEL_LANGUAGE: &str = "de";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entity {
    pub id: String,
    pub claims: BTreeMap<String, Vec<Claim>>,
    pub sitelinks: BTreeMap<String, String>,
}

impl Entity {
    /// Decode one entity of a `wbgetentities` response. `None` for the
    /// placeholder returned for a missing sitelink.
    pub fn from_json(value: &Value) -> Option<Self> {
        if value.get("missing").is_some() {
            return None;
        }
        let id = value.get("id").and_then(Value::as_str)?.to_string();

        let mut claims: BTreeMap<String, Vec<Claim>> = BTreeMap::new();
        if let Some(grouped) = value.get("claims").and_then(Value::as_object) {
            for (property_id, statements) in grouped {
                for statement in statements.as_array().into_iter().flatten() {
                    match Claim::from_json(statement) {
                        Ok(claim) => claims.entry(property_id.clone()).or_default().push(claim),
                        Err(error) => {
                            tracing::debug!(entity = %id, property_id, %error, "skipping statement")
                        }
                    }
                }
            }
        }

        let sitelinks = value
            .get("sitelinks")
            .and_then(Value::as_object)
            .map(|links| {
                links
                    .iter()
                    .filter_map(|(site, link)| {
                        let title = link.get("title").and_then(Value::as_str)?;
                        Some((site.clone(), title.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            id,
            claims,
            sitelinks,
        })
    }
}

impl ObservedClaims for Entity {
    fn claims_for(&self, property_id: &str) -> Vec<Claim> {
        self.claims.get(property_id).cloned().unwrap_or_default()
    }
}

pub trait EntityStore {
    /// The entity sitelinked to `title` on `site`, if any.
    fn get_entity(&mut self, site: &str, title: &str) -> Result<Option<Entity>>;
    /// Create an item with a label, a sitelink and initial claims; returns its id.
    fn create_entity(
        &mut self,
        site: &str,
        title: &str,
        label: &str,
        claims: &[Claim],
    ) -> Result<String>;
    fn edit_entity(&mut self, entity_id: &str, claims: &[Claim], summary: &str) -> Result<()>;
    fn remove_claims(&mut self, claim_ids: &[String], summary: &str) -> Result<()>;
}

/// Write a change set to an entity: additions in one edit, then removals.
/// Returns the number of claims written or removed.
pub fn apply_changes(
    store: &mut dyn EntityStore,
    entity_id: &str,
    changes: &ChangeSet,
    summary: &str,
) -> Result<usize> {
    let additions = changes.claims_to_add().cloned().collect::<Vec<_>>();
    if !additions.is_empty() {
        store.edit_entity(entity_id, &additions, summary)?;
    }

    let mut removals = Vec::new();
    for claim in &changes.remove {
        match &claim.id {
            Some(id) => removals.push(id.clone()),
            None => tracing::warn!(
                entity = entity_id,
                property_id = claim.property_id(),
                "cannot remove claim without statement id"
            ),
        }
    }
    if !removals.is_empty() {
        store.remove_claims(&removals, summary)?;
    }
    Ok(additions.len() + removals.len())
}

pub struct WikidataClient {
    api: ApiClient,
}

impl WikidataClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub fn from_config(config: &ScannerConfig) -> Result<Self> {
        let api = ApiClient::new(&config.wikidata_api_url(), config.http_settings())?;
        Ok(Self::new(api))
    }

    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        self.api.login(username, password)
    }

    fn edit(&mut self, params: Vec<(&str, String)>) -> Result<Value> {
        let token = self.api.csrf_token()?;
        let mut params = params;
        params.push(("bot", "1".to_string()));
        params.push(("token", token));
        self.api.post_json(&params, true)
    }
}

impl EntityStore for WikidataClient {
    fn get_entity(&mut self, site: &str, title: &str) -> Result<Option<Entity>> {
        let response = self
            .api
            .get_json(&[
                ("action", "wbgetentities".to_string()),
                ("sites", site.to_string()),
                ("titles", title.to_string()),
                ("props", "claims|sitelinks".to_string()),
            ])
            .with_context(|| format!("failed to load entity for {site}:{title}"))?;
        let entities = response
            .get("entities")
            .and_then(Value::as_object)
            .ok_or_else(|| anyhow!("missing entities in wbgetentities response"))?;
        Ok(entities.values().find_map(Entity::from_json))
    }

    fn create_entity(
        &mut self,
        site: &str,
        title: &str,
        label: &str,
        claims: &[Claim],
    ) -> Result<String> {
        let data = json!({
            "labels": {LABEL_LANGUAGE: {"language": LABEL_LANGUAGE, "value": label}},
            "sitelinks": {site: {"site": site, "title": title}},
            "claims": claims.iter().map(Claim::to_json).collect::<Vec<_>>(),
        });
        let response = self
            .edit(vec![
                ("action", "wbeditentity".to_string()),
                ("new", "item".to_string()),
                ("data", data.to_string()),
                ("summary", format!("create item for {title}")),
            ])
            .with_context(|| format!("failed to create entity for {title}"))?;
        response
            .get("entity")
            .and_then(|entity| entity.get("id"))
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| anyhow!("wbeditentity returned no entity id for {title}"))
    }

    fn edit_entity(&mut self, entity_id: &str, claims: &[Claim], summary: &str) -> Result<()> {
        let data = json!({ "claims": claims.iter().map(Claim::to_json).collect::<Vec<_>>() });
        self.edit(vec![
            ("action", "wbeditentity".to_string()),
            ("id", entity_id.to_string()),
            ("data", data.to_string()),
            ("summary", summary.to_string()),
        ])
        .with_context(|| format!("failed to edit {entity_id}"))?;
        Ok(())
    }

    fn remove_claims(&mut self, claim_ids: &[String], summary: &str) -> Result<()> {
        self.edit(vec![
            ("action", "wbremoveclaims".to_string()),
            ("claim", claim_ids.join("|")),
            ("summary", summary.to_string()),
        ])
        .context("failed to remove claims")?;
        Ok(())
    }
}
