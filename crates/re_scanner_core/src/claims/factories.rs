use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::article::{Article, Field};
use crate::claims::{
    ChangeSet, Claim, Identity, ReconcilePolicy, Removal, Snak, create_claim, reconcile_with,
};
use crate::document::{Document, LEMMA_PREFIX};
use crate::error::{ClaimError, FactoryError};
use crate::tables::{AuthorRecord, ReferenceTables};
use crate::template_finder;
use crate::template_handler::TemplateHandler;

pub const IMPORTED_FROM: &str = "P143";
pub const GERMAN_WIKISOURCE: &str = "Q15522295";

pub const ENCYCLOPEDIC_ARTICLE: &str = "Q13433827";
pub const CROSS_REFERENCE: &str = "Q1302249";
pub const REALENCYCLOPAEDIE: &str = "Q1138524";
pub const GERMAN: &str = "Q188";

pub const PUBLIC_DOMAIN: &str = "Q19652";
pub const COPYRIGHTED: &str = "Q50423863";
pub const THRESHOLD_OF_ORIGINALITY: &str = "Q707401";
pub const YEARS_AFTER_DEATH: &str = "Q29940705";
pub const PUBLISHED_MORE_THAN_95_YEARS_AGO: &str = "Q47246828";
pub const UNITED_STATES: &str = "Q30";
pub const JURISDICTION: &str = "P1001";
pub const DETERMINATION_METHOD: &str = "P459";
pub const VOLUME: &str = "P478";

/// Countries whose term ends `years` after the author's death.
const PMA_TIERS: [(i32, &str); 4] = [
    (100, "Q60332278"),
    (80, "Q61830521"),
    (70, "Q59542795"),
    (50, "Q59621182"),
];
const US_TERM_YEARS: i32 = 95;

/// Source of the claims currently stored on an entity.
pub trait ObservedClaims {
    fn claims_for(&self, property_id: &str) -> Vec<Claim>;
}

impl ObservedClaims for Vec<Claim> {
    fn claims_for(&self, property_id: &str) -> Vec<Claim> {
        self.iter()
            .filter(|claim| claim.property_id() == property_id)
            .cloned()
            .collect()
    }
}

impl ObservedClaims for BTreeMap<String, Vec<Claim>> {
    fn claims_for(&self, property_id: &str) -> Vec<Claim> {
        self.get(property_id).cloned().unwrap_or_default()
    }
}

pub trait ClaimFactory {
    fn property_id(&self) -> &str;

    /// Claims this property should carry, derived only from the document and
    /// the injected reference data.
    fn desired_claims(&self, document: &Document) -> Result<Vec<Claim>, FactoryError>;

    fn policy(&self) -> ReconcilePolicy {
        ReconcilePolicy::default()
    }

    fn get_claims_to_update(
        &self,
        document: &Document,
        observed: &dyn ObservedClaims,
    ) -> Result<ChangeSet, FactoryError> {
        let desired = self.desired_claims(document)?;
        let observed = observed.claims_for(self.property_id());
        Ok(reconcile_with(&desired, &observed, &self.policy()))
    }
}

/// Every factory, in the order their statements are written. Cross-reference
/// statements are only written once their property id is configured.
pub fn all_factories(
    tables: Arc<ReferenceTables>,
    current_year: i32,
    directs_readers_to: Option<&str>,
) -> Vec<Box<dyn ClaimFactory>> {
    let mut factories: Vec<Box<dyn ClaimFactory>> = vec![
        Box::new(InstanceOf),
        Box::new(PartOf),
        Box::new(LanguageOfWork),
        Box::new(Title),
        Box::new(AuthorItems::new(Arc::clone(&tables))),
        Box::new(AuthorNames::new(Arc::clone(&tables))),
        Box::new(PublishedIn::new(Arc::clone(&tables))),
        Box::new(PublicationDate::new(Arc::clone(&tables))),
        Box::new(Column),
        Box::new(Neighbour::follows(Arc::clone(&tables))),
        Box::new(Neighbour::followed_by(Arc::clone(&tables))),
        Box::new(MainSubject::new(Arc::clone(&tables))),
        Box::new(CopyrightStatus::new(Arc::clone(&tables), current_year)),
        Box::new(DescribedBySource),
    ];
    if let Some(property_id) = directs_readers_to {
        factories.push(Box::new(DirectsReadersTo::new(property_id, tables)));
    }
    factories
}

/// Run every factory and merge their change sets.
pub fn collect_changes(
    factories: &[Box<dyn ClaimFactory>],
    document: &Document,
    observed: &dyn ObservedClaims,
) -> Result<ChangeSet, FactoryError> {
    let mut changes = ChangeSet::default();
    for factory in factories {
        changes.merge(factory.get_claims_to_update(document, observed)?);
    }
    Ok(changes)
}

fn reference() -> Result<Vec<Vec<Snak>>, ClaimError> {
    Ok(vec![vec![Snak::new(
        IMPORTED_FROM,
        "wikibase-item",
        GERMAN_WIKISOURCE,
    )?]])
}

fn sourced(
    property_id: &str,
    value_type: &str,
    target: &str,
    qualifiers: Vec<Snak>,
) -> Result<Claim, ClaimError> {
    create_claim(property_id, value_type, target, qualifiers, reference()?)
}

fn item_claim(property_id: &str, target: &str) -> Result<Claim, ClaimError> {
    sourced(property_id, "wikibase-item", target, Vec::new())
}

/// `(short name, volume)` of every article author, deduplicated. Articles
/// without an issue on their author marker belong to the page's volume.
fn contributing_authors(document: &Document) -> Result<Vec<(String, String)>, FactoryError> {
    let band = document.first_article()?.text(Field::Band).to_string();
    let mut seen = BTreeSet::new();
    let mut authors = Vec::new();
    for article in document.articles() {
        let author = article.author();
        let volume = if author.issue.is_empty() {
            band.clone()
        } else {
            author.issue.clone()
        };
        let key = (author.name.clone(), volume);
        if seen.insert(key.clone()) {
            authors.push(key);
        }
    }
    Ok(authors)
}

fn resolved_authors<'a>(
    tables: &'a ReferenceTables,
    document: &Document,
) -> Result<Vec<(String, Option<&'a AuthorRecord>)>, FactoryError> {
    Ok(contributing_authors(document)?
        .into_iter()
        .map(|(name, volume)| {
            let record = tables.authors.resolve(&name, &volume);
            (name, record)
        })
        .collect())
}

fn first(document: &Document) -> Result<&Article, FactoryError> {
    Ok(document.first_article()?)
}

fn push_unique(claims: &mut Vec<Claim>, claim: Claim) {
    if !claims.iter().any(|existing| existing.same_as(&claim)) {
        claims.push(claim);
    }
}

/// P31: encyclopedic article, or cross-reference for `VERWEIS` articles.
pub struct InstanceOf;

impl InstanceOf {
    pub const PROPERTY_ID: &'static str = "P31";
}

impl ClaimFactory for InstanceOf {
    fn property_id(&self) -> &'static str {
        Self::PROPERTY_ID
    }

    fn desired_claims(&self, document: &Document) -> Result<Vec<Claim>, FactoryError> {
        let target = if first(document)?.flag(Field::Verweis) {
            CROSS_REFERENCE
        } else {
            ENCYCLOPEDIC_ARTICLE
        };
        Ok(vec![item_claim(Self::PROPERTY_ID, target)?])
    }
}

/// P361
pub struct PartOf;

impl PartOf {
    pub const PROPERTY_ID: &'static str = "P361";
}

impl ClaimFactory for PartOf {
    fn property_id(&self) -> &'static str {
        Self::PROPERTY_ID
    }

    fn desired_claims(&self, _document: &Document) -> Result<Vec<Claim>, FactoryError> {
        Ok(vec![item_claim(Self::PROPERTY_ID, REALENCYCLOPAEDIE)?])
    }
}

/// P407: always German.
pub struct LanguageOfWork;

impl LanguageOfWork {
    pub const PROPERTY_ID: &'static str = "P407";
}

impl ClaimFactory for LanguageOfWork {
    fn property_id(&self) -> &'static str {
        Self::PROPERTY_ID
    }

    fn desired_claims(&self, _document: &Document) -> Result<Vec<Claim>, FactoryError> {
        Ok(vec![item_claim(Self::PROPERTY_ID, GERMAN)?])
    }
}

/// P1476: the lemma without its `RE:` prefix.
pub struct Title;

impl Title {
    pub const PROPERTY_ID: &'static str = "P1476";
}

impl ClaimFactory for Title {
    fn property_id(&self) -> &'static str {
        Self::PROPERTY_ID
    }

    fn desired_claims(&self, document: &Document) -> Result<Vec<Claim>, FactoryError> {
        Ok(vec![sourced(
            Self::PROPERTY_ID,
            "monolingualtext",
            document.lemma_without_prefix(),
            Vec::new(),
        )?])
    }
}

/// P50: authors known as items.
pub struct AuthorItems {
    tables: Arc<ReferenceTables>,
}

impl AuthorItems {
    pub const PROPERTY_ID: &'static str = "P50";

    pub fn new(tables: Arc<ReferenceTables>) -> Self {
        Self { tables }
    }
}

impl ClaimFactory for AuthorItems {
    fn property_id(&self) -> &'static str {
        Self::PROPERTY_ID
    }

    fn desired_claims(&self, document: &Document) -> Result<Vec<Claim>, FactoryError> {
        let mut claims = Vec::new();
        for (_, record) in resolved_authors(&self.tables, document)? {
            if let Some(item) = record.and_then(|record| record.item.as_deref()) {
                push_unique(&mut claims, item_claim(Self::PROPERTY_ID, item)?);
            }
        }
        Ok(claims)
    }
}

/// P2093: authors without an item, as plain name strings.
pub struct AuthorNames {
    tables: Arc<ReferenceTables>,
}

impl AuthorNames {
    pub const PROPERTY_ID: &'static str = "P2093";

    pub fn new(tables: Arc<ReferenceTables>) -> Self {
        Self { tables }
    }
}

impl ClaimFactory for AuthorNames {
    fn property_id(&self) -> &'static str {
        Self::PROPERTY_ID
    }

    fn desired_claims(&self, document: &Document) -> Result<Vec<Claim>, FactoryError> {
        let mut claims = Vec::new();
        for (short_name, record) in resolved_authors(&self.tables, document)? {
            let name = match record {
                Some(record) if record.item.is_some() => continue,
                Some(record) => record.name.as_str(),
                None => short_name.as_str(),
            };
            push_unique(
                &mut claims,
                sourced(Self::PROPERTY_ID, "string", name, Vec::new())?,
            );
        }
        Ok(claims)
    }
}

/// P1433: the volume item.
pub struct PublishedIn {
    tables: Arc<ReferenceTables>,
}

impl PublishedIn {
    pub const PROPERTY_ID: &'static str = "P1433";

    pub fn new(tables: Arc<ReferenceTables>) -> Self {
        Self { tables }
    }
}

impl ClaimFactory for PublishedIn {
    fn property_id(&self) -> &'static str {
        Self::PROPERTY_ID
    }

    fn desired_claims(&self, document: &Document) -> Result<Vec<Claim>, FactoryError> {
        let band = first(document)?.text(Field::Band);
        match self.tables.volumes.get(band).and_then(|volume| volume.item.as_deref()) {
            Some(item) => Ok(vec![item_claim(Self::PROPERTY_ID, item)?]),
            None => Ok(Vec::new()),
        }
    }
}

/// P577: the year the volume appeared.
pub struct PublicationDate {
    tables: Arc<ReferenceTables>,
}

impl PublicationDate {
    pub const PROPERTY_ID: &'static str = "P577";

    pub fn new(tables: Arc<ReferenceTables>) -> Self {
        Self { tables }
    }
}

impl ClaimFactory for PublicationDate {
    fn property_id(&self) -> &'static str {
        Self::PROPERTY_ID
    }

    fn desired_claims(&self, document: &Document) -> Result<Vec<Claim>, FactoryError> {
        let band = first(document)?.text(Field::Band);
        match self.tables.volumes.get(band) {
            Some(volume) => Ok(vec![sourced(
                Self::PROPERTY_ID,
                "time",
                &volume.year.to_string(),
                Vec::new(),
            )?]),
            None => Ok(Vec::new()),
        }
    }
}

/// P3903: `start` or `start–end` columns.
pub struct Column;

impl Column {
    pub const PROPERTY_ID: &'static str = "P3903";
}

impl ClaimFactory for Column {
    fn property_id(&self) -> &'static str {
        Self::PROPERTY_ID
    }

    fn desired_claims(&self, document: &Document) -> Result<Vec<Claim>, FactoryError> {
        let article = first(document)?;
        let start = article.text(Field::SpalteStart);
        let end = article.text(Field::SpalteEnd);
        if start.is_empty() {
            return Ok(Vec::new());
        }
        let columns = if end.is_empty() || end == start || end == "OFF" {
            start.to_string()
        } else {
            format!("{start}–{end}")
        };
        Ok(vec![sourced(Self::PROPERTY_ID, "string", &columns, Vec::new())?])
    }
}

/// P155 / P156: the item of the previous or next lemma.
pub struct Neighbour {
    property_id: &'static str,
    field: Field,
    tables: Arc<ReferenceTables>,
}

impl Neighbour {
    pub const FOLLOWS: &'static str = "P155";
    pub const FOLLOWED_BY: &'static str = "P156";

    pub fn follows(tables: Arc<ReferenceTables>) -> Self {
        Self {
            property_id: Self::FOLLOWS,
            field: Field::Vorgaenger,
            tables,
        }
    }

    pub fn followed_by(tables: Arc<ReferenceTables>) -> Self {
        Self {
            property_id: Self::FOLLOWED_BY,
            field: Field::Nachfolger,
            tables,
        }
    }
}

impl ClaimFactory for Neighbour {
    fn property_id(&self) -> &'static str {
        self.property_id
    }

    fn desired_claims(&self, document: &Document) -> Result<Vec<Claim>, FactoryError> {
        let lemma = first(document)?.text(self.field);
        if lemma.is_empty() {
            return Ok(Vec::new());
        }
        match self.tables.lemma_items.lemma(&format!("{LEMMA_PREFIX}{lemma}")) {
            Some(item) => Ok(vec![item_claim(self.property_id, item)?]),
            None => Ok(Vec::new()),
        }
    }
}

/// P921: the item behind the linked Wikipedia article.
pub struct MainSubject {
    tables: Arc<ReferenceTables>,
}

impl MainSubject {
    pub const PROPERTY_ID: &'static str = "P921";

    pub fn new(tables: Arc<ReferenceTables>) -> Self {
        Self { tables }
    }
}

impl ClaimFactory for MainSubject {
    fn property_id(&self) -> &'static str {
        Self::PROPERTY_ID
    }

    fn desired_claims(&self, document: &Document) -> Result<Vec<Claim>, FactoryError> {
        let title = first(document)?.text(Field::Wikipedia);
        if title.is_empty() {
            return Ok(Vec::new());
        }
        match self.tables.lemma_items.wikipedia(title) {
            Some(item) => Ok(vec![item_claim(Self::PROPERTY_ID, item)?]),
            None => Ok(Vec::new()),
        }
    }
}

/// P6216: copyright status by jurisdiction tier.
///
/// These 50/70/80/100 year tiers are separate from the 70/170 rule of
/// [`Article::common_free`]; the two are not derived from each other.
/// Statements are compared including their qualifiers. When no author has a
/// known death year and the threshold override is off, stored statements are
/// left untouched.
pub struct CopyrightStatus {
    tables: Arc<ReferenceTables>,
    current_year: i32,
}

impl CopyrightStatus {
    pub const PROPERTY_ID: &'static str = "P6216";

    pub fn new(tables: Arc<ReferenceTables>, current_year: i32) -> Self {
        Self {
            tables,
            current_year,
        }
    }

    fn public_domain(&self, qualifiers: Vec<Snak>) -> Result<Claim, ClaimError> {
        sourced(Self::PROPERTY_ID, "wikibase-item", PUBLIC_DOMAIN, qualifiers)
    }

    fn latest_death(&self, document: &Document) -> Result<Option<i32>, FactoryError> {
        Ok(resolved_authors(&self.tables, document)?
            .into_iter()
            .filter_map(|(_, record)| record.and_then(|record| record.death))
            .max())
    }
}

impl ClaimFactory for CopyrightStatus {
    fn property_id(&self) -> &'static str {
        Self::PROPERTY_ID
    }

    fn desired_claims(&self, document: &Document) -> Result<Vec<Claim>, FactoryError> {
        let article = first(document)?;
        if article.flag(Field::KeineSchoepfungshoehe) {
            return Ok(vec![self.public_domain(vec![Snak::new(
                DETERMINATION_METHOD,
                "wikibase-item",
                THRESHOLD_OF_ORIGINALITY,
            )?])?]);
        }
        let Some(death) = self.latest_death(document)? else {
            return Ok(Vec::new());
        };

        let years = self.current_year - death;
        let mut claims = Vec::new();
        for (term, jurisdiction) in PMA_TIERS {
            if years > term {
                claims.push(self.public_domain(vec![
                    Snak::new(JURISDICTION, "wikibase-item", jurisdiction)?,
                    Snak::new(DETERMINATION_METHOD, "wikibase-item", YEARS_AFTER_DEATH)?,
                ])?);
            }
        }
        if claims.is_empty() {
            return Ok(vec![item_claim(Self::PROPERTY_ID, COPYRIGHTED)?]);
        }

        let published = self
            .tables
            .volumes
            .get(article.text(Field::Band))
            .map(|volume| volume.year);
        if published.is_some_and(|year| self.current_year - year > US_TERM_YEARS) {
            claims.push(self.public_domain(vec![
                Snak::new(JURISDICTION, "wikibase-item", UNITED_STATES)?,
                Snak::new(
                    DETERMINATION_METHOD,
                    "wikibase-item",
                    PUBLISHED_MORE_THAN_95_YEARS_AGO,
                )?,
            ])?);
        }
        Ok(claims)
    }

    fn policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            identity: Identity::Qualified,
            removal: Removal::All,
        }
    }

    fn get_claims_to_update(
        &self,
        document: &Document,
        observed: &dyn ObservedClaims,
    ) -> Result<ChangeSet, FactoryError> {
        let desired = self.desired_claims(document)?;
        if desired.is_empty() {
            return Ok(ChangeSet::default());
        }
        let observed = observed.claims_for(Self::PROPERTY_ID);
        Ok(reconcile_with(&desired, &observed, &self.policy()))
    }
}

/// P1343: "described by source" pointing at the encyclopedia itself, with
/// the volume as qualifier.
///
/// Claims are matched by target item only. Only stored claims that cite the
/// encyclopedia are ever removed; claims citing any other source are kept.
pub struct DescribedBySource;

impl DescribedBySource {
    pub const PROPERTY_ID: &'static str = "P1343";
}

impl ClaimFactory for DescribedBySource {
    fn property_id(&self) -> &'static str {
        Self::PROPERTY_ID
    }

    fn desired_claims(&self, document: &Document) -> Result<Vec<Claim>, FactoryError> {
        let band = first(document)?.text(Field::Band);
        let qualifiers = if band.is_empty() {
            Vec::new()
        } else {
            vec![Snak::new(VOLUME, "string", band)?]
        };
        Ok(vec![sourced(
            Self::PROPERTY_ID,
            "wikibase-item",
            REALENCYCLOPAEDIE,
            qualifiers,
        )?])
    }

    fn policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            identity: Identity::Target,
            removal: Removal::Scoped(BTreeSet::from([REALENCYCLOPAEDIE.to_string()])),
        }
    }
}

/// Cross-reference articles point readers to the lemmas named in their
/// `{{RE siehe|...}}` links.
///
/// Claims are matched by target item only. Only stored claims whose target is
/// the item of a known lemma are ever removed; claims pointing at any other
/// item are kept.
pub struct DirectsReadersTo {
    property_id: String,
    tables: Arc<ReferenceTables>,
}

impl DirectsReadersTo {
    pub const LINK_TEMPLATE: &'static str = "RE siehe";

    pub fn new(property_id: impl Into<String>, tables: Arc<ReferenceTables>) -> Self {
        Self {
            property_id: property_id.into(),
            tables,
        }
    }

    fn linked_lemmas(document: &Document) -> Vec<String> {
        let mut lemmas = Vec::new();
        for article in document.articles() {
            let Ok(spans) = template_finder::find(article.free_text(), Self::LINK_TEMPLATE) else {
                continue;
            };
            for span in spans {
                let Ok(link) = TemplateHandler::from_text(&span.raw_text) else {
                    continue;
                };
                if let Some(target) = link.positional(0).filter(|target| !target.is_empty()) {
                    lemmas.push(format!("{LEMMA_PREFIX}{target}"));
                }
            }
        }
        lemmas
    }
}

impl ClaimFactory for DirectsReadersTo {
    fn property_id(&self) -> &str {
        &self.property_id
    }

    fn desired_claims(&self, document: &Document) -> Result<Vec<Claim>, FactoryError> {
        if !first(document)?.flag(Field::Verweis) {
            return Ok(Vec::new());
        }
        let mut claims = Vec::new();
        for lemma in Self::linked_lemmas(document) {
            if let Some(item) = self.tables.lemma_items.lemma(&lemma) {
                push_unique(&mut claims, item_claim(&self.property_id, item)?);
            }
        }
        Ok(claims)
    }

    fn policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            identity: Identity::Target,
            removal: Removal::Scoped(
                self.tables
                    .lemma_items
                    .lemma_item_ids()
                    .map(ToString::to_string)
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::{
        AuthorItems, AuthorNames, ClaimFactory, CopyrightStatus, DescribedBySource,
        Column, DirectsReadersTo, InstanceOf, LanguageOfWork, Neighbour, PublicationDate,
        PublishedIn, Title, all_factories, collect_changes,
    };
    use crate::claims::{Claim, create_claim};
    use crate::document::Document;
    use crate::error::{DocumentError, FactoryError};
    use crate::tables::{
        AuthorMapping, AuthorRecord, Authors, LemmaItems, ReferenceTables, Volume, Volumes,
    };

    fn reference_tables() -> Arc<ReferenceTables> {
        let authors = Authors::new(
            vec![
                AuthorRecord {
                    name: "Ludwig Abel".to_string(),
                    birth: None,
                    death: Some(1924),
                    item: Some("Q1".to_string()),
                },
                AuthorRecord {
                    name: "Max Neu".to_string(),
                    birth: Some(1900),
                    death: Some(1980),
                    item: None,
                },
            ],
            BTreeMap::from([
                ("Abel.".to_string(), AuthorMapping::Single("Ludwig Abel".to_string())),
                ("Neu.".to_string(), AuthorMapping::Single("Max Neu".to_string())),
            ]),
        );
        Arc::new(ReferenceTables {
            volumes: Volumes::new(vec![Volume {
                name: "I,1".to_string(),
                year: 1893,
                item: Some("Q26414644".to_string()),
            }]),
            authors,
            lemma_items: LemmaItems::new(
                BTreeMap::from([
                    ("RE:Aachen".to_string(), "Q20".to_string()),
                    ("RE:Aal".to_string(), "Q21".to_string()),
                    ("RE:Aale".to_string(), "Q22".to_string()),
                ]),
                BTreeMap::from([("Aal".to_string(), "Q30".to_string())]),
            ),
        })
    }

    fn page(properties: &str, free_text: &str, author: &str) -> Document {
        Document::from_text(
            "RE:Aalfang",
            &format!("{{{{REDaten{properties}}}}}\n{free_text}\n{{{{REAutor|{author}}}}}"),
        )
        .expect("parse")
    }

    const CROSS_REFERENCE: &str = "P8214";

    fn targets(claims: &[Claim]) -> Vec<&str> {
        claims.iter().map(Claim::target).collect()
    }

    fn item(property_id: &str, target: &str) -> Claim {
        create_claim(property_id, "wikibase-item", target, Vec::new(), Vec::new()).expect("claim")
    }

    #[test]
    fn every_claim_carries_the_import_reference() {
        let document = page("|BAND=I,1|SPALTE_START=1|SPALTE_END=4", "Text.", "Abel.");
        for factory in all_factories(reference_tables(), 2026, Some(CROSS_REFERENCE)) {
            for claim in factory.desired_claims(&document).expect("claims") {
                assert_eq!(claim.property_id(), factory.property_id());
                assert_eq!(claim.references.len(), 1);
                assert_eq!(claim.references[0][0].property_id, "P143");
                assert_eq!(claim.references[0][0].target, "Q15522295");
            }
        }
    }

    #[test]
    fn fixed_statements() {
        let plain = page("", "Text.", "Abel.");
        assert_eq!(targets(&InstanceOf.desired_claims(&plain).expect("p31")), ["Q13433827"]);
        assert_eq!(targets(&LanguageOfWork.desired_claims(&plain).expect("p407")), ["Q188"]);
        assert_eq!(targets(&Title.desired_claims(&plain).expect("p1476")), ["Aalfang"]);

        let verweis = page("|VERWEIS=ON", "Text.", "Abel.");
        assert_eq!(targets(&InstanceOf.desired_claims(&verweis).expect("p31")), ["Q1302249"]);
    }

    #[test]
    fn volume_and_columns() {
        let document = page("|BAND=I,1|SPALTE_START=12|SPALTE_END=14", "T.", "Abel.");
        let tables = reference_tables();
        assert_eq!(
            targets(
                &PublishedIn::new(Arc::clone(&tables))
                    .desired_claims(&document)
                    .expect("v")
            ),
            ["Q26414644"]
        );
        assert_eq!(
            targets(&PublicationDate::new(tables).desired_claims(&document).expect("d")),
            ["1893"]
        );
        let columns = Column.desired_claims(&document).expect("columns");
        assert_eq!(columns[0].property_id(), "P3903");
        assert_eq!(targets(&columns), ["12–14"]);

        let single = page("|SPALTE_START=12|SPALTE_END=12", "T.", "Abel.");
        assert_eq!(targets(&Column.desired_claims(&single).expect("columns")), ["12"]);
        let unknown = page("|BAND=XXX", "T.", "Abel.");
        let volume = PublishedIn::new(reference_tables())
            .desired_claims(&unknown)
            .expect("volume");
        assert!(volume.is_empty());
    }

    #[test]
    fn authors_split_by_item() {
        let page = format!(
            "{}\n{}\n{}",
            "{{REDaten|BAND=I,1}}\nA.\n{{REAutor|Abel.}}",
            "{{REAbschnitt}}\nB.\n{{REAutor|Neu.}}",
            "{{REAbschnitt}}\nC.\n{{REAutor|Fremd.}}"
        );
        let document = Document::from_text("RE:Aal", &page).expect("parse");
        let tables = reference_tables();
        assert_eq!(
            targets(&AuthorItems::new(Arc::clone(&tables)).desired_claims(&document).expect("a")),
            ["Q1"]
        );
        assert_eq!(
            targets(&AuthorNames::new(tables).desired_claims(&document).expect("n")),
            ["Max Neu", "Fremd."]
        );
    }

    #[test]
    fn neighbours_resolve_through_lemma_table() {
        let document = page("|VORGÄNGER=Aachen|NACHFOLGER=Unbekannt", "T.", "Abel.");
        let tables = reference_tables();
        let follows = Neighbour::follows(Arc::clone(&tables));
        assert_eq!(follows.property_id(), "P155");
        assert_eq!(targets(&follows.desired_claims(&document).expect("p155")), ["Q20"]);
        assert!(
            Neighbour::followed_by(tables)
                .desired_claims(&document)
                .expect("p156")
                .is_empty()
        );
    }

    #[test]
    fn copyright_tiers_follow_death_year() {
        let tables = reference_tables();
        let document = page("|BAND=I,1", "T.", "Abel.");

        // 2026 - 1924 = 102 years: every tier plus the US term.
        let claims = CopyrightStatus::new(Arc::clone(&tables), 2026)
            .desired_claims(&document)
            .expect("claims");
        assert_eq!(claims.len(), 5);
        assert!(claims.iter().all(|claim| claim.target() == "Q19652"));
        assert_eq!(claims[0].qualifiers[0].target, "Q60332278");
        assert_eq!(claims[4].qualifiers[0].target, "Q30");

        // 75 years: the 70 and 50 tiers only.
        let claims = CopyrightStatus::new(Arc::clone(&tables), 1999)
            .desired_claims(&document)
            .expect("claims");
        let jurisdictions = claims
            .iter()
            .map(|claim| claim.qualifiers[0].target.as_str())
            .collect::<Vec<_>>();
        assert_eq!(jurisdictions, ["Q59542795", "Q59621182", "Q30"]);

        let claims = CopyrightStatus::new(Arc::clone(&tables), 1950)
            .desired_claims(&document)
            .expect("claims");
        assert_eq!(targets(&claims), ["Q50423863"]);

        let override_flag = page("|KSCH=ON", "T.", "Neu.");
        let claims = CopyrightStatus::new(tables, 2000)
            .desired_claims(&override_flag)
            .expect("claims");
        assert_eq!(targets(&claims), ["Q19652"]);
        assert_eq!(claims[0].qualifiers[0].target, "Q707401");
    }

    #[test]
    fn unknown_death_year_leaves_copyright_untouched() {
        let document = page("", "T.", "Fremd.");
        let observed = vec![item("P6216", "Q50423863")];
        let changes = CopyrightStatus::new(reference_tables(), 2026)
            .get_claims_to_update(&document, &observed)
            .expect("changes");
        assert!(changes.is_empty());
    }

    #[test]
    fn described_by_source_never_removes_other_sources() {
        let document = page("|BAND=I,1", "T.", "Abel.");
        let mut stored_re = item("P1343", "Q1138524");
        stored_re.id = Some("Q5$re".to_string());
        let other_source = item("P1343", "Q867541");
        let observed = vec![stored_re, other_source];

        let changes = DescribedBySource
            .get_claims_to_update(&document, &observed)
            .expect("changes");
        assert!(changes.is_empty());

        let only_other = vec![item("P1343", "Q867541")];
        let changes = DescribedBySource
            .get_claims_to_update(&document, &only_other)
            .expect("changes");
        assert_eq!(changes.add_count(), 1);
        assert!(changes.remove.is_empty());
    }

    #[test]
    fn cross_references_are_scoped_to_known_lemmas() {
        let document = page(
            "|VERWEIS=ON",
            "s. {{RE siehe|Aal}} und {{RE siehe|Aale|die Aale}}",
            "Abel.",
        );
        let factory = DirectsReadersTo::new(CROSS_REFERENCE, reference_tables());
        assert_eq!(
            targets(&factory.desired_claims(&document).expect("claims")),
            ["Q21", "Q22"]
        );

        let observed = vec![
            item(CROSS_REFERENCE, "Q21"),
            item(CROSS_REFERENCE, "Q20"),
            item(CROSS_REFERENCE, "Q999"),
        ];
        let changes = factory
            .get_claims_to_update(&document, &observed)
            .expect("changes");
        assert_eq!(targets(&changes.add[CROSS_REFERENCE]), ["Q22"]);
        assert_eq!(targets(&changes.remove), ["Q20"]);
    }

    #[test]
    fn collected_changes_replace_stale_claims() {
        let document = page("|BAND=I,1", "T.", "Abel.");
        let observed = BTreeMap::from([("P31".to_string(), vec![item("P31", "Q1234")])]);
        let factories = all_factories(reference_tables(), 2026, None);
        let changes = collect_changes(&factories, &document, &observed).expect("changes");
        assert_eq!(targets(&changes.add["P31"]), ["Q13433827"]);
        assert_eq!(targets(&changes.remove), ["Q1234"]);
        assert!(changes.add.contains_key("P577"));
    }

    #[test]
    fn cross_references_need_a_configured_property() {
        let tables = reference_tables();
        let unset = all_factories(Arc::clone(&tables), 2026, None);
        assert!(unset.iter().all(|factory| factory.property_id() != CROSS_REFERENCE));
        let set = all_factories(tables, 2026, Some(CROSS_REFERENCE));
        assert_eq!(set.len(), unset.len() + 1);
        assert_eq!(set.last().map(|factory| factory.property_id()), Some(CROSS_REFERENCE));
    }

    #[test]
    fn documents_without_articles_fail() {
        let empty = Document::from_text("RE:Leer", "nur Text").expect("parse");
        assert_eq!(
            InstanceOf.desired_claims(&empty),
            Err(FactoryError::Document(DocumentError::Empty))
        );
    }
}
