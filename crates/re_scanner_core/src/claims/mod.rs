pub mod factories;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::{Map, Value, json};

use crate::error::ClaimError;

pub const GREGORIAN_CALENDAR: &str = "http://www.wikidata.org/entity/Q1985727";
/// Year precision in the Wikibase time model.
pub const TIME_PRECISION_YEAR: u8 = 9;
pub const MONOLINGUAL_LANGUAGE: &str = "mul";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueType {
    WikibaseItem,
    String,
    Time,
    MonolingualText,
}

impl ValueType {
    pub fn parse(value: &str) -> Result<Self, ClaimError> {
        match value {
            "wikibase-item" => Ok(Self::WikibaseItem),
            "string" => Ok(Self::String),
            "time" => Ok(Self::Time),
            "monolingualtext" => Ok(Self::MonolingualText),
            other => Err(ClaimError::UnsupportedValueType(other.to_string())),
        }
    }

    /// The `datatype` of a snak.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WikibaseItem => "wikibase-item",
            Self::String => "string",
            Self::Time => "time",
            Self::MonolingualText => "monolingualtext",
        }
    }

    /// The `datavalue.type` of a snak.
    fn wire_type(self) -> &'static str {
        match self {
            Self::WikibaseItem => "wikibase-entityid",
            Self::String => "string",
            Self::Time => "time",
            Self::MonolingualText => "monolingualtext",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed property/value assertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Snak {
    pub property_id: String,
    pub value_type: ValueType,
    pub target: String,
}

impl Snak {
    pub fn new(
        property_id: impl Into<String>,
        value_type: &str,
        target: impl Into<String>,
    ) -> Result<Self, ClaimError> {
        let value_type = ValueType::parse(value_type)?;
        let target = normalize_target(value_type, target.into())?;
        Ok(Self {
            property_id: property_id.into(),
            value_type,
            target,
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "snaktype": "value",
            "property": self.property_id,
            "datatype": self.value_type.as_str(),
            "datavalue": {
                "value": self.wire_value(),
                "type": self.value_type.wire_type(),
            },
        })
    }

    fn wire_value(&self) -> Value {
        match self.value_type {
            ValueType::WikibaseItem => json!({
                "entity-type": "item",
                "numeric-id": item_number(&self.target).unwrap_or_default(),
            }),
            ValueType::String => Value::String(self.target.clone()),
            ValueType::Time => {
                let year = self.target.parse::<i64>().unwrap_or_default();
                json!({
                    "time": format!("{year:+014}-01-01T00:00:00Z"),
                    "precision": TIME_PRECISION_YEAR,
                    "after": 0,
                    "before": 0,
                    "timezone": 0,
                    "calendarmodel": GREGORIAN_CALENDAR,
                })
            }
            ValueType::MonolingualText => json!({
                "text": self.target,
                "language": MONOLINGUAL_LANGUAGE,
            }),
        }
    }

    pub fn from_json(value: &Value) -> Result<Self, ClaimError> {
        let property_id = value
            .get("property")
            .and_then(Value::as_str)
            .ok_or_else(|| ClaimError::MalformedJson("snak without property".to_string()))?;
        let datatype = value
            .get("datatype")
            .and_then(Value::as_str)
            .ok_or_else(|| ClaimError::MalformedJson(format!("{property_id}: no datatype")))?;
        let value_type = ValueType::parse(datatype)?;
        let data = value
            .get("datavalue")
            .and_then(|datavalue| datavalue.get("value"))
            .ok_or_else(|| ClaimError::MalformedJson(format!("{property_id}: no datavalue")))?;

        let target = match value_type {
            ValueType::WikibaseItem => match data.get("id").and_then(Value::as_str) {
                Some(id) => id.to_string(),
                None => data
                    .get("numeric-id")
                    .and_then(Value::as_u64)
                    .map(|number| format!("Q{number}"))
                    .ok_or_else(|| {
                        ClaimError::MalformedJson(format!("{property_id}: no item id"))
                    })?,
            },
            ValueType::String => data
                .as_str()
                .ok_or_else(|| ClaimError::MalformedJson(format!("{property_id}: no string")))?
                .to_string(),
            ValueType::Time => {
                let time = data
                    .get("time")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ClaimError::MalformedJson(format!("{property_id}: no time")))?;
                year_from_timestamp(time)
                    .ok_or_else(|| ClaimError::InvalidTime(time.to_string()))?
                    .to_string()
            }
            ValueType::MonolingualText => data
                .get("text")
                .and_then(Value::as_str)
                .ok_or_else(|| ClaimError::MalformedJson(format!("{property_id}: no text")))?
                .to_string(),
        };

        Ok(Self {
            property_id: property_id.to_string(),
            value_type,
            target,
        })
    }
}

/// A statement: main snak plus qualifiers and reference groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Claim {
    pub mainsnak: Snak,
    pub qualifiers: Vec<Snak>,
    pub references: Vec<Vec<Snak>>,
    /// Statement GUID assigned by the store; absent for claims not yet saved.
    pub id: Option<String>,
}

impl Claim {
    pub fn property_id(&self) -> &str {
        &self.mainsnak.property_id
    }

    pub fn value_type(&self) -> ValueType {
        self.mainsnak.value_type
    }

    pub fn target(&self) -> &str {
        &self.mainsnak.target
    }

    /// Identity used by reconciliation: property, value type and target.
    /// Qualifiers and references are ignored.
    pub fn same_as(&self, other: &Claim) -> bool {
        self.mainsnak == other.mainsnak
    }

    pub fn to_json(&self) -> Value {
        let mut claim = Map::new();
        claim.insert("mainsnak".to_string(), self.mainsnak.to_json());
        claim.insert("type".to_string(), json!("statement"));
        claim.insert("rank".to_string(), json!("normal"));
        if let Some(id) = &self.id {
            claim.insert("id".to_string(), json!(id));
        }
        if !self.qualifiers.is_empty() {
            let (snaks, order) = group_snaks(&self.qualifiers);
            claim.insert("qualifiers".to_string(), snaks);
            claim.insert("qualifiers-order".to_string(), order);
        }
        if !self.references.is_empty() {
            let references = self
                .references
                .iter()
                .map(|group| {
                    let (snaks, order) = group_snaks(group);
                    json!({ "snaks": snaks, "snaks-order": order })
                })
                .collect::<Vec<_>>();
            claim.insert("references".to_string(), Value::Array(references));
        }
        Value::Object(claim)
    }

    /// Decode a stored statement. Qualifier and reference snaks the model
    /// cannot represent (no value, unsupported datatype) are skipped.
    pub fn from_json(value: &Value) -> Result<Self, ClaimError> {
        let mainsnak = value
            .get("mainsnak")
            .ok_or_else(|| ClaimError::MalformedJson("statement without mainsnak".to_string()))
            .and_then(Snak::from_json)?;
        let qualifiers = value
            .get("qualifiers")
            .map(ungroup_snaks)
            .unwrap_or_default();
        let references = value
            .get("references")
            .and_then(Value::as_array)
            .map(|groups| {
                groups
                    .iter()
                    .filter_map(|group| group.get("snaks"))
                    .map(ungroup_snaks)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            mainsnak,
            qualifiers,
            references,
            id: value.get("id").and_then(Value::as_str).map(ToString::to_string),
        })
    }
}

/// Build a claim, validating the value type and the target.
pub fn create_claim(
    property_id: &str,
    value_type: &str,
    target: &str,
    qualifiers: Vec<Snak>,
    references: Vec<Vec<Snak>>,
) -> Result<Claim, ClaimError> {
    Ok(Claim {
        mainsnak: Snak::new(property_id, value_type, target)?,
        qualifiers,
        references,
        id: None,
    })
}

/// Claims to add per property and stored claims to remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub add: BTreeMap<String, Vec<Claim>>,
    pub remove: Vec<Claim>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.add.values().all(Vec::is_empty) && self.remove.is_empty()
    }

    pub fn add_count(&self) -> usize {
        self.add.values().map(Vec::len).sum()
    }

    pub fn merge(&mut self, other: ChangeSet) {
        for (property_id, claims) in other.add {
            self.add.entry(property_id).or_default().extend(claims);
        }
        self.remove.extend(other.remove);
    }

    /// All claims to add, in property order.
    pub fn claims_to_add(&self) -> impl Iterator<Item = &Claim> {
        self.add.values().flatten()
    }
}

/// How two claims are considered the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    /// Property, value type and target.
    Full,
    /// Target only; used for item claims where the value type is implied.
    Target,
    /// Full identity plus an equal qualifier set, regardless of order.
    Qualified,
}

/// Which unmatched stored claims may be removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    All,
    /// Only claims whose target is one of these.
    Scoped(BTreeSet<String>),
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePolicy {
    pub identity: Identity,
    pub removal: Removal,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            identity: Identity::Full,
            removal: Removal::All,
        }
    }
}

impl ReconcilePolicy {
    fn matches(&self, desired: &Claim, observed: &Claim) -> bool {
        match self.identity {
            Identity::Full => desired.same_as(observed),
            Identity::Target => {
                desired.property_id() == observed.property_id()
                    && desired.target() == observed.target()
            }
            Identity::Qualified => {
                desired.same_as(observed)
                    && sorted_qualifiers(desired) == sorted_qualifiers(observed)
            }
        }
    }

    fn may_remove(&self, observed: &Claim) -> bool {
        match &self.removal {
            Removal::All => true,
            Removal::Scoped(targets) => targets.contains(observed.target()),
            Removal::Never => false,
        }
    }
}

/// Greedy first-match reconciliation with the default policy.
pub fn reconcile(desired: &[Claim], observed: &[Claim]) -> ChangeSet {
    reconcile_with(desired, observed, &ReconcilePolicy::default())
}

/// Each desired claim consumes the first still unconsumed observed claim it
/// matches; unmatched desired claims are added, unconsumed observed claims
/// are removed when the policy allows it. Output order follows input order.
pub fn reconcile_with(
    desired: &[Claim],
    observed: &[Claim],
    policy: &ReconcilePolicy,
) -> ChangeSet {
    let mut consumed = vec![false; observed.len()];
    let mut changes = ChangeSet::default();

    for claim in desired {
        let matched = observed
            .iter()
            .enumerate()
            .find(|(index, candidate)| !consumed[*index] && policy.matches(claim, candidate))
            .map(|(index, _)| index);
        match matched {
            Some(index) => consumed[index] = true,
            None => changes
                .add
                .entry(claim.property_id().to_string())
                .or_default()
                .push(claim.clone()),
        }
    }

    changes.remove = observed
        .iter()
        .zip(consumed)
        .filter(|(claim, consumed)| !consumed && policy.may_remove(claim))
        .map(|(claim, _)| claim.clone())
        .collect();
    changes
}

fn normalize_target(value_type: ValueType, target: String) -> Result<String, ClaimError> {
    match value_type {
        ValueType::Time => target
            .trim()
            .parse::<i64>()
            .map(|year| year.to_string())
            .map_err(|_| ClaimError::InvalidTime(target)),
        ValueType::WikibaseItem => {
            if item_number(&target).is_some() {
                Ok(target)
            } else {
                Err(ClaimError::InvalidItem(target))
            }
        }
        ValueType::String | ValueType::MonolingualText => Ok(target),
    }
}

fn sorted_qualifiers(claim: &Claim) -> Vec<&Snak> {
    let mut qualifiers = claim.qualifiers.iter().collect::<Vec<_>>();
    qualifiers.sort_by(|left, right| {
        (&left.property_id, &left.target).cmp(&(&right.property_id, &right.target))
    });
    qualifiers
}

fn item_number(target: &str) -> Option<u64> {
    target.strip_prefix('Q')?.parse::<u64>().ok()
}

/// `+00000001893-01-01T00:00:00Z` -> 1893
fn year_from_timestamp(time: &str) -> Option<i64> {
    let (sign, rest) = match time.as_bytes().first()? {
        b'+' => (1, &time[1..]),
        b'-' => (-1, &time[1..]),
        _ => (1, time),
    };
    let digits = rest.split('-').next()?;
    digits.parse::<i64>().ok().map(|year| sign * year)
}

fn group_snaks(snaks: &[Snak]) -> (Value, Value) {
    let mut grouped: Map<String, Value> = Map::new();
    let mut order = Vec::new();
    for snak in snaks {
        let entry = grouped
            .entry(snak.property_id.clone())
            .or_insert_with(|| {
                order.push(Value::String(snak.property_id.clone()));
                Value::Array(Vec::new())
            });
        if let Value::Array(items) = entry {
            items.push(snak.to_json());
        }
    }
    (Value::Object(grouped), Value::Array(order))
}

fn ungroup_snaks(value: &Value) -> Vec<Snak> {
    let Some(grouped) = value.as_object() else {
        return Vec::new();
    };
    grouped
        .values()
        .filter_map(Value::as_array)
        .flatten()
        .filter_map(|snak| Snak::from_json(snak).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::{
        ChangeSet, Claim, Identity, ReconcilePolicy, Removal, Snak, create_claim, reconcile,
        reconcile_with,
    };
    use crate::error::ClaimError;

    fn item(property_id: &str, target: &str) -> Claim {
        create_claim(property_id, "wikibase-item", target, Vec::new(), Vec::new())
            .expect("claim")
    }

    #[test]
    fn construction_validates_type_and_target() {
        assert_eq!(
            create_claim("P31", "bogus", "Q1", Vec::new(), Vec::new()),
            Err(ClaimError::UnsupportedValueType("bogus".to_string()))
        );
        assert_eq!(
            create_claim("P577", "time", "notayear", Vec::new(), Vec::new()),
            Err(ClaimError::InvalidTime("notayear".to_string()))
        );
        assert!(matches!(
            create_claim("P31", "wikibase-item", "Aal", Vec::new(), Vec::new()),
            Err(ClaimError::InvalidItem(_))
        ));
    }

    #[test]
    fn wire_shape_per_value_type() {
        assert_eq!(
            item("P31", "Q13433827").to_json(),
            json!({
                "mainsnak": {
                    "snaktype": "value",
                    "property": "P31",
                    "datatype": "wikibase-item",
                    "datavalue": {
                        "value": {"entity-type": "item", "numeric-id": 13433827},
                        "type": "wikibase-entityid"
                    }
                },
                "type": "statement",
                "rank": "normal"
            })
        );

        let time = create_claim("P577", "time", "1893", Vec::new(), Vec::new()).expect("time");
        assert_eq!(
            time.to_json()["mainsnak"]["datavalue"],
            json!({
                "value": {
                    "time": "+0000000001893-01-01T00:00:00Z",
                    "precision": 9,
                    "after": 0,
                    "before": 0,
                    "timezone": 0,
                    "calendarmodel": "http://www.wikidata.org/entity/Q1985727"
                },
                "type": "time"
            })
        );

        let text = create_claim("P1476", "monolingualtext", "Aal", Vec::new(), Vec::new())
            .expect("text");
        assert_eq!(
            text.to_json()["mainsnak"]["datavalue"],
            json!({"value": {"text": "Aal", "language": "mul"}, "type": "monolingualtext"})
        );

        let string = create_claim("P304", "string", "1–4", Vec::new(), Vec::new()).expect("s");
        assert_eq!(
            string.to_json()["mainsnak"]["datavalue"],
            json!({"value": "1–4", "type": "string"})
        );
    }

    #[test]
    fn qualifiers_and_references_are_grouped() {
        let claim = create_claim(
            "P6216",
            "wikibase-item",
            "Q19652",
            vec![
                Snak::new("P1001", "wikibase-item", "Q59542795").expect("snak"),
                Snak::new("P459", "wikibase-item", "Q29940705").expect("snak"),
            ],
            vec![vec![Snak::new("P143", "wikibase-item", "Q15522295").expect("snak")]],
        )
        .expect("claim");
        let wire = claim.to_json();
        assert_eq!(wire["qualifiers-order"], json!(["P1001", "P459"]));
        assert_eq!(wire["qualifiers"]["P1001"][0]["property"], json!("P1001"));
        assert_eq!(wire["references"][0]["snaks-order"], json!(["P143"]));

        let decoded = Claim::from_json(&wire).expect("decode");
        assert_eq!(decoded, claim);
    }

    #[test]
    fn decodes_stored_statements() {
        let stored = json!({
            "id": "Q1$abc",
            "mainsnak": {
                "snaktype": "value",
                "property": "P577",
                "datatype": "time",
                "datavalue": {"value": {"time": "+1893-01-01T00:00:00Z"}, "type": "time"}
            },
            "type": "statement",
            "rank": "normal"
        });
        let claim = Claim::from_json(&stored).expect("decode");
        assert_eq!(claim.target(), "1893");
        assert_eq!(claim.id.as_deref(), Some("Q1$abc"));

        let item = json!({"mainsnak": {"property": "P31", "datatype": "wikibase-item",
            "datavalue": {"value": {"entity-type": "item", "id": "Q5"}}}});
        assert_eq!(Claim::from_json(&item).expect("decode").target(), "Q5");

        let novalue = json!({"mainsnak": {"snaktype": "novalue", "property": "P31",
            "datatype": "wikibase-item"}});
        assert!(Claim::from_json(&novalue).is_err());
    }

    #[test]
    fn reconcile_base_cases() {
        let claim = item("P31", "Q13433827");
        assert_eq!(reconcile(&[], &[]), ChangeSet::default());

        let added = reconcile(std::slice::from_ref(&claim), &[]);
        assert_eq!(added.add.get("P31"), Some(&vec![claim.clone()]));
        assert!(added.remove.is_empty());

        let removed = reconcile(&[], std::slice::from_ref(&claim));
        assert!(removed.add.is_empty());
        assert_eq!(removed.remove, vec![claim.clone()]);

        assert!(reconcile(std::slice::from_ref(&claim), std::slice::from_ref(&claim)).is_empty());
    }

    #[test]
    fn reconcile_replaces_different_target() {
        let wanted = item("P31", "Q13433827");
        let stored = item("P31", "Q1234");
        let changes = reconcile(std::slice::from_ref(&wanted), std::slice::from_ref(&stored));
        assert_eq!(changes.add.len(), 1);
        assert_eq!(changes.add["P31"], vec![wanted]);
        assert_eq!(changes.remove, vec![stored]);
    }

    #[test]
    fn reconcile_ignores_qualifiers_and_matches_greedily() {
        let mut stored = item("P50", "Q1");
        stored.id = Some("Q9$1".to_string());
        stored.qualifiers = vec![Snak::new("P1545", "string", "1").expect("snak")];
        let wanted = item("P50", "Q1");

        let changes = reconcile(&[wanted.clone(), wanted.clone()], &[stored]);
        assert_eq!(changes.add["P50"], vec![wanted]);
        assert!(changes.remove.is_empty());
    }

    #[test]
    fn reconcile_is_deterministic() {
        let desired = vec![item("P50", "Q1"), item("P50", "Q2"), item("P50", "Q3")];
        let observed = vec![item("P50", "Q3"), item("P50", "Q4"), item("P50", "Q5")];
        let first = reconcile(&desired, &observed);
        assert_eq!(first, reconcile(&desired, &observed));
        assert_eq!(first.add["P50"], vec![item("P50", "Q1"), item("P50", "Q2")]);
        assert_eq!(first.remove, vec![item("P50", "Q4"), item("P50", "Q5")]);
    }

    #[test]
    fn scoped_and_add_only_policies_keep_foreign_claims() {
        let scoped = ReconcilePolicy {
            identity: Identity::Target,
            removal: Removal::Scoped(BTreeSet::from(["Q2".to_string()])),
        };
        let observed = vec![item("P1343", "Q2"), item("P1343", "Q99")];
        let changes = reconcile_with(&[item("P1343", "Q3")], &observed, &scoped);
        assert_eq!(changes.add["P1343"], vec![item("P1343", "Q3")]);
        assert_eq!(changes.remove, vec![item("P1343", "Q2")]);

        let qualified = ReconcilePolicy {
            identity: Identity::Qualified,
            removal: Removal::All,
        };
        let mut jurisdiction = item("P6216", "Q19652");
        jurisdiction.qualifiers =
            vec![Snak::new("P1001", "wikibase-item", "Q59542795").expect("q")];
        let bare = item("P6216", "Q19652");
        let changes =
            reconcile_with(std::slice::from_ref(&jurisdiction), &[bare.clone()], &qualified);
        assert_eq!(changes.add["P6216"], vec![jurisdiction]);
        assert_eq!(changes.remove, vec![bare]);

        let never = ReconcilePolicy {
            identity: Identity::Full,
            removal: Removal::Never,
        };
        assert!(reconcile_with(&[], &observed, &never).is_empty());
    }
}
