use sha2::{Digest, Sha256};

use crate::error::{ArticleError, StructureReason};
use crate::property::{Property, PropertyValue};
use crate::template_finder::{self, TemplateSpan};
use crate::template_handler::{self, Layout, Parameter, TemplateHandler};

pub const RE_DATEN: &str = "REDaten";
pub const RE_ABSCHNITT: &str = "REAbschnitt";
pub const RE_AUTHOR: &str = "REAutor";

/// Years after the author's death until an article counts as free.
pub const FREE_YEARS_AFTER_DEATH: i32 = 70;
/// Years after the author's birth until an article counts as free when only
/// the birth year is known.
pub const FREE_YEARS_AFTER_BIRTH: i32 = 170;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArticleType {
    Primary,
    Section,
}

impl ArticleType {
    pub fn marker(self) -> &'static str {
        match self {
            Self::Primary => RE_DATEN,
            Self::Section => RE_ABSCHNITT,
        }
    }
}

/// The fixed property schema of the `REDaten` block, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Band,
    SpalteStart,
    SpalteEnd,
    Vorgaenger,
    Nachfolger,
    Sortierung,
    Korrekturstand,
    Kurztext,
    Wikipedia,
    Wikisource,
    Gnd,
    KeineSchoepfungshoehe,
    Todesjahr,
    Geburtsjahr,
    Nachtrag,
    Ueberschrift,
    Verweis,
    Zusammenfassung,
}

impl Field {
    pub const ALL: [Field; 18] = [
        Field::Band,
        Field::SpalteStart,
        Field::SpalteEnd,
        Field::Vorgaenger,
        Field::Nachfolger,
        Field::Sortierung,
        Field::Korrekturstand,
        Field::Kurztext,
        Field::Wikipedia,
        Field::Wikisource,
        Field::Gnd,
        Field::KeineSchoepfungshoehe,
        Field::Todesjahr,
        Field::Geburtsjahr,
        Field::Nachtrag,
        Field::Ueberschrift,
        Field::Verweis,
        Field::Zusammenfassung,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Band => "BAND",
            Self::SpalteStart => "SPALTE_START",
            Self::SpalteEnd => "SPALTE_END",
            Self::Vorgaenger => "VORGÄNGER",
            Self::Nachfolger => "NACHFOLGER",
            Self::Sortierung => "SORTIERUNG",
            Self::Korrekturstand => "KORREKTURSTAND",
            Self::Kurztext => "KURZTEXT",
            Self::Wikipedia => "WIKIPEDIA",
            Self::Wikisource => "WIKISOURCE",
            Self::Gnd => "GND",
            Self::KeineSchoepfungshoehe => "KEINE_SCHÖPFUNGSHÖHE",
            Self::Todesjahr => "TODESJAHR",
            Self::Geburtsjahr => "GEBURTSJAHR",
            Self::Nachtrag => "NACHTRAG",
            Self::Ueberschrift => "ÜBERSCHRIFT",
            Self::Verweis => "VERWEIS",
            Self::Zusammenfassung => "ZUSAMMENFASSUNG",
        }
    }

    pub fn alias(self) -> &'static str {
        match self {
            Self::Band => "BD",
            Self::SpalteStart => "SS",
            Self::SpalteEnd => "SE",
            Self::Vorgaenger => "VG",
            Self::Nachfolger => "NF",
            Self::Sortierung => "SRT",
            Self::Korrekturstand => "KOR",
            Self::Kurztext => "KTXT",
            Self::Wikipedia => "WP",
            Self::Wikisource => "WS",
            Self::Gnd => "GND",
            Self::KeineSchoepfungshoehe => "KSCH",
            Self::Todesjahr => "TJ",
            Self::Geburtsjahr => "GJ",
            Self::Nachtrag => "NT",
            Self::Ueberschrift => "ÜB",
            Self::Verweis => "VW",
            Self::Zusammenfassung => "ZS",
        }
    }

    fn default_value(self) -> PropertyValue {
        match self {
            Self::KeineSchoepfungshoehe | Self::Nachtrag | Self::Ueberschrift | Self::Verweis => {
                PropertyValue::Flag(false)
            }
            _ => PropertyValue::Text(String::new()),
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    /// Resolve a canonical key or short alias, ignoring case.
    pub fn lookup(name: &str) -> Result<Field, ArticleError> {
        let wanted = name.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|field| field.key() == wanted || field.alias() == wanted)
            .ok_or_else(|| ArticleError::UnknownKey(name.trim().to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Author {
    pub name: String,
    pub issue: String,
}

impl Author {
    pub fn new(name: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            issue: issue.into(),
        }
    }

    fn to_text(&self) -> String {
        let mut parameters = vec![Parameter::positional(self.name.as_str())];
        if !self.issue.is_empty() {
            parameters.push(Parameter::positional(self.issue.as_str()));
        }
        template_handler::serialize(RE_AUTHOR, &parameters, Layout::Inline)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Article {
    article_type: ArticleType,
    properties: Vec<Property>,
    free_text: String,
    author: Author,
}

impl Default for Article {
    fn default() -> Self {
        Self::new(ArticleType::Primary, "", Author::default())
    }
}

impl Article {
    pub fn new(article_type: ArticleType, free_text: &str, author: Author) -> Self {
        let properties = Field::ALL
            .into_iter()
            .map(|field| Property::new(field.key(), field.default_value()))
            .collect();
        Self {
            article_type,
            properties,
            free_text: free_text.trim().to_string(),
            author,
        }
    }

    pub fn from_text(text: &str) -> Result<Self, ArticleError> {
        let start = single_start_marker(text)?;
        let end = single_end_marker(text)?;

        if start.end > end.start {
            return Err(ArticleError::structure(StructureReason::StartAfterEnd));
        }
        if !text[..start.start].trim().is_empty() {
            return Err(ArticleError::structure(StructureReason::TextBeforeStart));
        }
        if !text[end.end..].trim().is_empty() {
            return Err(ArticleError::structure(StructureReason::TextAfterEnd));
        }

        let article_type = if start.name == RE_DATEN {
            ArticleType::Primary
        } else {
            ArticleType::Section
        };
        let author_template = TemplateHandler::from_text(&end.raw_text)?;
        let author_name = author_template
            .positional(0)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ArticleError::structure(StructureReason::MissingAuthor))?;
        let author = Author::new(author_name, author_template.positional(1).unwrap_or(""));

        let mut article = Self::new(article_type, &text[start.end..end.start], author);
        let start_template = TemplateHandler::from_text(&start.raw_text)?;
        for parameter in start_template.parameters() {
            let Some(key) = &parameter.key else {
                return Err(ArticleError::structure(StructureReason::PositionalParameter));
            };
            article.set(key, parameter.value.as_str())?;
        }
        Ok(article)
    }

    pub fn to_text(&self) -> String {
        let start = match self.article_type {
            ArticleType::Primary => {
                let parameters = self
                    .properties
                    .iter()
                    .map(|property| Parameter::named(property.name(), property.to_string()))
                    .collect::<Vec<_>>();
                template_handler::serialize(RE_DATEN, &parameters, Layout::MultiLine)
            }
            ArticleType::Section => format!("{{{{{RE_ABSCHNITT}}}}}"),
        };
        format!("{start}\n{}\n{}", self.free_text, self.author.to_text())
    }

    pub fn article_type(&self) -> ArticleType {
        self.article_type
    }

    pub fn set_article_type(&mut self, article_type: ArticleType) {
        self.article_type = article_type;
    }

    pub fn free_text(&self) -> &str {
        &self.free_text
    }

    pub fn set_free_text(&mut self, text: &str) {
        self.free_text = text.trim().to_string();
    }

    pub fn author(&self) -> &Author {
        &self.author
    }

    pub fn set_author(&mut self, author: Author) {
        self.author = author;
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn get(&self, field: Field) -> &Property {
        &self.properties[field.index()]
    }

    pub fn get_mut(&mut self, field: Field) -> &mut Property {
        &mut self.properties[field.index()]
    }

    /// Lookup by canonical key or alias.
    pub fn property(&self, name: &str) -> Result<&Property, ArticleError> {
        Ok(self.get(Field::lookup(name)?))
    }

    pub fn set(&mut self, name: &str, value: impl Into<PropertyValue>) -> Result<(), ArticleError> {
        let field = Field::lookup(name)?;
        self.get_mut(field).set_value(value)
    }

    pub fn text(&self, field: Field) -> &str {
        self.get(field).as_text()
    }

    pub fn flag(&self, field: Field) -> bool {
        self.get(field).as_flag()
    }

    /// Public-domain policy for the wiki's own license banner.
    ///
    /// The threshold-of-originality override always wins. Otherwise a known
    /// death year must lie more than 70 years back; with only a birth year it
    /// must lie more than 170 years back. A year that does not parse is not
    /// taken as evidence of freedom. Without any year the article is free.
    pub fn common_free(&self, current_year: i32) -> bool {
        if self.flag(Field::KeineSchoepfungshoehe) {
            return true;
        }
        let death = self.text(Field::Todesjahr);
        if !death.is_empty() {
            return parse_year(death)
                .is_some_and(|year| current_year - year > FREE_YEARS_AFTER_DEATH);
        }
        let birth = self.text(Field::Geburtsjahr);
        if !birth.is_empty() {
            return parse_year(birth)
                .is_some_and(|year| current_year - year > FREE_YEARS_AFTER_BIRTH);
        }
        true
    }

    /// Stable digest over type, properties, free text and author.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.article_type.marker().as_bytes());
        for property in &self.properties {
            hasher.update([0x1e]);
            hasher.update(property.name().as_bytes());
            hasher.update([0x1f]);
            hasher.update(property.to_string().as_bytes());
        }
        hasher.update([0x1e]);
        hasher.update(self.free_text.as_bytes());
        hasher.update([0x1e]);
        hasher.update(self.author.name.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.author.issue.as_bytes());
        to_hex(&hasher.finalize())
    }
}

pub(crate) fn parse_year(value: &str) -> Option<i32> {
    value.trim().parse::<i32>().ok()
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn single_start_marker(text: &str) -> Result<TemplateSpan, ArticleError> {
    let mut starts = template_finder::find(text, RE_DATEN)?;
    starts.extend(template_finder::find(text, RE_ABSCHNITT)?);
    match starts.len() {
        0 => Err(ArticleError::structure(
            StructureReason::MissingStartTemplate,
        )),
        1 => Ok(starts.remove(0)),
        _ => Err(ArticleError::structure(
            StructureReason::MultipleStartTemplates,
        )),
    }
}

fn single_end_marker(text: &str) -> Result<TemplateSpan, ArticleError> {
    let mut ends = template_finder::find(text, RE_AUTHOR)?;
    match ends.len() {
        0 => Err(ArticleError::structure(StructureReason::MissingEndTemplate)),
        1 => Ok(ends.remove(0)),
        _ => Err(ArticleError::structure(
            StructureReason::MultipleEndTemplates,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::{Article, ArticleType, Author, Field};
    use crate::error::{ArticleError, StructureReason};

    const CANONICAL: &str = concat!(
        "{{REDaten\n|BAND=I,1\n|SPALTE_START=1\n|SPALTE_END=4\n|VORGÄNGER=Aachen\n",
        "|NACHFOLGER=Aal\n|SORTIERUNG=\n|KORREKTURSTAND=fertig\n|KURZTEXT=\n",
        "|WIKIPEDIA=Aal\n|WIKISOURCE=\n|GND=\n|KEINE_SCHÖPFUNGSHÖHE=OFF\n",
        "|TODESJAHR=1924\n|GEBURTSJAHR=\n|NACHTRAG=OFF\n|ÜBERSCHRIFT=OFF\n",
        "|VERWEIS=ON\n|ZUSAMMENFASSUNG=\n}}\nSome text.\n{{REAutor|Abel.|I,1}}"
    );

    fn reason(result: Result<Article, ArticleError>) -> StructureReason {
        result
            .expect_err("must fail")
            .reason()
            .expect("structure error")
    }

    #[test]
    fn minimal_article_parses_and_canonicalizes() {
        let article = Article::from_text("{{REDaten}}text{{REAutor|Autor.}}").expect("parse");
        assert_eq!(article.article_type(), ArticleType::Primary);
        assert_eq!(article.free_text(), "text");
        assert_eq!(article.author(), &Author::new("Autor.", ""));

        let rendered = article.to_text();
        assert!(rendered.starts_with("{{REDaten\n|BAND=\n|SPALTE_START=\n"));
        assert!(rendered.ends_with("|ZUSAMMENFASSUNG=\n}}\ntext\n{{REAutor|Autor.}}"));
        assert_eq!(rendered.matches("\n|").count(), 18);
    }

    #[test]
    fn canonical_text_round_trips() {
        let article = Article::from_text(CANONICAL).expect("parse");
        assert_eq!(article.to_text(), CANONICAL);
        assert_eq!(article.text(Field::Band), "I,1");
        assert!(article.flag(Field::Verweis));
        assert_eq!(article.author().issue, "I,1");
    }

    #[test]
    fn aliases_and_lowercase_keys_canonicalize() {
        let article = Article::from_text(
            "{{REDaten|bd=II|VW=on|ksch=ON}}\nx\n{{REAutor|X.}}",
        )
        .expect("parse");
        assert_eq!(article.text(Field::Band), "II");
        assert!(article.flag(Field::Verweis));
        assert!(article.flag(Field::KeineSchoepfungshoehe));
        let rendered = article.to_text();
        assert!(rendered.contains("|BAND=II\n"));
        assert!(rendered.contains("|VERWEIS=ON\n"));
        assert_eq!(Article::from_text(&rendered).expect("reparse"), article);
    }

    #[test]
    fn section_renders_bare_marker() {
        let article =
            Article::from_text("{{REAbschnitt}}\nmore text\n{{REAutor|Pauly.}}").expect("parse");
        assert_eq!(article.article_type(), ArticleType::Section);
        assert_eq!(article.to_text(), "{{REAbschnitt}}\nmore text\n{{REAutor|Pauly.}}");
    }

    #[test]
    fn structure_violations_carry_reasons() {
        assert_eq!(
            reason(Article::from_text(
                "{{REDaten}}{{REDaten}}\ntext\n{{REAutor|X.}}"
            )),
            StructureReason::MultipleStartTemplates
        );
        assert_eq!(
            reason(Article::from_text("{{REDaten}}{{REAbschnitt}}x{{REAutor|X.}}")),
            StructureReason::MultipleStartTemplates
        );
        assert_eq!(
            reason(Article::from_text("text{{REAutor|X.}}")),
            StructureReason::MissingStartTemplate
        );
        assert_eq!(
            reason(Article::from_text("{{REDaten}}text")),
            StructureReason::MissingEndTemplate
        );
        assert_eq!(
            reason(Article::from_text("{{REDaten}}a{{REAutor|X.}}{{REAutor|Y.}}")),
            StructureReason::MultipleEndTemplates
        );
        assert_eq!(
            reason(Article::from_text("{{REAutor|X.}}text{{REDaten}}")),
            StructureReason::StartAfterEnd
        );
        assert_eq!(
            reason(Article::from_text("lead {{REDaten}}a{{REAutor|X.}}")),
            StructureReason::TextBeforeStart
        );
        assert_eq!(
            reason(Article::from_text("{{REDaten}}a{{REAutor|X.}} tail")),
            StructureReason::TextAfterEnd
        );
        assert_eq!(
            reason(Article::from_text("{{REDaten|I,1}}a{{REAutor|X.}}")),
            StructureReason::PositionalParameter
        );
        assert_eq!(
            reason(Article::from_text("{{REDaten}}a{{REAutor}}")),
            StructureReason::MissingAuthor
        );
        assert_eq!(
            reason(Article::from_text("{{REDaten}}a{{REAutor|}}")),
            StructureReason::MissingAuthor
        );
        assert_eq!(
            reason(Article::from_text("{{REDaten|BAND={{x}}a{{REAutor|X.}}")),
            StructureReason::MalformedTemplate
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = Article::from_text("{{REDaten|FOO=1}}a{{REAutor|X.}}").expect_err("fail");
        assert_eq!(error, ArticleError::UnknownKey("FOO".to_string()));
        assert!(Article::default().property("nope").is_err());
        assert_eq!(
            Article::default().property("tj").expect("alias").name(),
            "TODESJAHR"
        );
    }

    #[test]
    fn invalid_flag_token_is_a_type_mismatch() {
        let error =
            Article::from_text("{{REDaten|VERWEIS=ja}}a{{REAutor|X.}}").expect_err("fail");
        assert!(matches!(error, ArticleError::TypeMismatch { .. }));
    }

    #[test]
    fn content_hash_tracks_every_field() {
        let article = Article::from_text(CANONICAL).expect("parse");
        let reparsed = Article::from_text(&article.to_text()).expect("reparse");
        assert_eq!(article.content_hash(), reparsed.content_hash());

        let mut changed = article.clone();
        changed.set("SORTIERUNG", "Aal 1").expect("set");
        assert_ne!(changed.content_hash(), article.content_hash());

        let mut changed = article.clone();
        changed.set_free_text("Other text.");
        assert_ne!(changed.content_hash(), article.content_hash());

        let mut changed = article.clone();
        changed.set_author(Author::new("Abel.", "II"));
        assert_ne!(changed.content_hash(), article.content_hash());
    }

    #[test]
    fn common_free_policy() {
        let mut article = Article::default();
        assert!(article.common_free(2026));

        article.set("TODESJAHR", "1950").expect("set");
        assert!(!article.common_free(2020));
        assert!(article.common_free(2021));

        article.set("KEINE_SCHÖPFUNGSHÖHE", true).expect("set");
        assert!(article.common_free(2020));

        let mut born = Article::default();
        born.set("GEBURTSJAHR", "1850").expect("set");
        assert!(!born.common_free(2020));
        assert!(born.common_free(2021));

        let mut garbled = Article::default();
        garbled.set("TODESJAHR", "um 1900").expect("set");
        assert!(!garbled.common_free(2026));
    }
}
