use std::ops::Index;

use sha2::{Digest, Sha256};

use crate::article::{Article, RE_ABSCHNITT, RE_AUTHOR, RE_DATEN, to_hex};
use crate::error::{ArticleError, DocumentError, StructureReason};
use crate::template_finder;

pub const LEMMA_PREFIX: &str = "RE:";
const CATEGORY_PREFIX: &str = "Kategorie:";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Article(Article),
    Text(String),
}

impl Segment {
    pub fn as_article(&self) -> Option<&Article> {
        match self {
            Self::Article(article) => Some(article),
            Self::Text(_) => None,
        }
    }

    fn to_text(&self) -> String {
        match self {
            Self::Article(article) => article.to_text(),
            Self::Text(text) => text.clone(),
        }
    }

    fn content_hash(&self) -> String {
        match self {
            Self::Article(article) => article.content_hash(),
            Self::Text(text) => {
                let mut hasher = Sha256::new();
                hasher.update(b"text\x1e");
                hasher.update(text.as_bytes());
                to_hex(&hasher.finalize())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    lemma: String,
    source: String,
    segments: Vec<Segment>,
}

impl Document {
    pub fn new(lemma: impl Into<String>) -> Self {
        Self {
            lemma: lemma.into(),
            source: String::new(),
            segments: Vec::new(),
        }
    }

    /// Split a page into articles and the text between them.
    pub fn from_text(lemma: impl Into<String>, text: &str) -> Result<Self, DocumentError> {
        let mut starts = template_finder::find(text, RE_DATEN).map_err(ArticleError::from)?;
        starts.extend(template_finder::find(text, RE_ABSCHNITT).map_err(ArticleError::from)?);
        starts.sort_by_key(|span| span.start);
        let ends = template_finder::find(text, RE_AUTHOR).map_err(ArticleError::from)?;
        if starts.len() != ends.len() {
            return Err(mismatch().into());
        }

        let mut segments = Vec::new();
        let mut cursor = 0usize;
        for (start, end) in starts.iter().zip(ends.iter()) {
            if start.start < cursor || start.end > end.start {
                return Err(mismatch().into());
            }
            push_text(&mut segments, &text[cursor..start.start]);
            let article = Article::from_text(&text[start.start..end.end])?;
            segments.push(Segment::Article(article));
            cursor = end.end;
        }
        push_text(&mut segments, &text[cursor..]);

        Ok(Self {
            lemma: lemma.into(),
            source: text.to_string(),
            segments,
        })
    }

    pub fn to_text(&self) -> String {
        self.segments
            .iter()
            .map(Segment::to_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Whether the serialized page differs from the text it was loaded from.
    pub fn has_changed(&self) -> bool {
        self.source != self.to_text()
    }

    /// Digest over the ordered segment digests.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for segment in &self.segments {
            hasher.update(segment.content_hash().as_bytes());
        }
        to_hex(&hasher.finalize())
    }

    pub fn lemma(&self) -> &str {
        &self.lemma
    }

    pub fn lemma_without_prefix(&self) -> &str {
        self.lemma.strip_prefix(LEMMA_PREFIX).unwrap_or(&self.lemma)
    }

    pub fn lemma_as_link(&self) -> String {
        format!("[[{}|{}]]", self.lemma, self.lemma_without_prefix())
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segments_mut(&mut self) -> &mut Vec<Segment> {
        &mut self.segments
    }

    pub fn articles(&self) -> impl Iterator<Item = &Article> {
        self.segments.iter().filter_map(Segment::as_article)
    }

    pub fn articles_mut(&mut self) -> impl Iterator<Item = &mut Article> {
        self.segments.iter_mut().filter_map(|segment| match segment {
            Segment::Article(article) => Some(article),
            Segment::Text(_) => None,
        })
    }

    pub fn first_article(&self) -> Result<&Article, DocumentError> {
        self.articles().next().ok_or(DocumentError::Empty)
    }

    pub fn first_article_mut(&mut self) -> Result<&mut Article, DocumentError> {
        self.articles_mut().next().ok_or(DocumentError::Empty)
    }

    pub fn push_article(&mut self, article: Article) {
        self.segments.push(Segment::Article(article));
    }

    pub fn push_text(&mut self, text: &str) {
        push_text(&mut self.segments, text);
    }

    pub fn has_category(&self, category: &str) -> bool {
        let link = category_link(category);
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Text(text) if text.contains(&link)))
    }

    /// Append a maintenance category (with an optional hidden note) unless
    /// the page already carries it.
    pub fn add_error_category(&mut self, category: &str, note: Option<&str>) {
        if self.has_category(category) {
            return;
        }
        let mut line = category_link(category);
        if let Some(note) = note {
            line.push_str(&format!("<!--{note}-->"));
        }
        match self.segments.last_mut() {
            Some(Segment::Text(text)) => {
                text.push('\n');
                text.push_str(&line);
            }
            _ => self.segments.push(Segment::Text(line)),
        }
    }

    pub fn remove_error_category(&mut self, category: &str) {
        let link = category_link(category);
        for segment in &mut self.segments {
            if let Segment::Text(text) = segment {
                *text = text
                    .lines()
                    .filter(|line| !line.trim_start().starts_with(&link))
                    .collect::<Vec<_>>()
                    .join("\n");
            }
        }
        self.segments
            .retain(|segment| !matches!(segment, Segment::Text(text) if text.trim().is_empty()));
    }
}

impl Index<usize> for Document {
    type Output = Segment;

    fn index(&self, index: usize) -> &Self::Output {
        &self.segments[index]
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

fn push_text(segments: &mut Vec<Segment>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        segments.push(Segment::Text(trimmed.to_string()));
    }
}

fn mismatch() -> ArticleError {
    ArticleError::structure(StructureReason::MismatchedMarkers)
}

fn category_link(category: &str) -> String {
    format!("[[{CATEGORY_PREFIX}{category}]]")
}

#[cfg(test)]
mod tests {
    use super::{Document, Segment};
    use crate::article::{Article, ArticleType, Author, Field};
    use crate::error::{DocumentError, StructureReason};

    fn canonical(free_text: &str, author: &str) -> String {
        Article::new(ArticleType::Primary, free_text, Author::new(author, "")).to_text()
    }

    fn section(free_text: &str, author: &str) -> String {
        Article::new(ArticleType::Section, free_text, Author::new(author, "")).to_text()
    }

    #[test]
    fn splits_articles_and_interleaved_text() {
        let text = format!(
            "{}\n{}\n----\n{}\n[[Kategorie:RE:Band I]]",
            canonical("Main.", "Abel."),
            section("Part.", "Pauly."),
            canonical("Nachtrag.", "Abel.")
        );
        let document = Document::from_text("RE:Aal", &text).expect("parse");
        assert_eq!(document.len(), 5);
        assert_eq!(document.articles().count(), 3);
        assert_eq!(document[2], Segment::Text("----".to_string()));
        assert_eq!(
            document[1].as_article().expect("article").article_type(),
            ArticleType::Section
        );
        assert_eq!(document.to_text(), text);
        assert!(!document.has_changed());
    }

    #[test]
    fn lemma_metadata() {
        let document = Document::new("RE:Aal");
        assert_eq!(document.lemma(), "RE:Aal");
        assert_eq!(document.lemma_without_prefix(), "Aal");
        assert_eq!(document.lemma_as_link(), "[[RE:Aal|Aal]]");
    }

    #[test]
    fn first_article_of_empty_document_fails() {
        let document = Document::from_text("RE:Leer", "nur Text").expect("parse");
        assert_eq!(document.first_article(), Err(DocumentError::Empty));
        assert_eq!(document.len(), 1);
    }

    #[test]
    fn unpaired_markers_fail() {
        for text in [
            "{{REDaten}}a{{REDaten}}b{{REAutor|X.}}",
            "{{REDaten}}a{{REAbschnitt}}b{{REAutor|X.}}c{{REAutor|Y.}}",
            "{{REAutor|X.}}a{{REDaten}}b",
        ] {
            let error = Document::from_text("RE:X", text).expect_err("must fail");
            match error {
                DocumentError::Article(error) => {
                    assert_eq!(error.reason(), Some(StructureReason::MismatchedMarkers))
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn hash_follows_semantic_content() {
        let text = format!("{}\n[[Kategorie:X]]", canonical("Main.", "Abel."));
        let document = Document::from_text("RE:Aal", &text).expect("parse");
        let same = Document::from_text("RE:Aal", &text).expect("parse");
        assert_eq!(document.content_hash(), same.content_hash());

        let loose = Document::from_text(
            "RE:Aal",
            "{{REDaten|bd=}}\n\nMain.\n\n{{REAutor|Abel.}}\n\n[[Kategorie:X]]",
        )
        .expect("parse");
        assert_eq!(loose.content_hash(), document.content_hash());
        assert!(loose.has_changed());

        let mut changed = document.clone();
        changed
            .first_article_mut()
            .expect("article")
            .set("BAND", "I,1")
            .expect("set");
        assert_ne!(changed.content_hash(), document.content_hash());
        assert!(changed.has_changed());
        assert_eq!(changed.first_article().expect("article").text(Field::Band), "I,1");
    }

    #[test]
    fn error_categories_are_added_once_and_removed() {
        let mut document =
            Document::from_text("RE:Aal", &canonical("Main.", "Abel.")).expect("parse");
        let before = document.content_hash();
        document.add_error_category("RE:Fehler", Some("structure"));
        document.add_error_category("RE:Fehler", None);
        assert!(document.has_category("RE:Fehler"));
        assert_eq!(
            document.to_text().matches("[[Kategorie:RE:Fehler]]").count(),
            1
        );
        assert_ne!(document.content_hash(), before);

        document.remove_error_category("RE:Fehler");
        assert!(!document.has_category("RE:Fehler"));
        assert_eq!(document.content_hash(), before);
    }
}
