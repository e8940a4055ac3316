use thiserror::Error;

/// Failures of the template finder and template handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// Braces of a template invocation never balance.
    #[error("unbalanced braces in template `{name}` starting at offset {start}")]
    Unbalanced { name: String, start: usize },

    /// Text handed to the handler is not a `{{...}}` invocation.
    #[error("not a template invocation: {0}")]
    NotATemplate(String),
}

/// The specific invariant an article source text violates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureReason {
    MissingStartTemplate,
    MultipleStartTemplates,
    MissingEndTemplate,
    MultipleEndTemplates,
    StartAfterEnd,
    TextBeforeStart,
    TextAfterEnd,
    PositionalParameter,
    MalformedTemplate,
    MissingAuthor,
    MismatchedMarkers,
}

impl StructureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingStartTemplate => "no start template",
            Self::MultipleStartTemplates => "multiple start templates",
            Self::MissingEndTemplate => "no end template",
            Self::MultipleEndTemplates => "multiple end templates",
            Self::StartAfterEnd => "start template after end template",
            Self::TextBeforeStart => "text before start template",
            Self::TextAfterEnd => "text after end template",
            Self::PositionalParameter => "parameter without key",
            Self::MalformedTemplate => "malformed template braces",
            Self::MissingAuthor => "author template without author",
            Self::MismatchedMarkers => "start and end templates do not pair up",
        }
    }
}

impl std::fmt::Display for StructureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures while building or mutating an article.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArticleError {
    #[error("structure error: {reason}")]
    Structure { reason: StructureReason },

    #[error("unknown parameter key: {0}")]
    UnknownKey(String),

    #[error("type mismatch for property {name}: expected {expected}, got {got:?}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        got: String,
    },
}

impl ArticleError {
    pub fn structure(reason: StructureReason) -> Self {
        Self::Structure { reason }
    }

    /// The structure reason, if this is a structure error.
    pub fn reason(&self) -> Option<StructureReason> {
        match self {
            Self::Structure { reason } => Some(*reason),
            _ => None,
        }
    }
}

impl From<TemplateError> for ArticleError {
    fn from(_: TemplateError) -> Self {
        Self::structure(StructureReason::MalformedTemplate)
    }
}

/// Failures of the page-level aggregate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document contains no article")]
    Empty,

    #[error(transparent)]
    Article(#[from] ArticleError),
}

/// Failures while constructing claims.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    #[error("unsupported value type: {0}")]
    UnsupportedValueType(String),

    #[error("time claims need an integer year, got {0:?}")]
    InvalidTime(String),

    #[error("not an item id: {0:?}")]
    InvalidItem(String),

    #[error("malformed claim json: {0}")]
    MalformedJson(String),
}

/// Failure while a factory derives its desired claims.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FactoryError {
    #[error(transparent)]
    Claim(#[from] ClaimError),

    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Collaborator failures, split by whether a retry could help.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IoFailure {
    #[error("transient failure after {attempts} attempt(s): {message}")]
    Transient { attempts: usize, message: String },

    #[error("fatal failure: {0}")]
    Fatal(String),

    /// Login, token or permission failure; no later page can succeed either.
    #[error("authentication failure: {0}")]
    Auth(String),

    /// The page changed between fetch and save.
    #[error("edit conflict: {0}")]
    EditConflict(String),
}

impl IoFailure {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}
