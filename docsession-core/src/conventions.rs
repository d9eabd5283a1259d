//! Store-wide conventions and per-session options.

use std::{fmt, sync::Arc};
use uuid::Uuid;

/// Default number of round trips a session may make.
pub const DEFAULT_MAX_REQUESTS_PER_SESSION: u32 = 30;

/// Default number of times a lazy batch is re-sent when an operation asks for a retry.
pub const DEFAULT_MAX_LAZY_RETRIES: u32 = 3;

type IdGenerator = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

/// Conventions shared by every session opened from a store.
///
/// # Example
///
/// ```ignore
/// use docsession::conventions::DocumentConventions;
///
/// let conventions = DocumentConventions::builder()
///     .max_requests_per_session(10)
///     .identity_separator('|')
///     .build();
/// ```
#[derive(Clone)]
pub struct DocumentConventions {
    identity_separator: char,
    max_requests_per_session: u32,
    max_lazy_retries: u32,
    id_generator: IdGenerator,
}

impl DocumentConventions {
    /// Returns a builder starting from the defaults.
    pub fn builder() -> DocumentConventionsBuilder {
        DocumentConventionsBuilder::default()
    }

    pub fn identity_separator(&self) -> char {
        self.identity_separator
    }

    pub fn max_requests_per_session(&self) -> u32 {
        self.max_requests_per_session
    }

    pub fn max_lazy_retries(&self) -> u32 {
        self.max_lazy_retries
    }

    /// Generates a document id for a new entity of `collection`.
    ///
    /// By default ids look like `products/1d4e...`: the lowercased collection name, the
    /// separator, then a random uuid.
    pub fn generate_document_id(&self, collection: &str) -> String {
        let separator = self.identity_separator.to_string();
        (self.id_generator)(collection, &separator)
    }
}

impl Default for DocumentConventions {
    fn default() -> Self {
        DocumentConventionsBuilder::default().build()
    }
}

impl fmt::Debug for DocumentConventions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentConventions")
            .field("identity_separator", &self.identity_separator)
            .field("max_requests_per_session", &self.max_requests_per_session)
            .field("max_lazy_retries", &self.max_lazy_retries)
            .finish_non_exhaustive()
    }
}

fn default_id_generator(collection: &str, separator: &str) -> String {
    format!("{}{}{}", collection.to_lowercase(), separator, Uuid::new_v4())
}

/// Builder for [`DocumentConventions`].
pub struct DocumentConventionsBuilder {
    identity_separator: char,
    max_requests_per_session: u32,
    max_lazy_retries: u32,
    id_generator: IdGenerator,
}

impl Default for DocumentConventionsBuilder {
    fn default() -> Self {
        Self {
            identity_separator: '/',
            max_requests_per_session: DEFAULT_MAX_REQUESTS_PER_SESSION,
            max_lazy_retries: DEFAULT_MAX_LAZY_RETRIES,
            id_generator: Arc::new(default_id_generator),
        }
    }
}

impl DocumentConventionsBuilder {
    /// Sets the character placed between the collection prefix and the rest of an id.
    pub fn identity_separator(mut self, separator: char) -> Self {
        self.identity_separator = separator;
        self
    }

    /// Sets how many round trips a session may make before failing with
    /// [`SessionError::RequestQuotaExceeded`](crate::error::SessionError::RequestQuotaExceeded).
    pub fn max_requests_per_session(mut self, max: u32) -> Self {
        self.max_requests_per_session = max;
        self
    }

    pub fn max_lazy_retries(mut self, max: u32) -> Self {
        self.max_lazy_retries = max;
        self
    }

    /// Replaces the id generator. It receives the collection name and the separator.
    pub fn id_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&str, &str) -> String + Send + Sync + 'static,
    {
        self.id_generator = Arc::new(generator);
        self
    }

    pub fn build(self) -> DocumentConventions {
        DocumentConventions {
            identity_separator: self.identity_separator,
            max_requests_per_session: self.max_requests_per_session,
            max_lazy_retries: self.max_lazy_retries,
            id_generator: self.id_generator,
        }
    }
}

/// Options for a single session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    database: Option<String>,
    max_requests: Option<u32>,
    no_tracking: bool,
}

impl SessionOptions {
    pub fn builder() -> SessionOptionsBuilder {
        SessionOptionsBuilder::default()
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// The request quota override, if any.
    pub fn max_requests(&self) -> Option<u32> {
        self.max_requests
    }

    /// Whether loaded and queried documents skip the identity map.
    pub fn no_tracking(&self) -> bool {
        self.no_tracking
    }

    /// Fills in the database when none was chosen.
    pub(crate) fn or_database(mut self, database: Option<&str>) -> Self {
        if self.database.is_none() {
            self.database = database.map(str::to_string);
        }
        self
    }
}

/// Builder for [`SessionOptions`].
#[derive(Debug, Default)]
pub struct SessionOptionsBuilder {
    options: SessionOptions,
}

impl SessionOptionsBuilder {
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.options.database = Some(database.into());
        self
    }

    pub fn max_requests(mut self, max: u32) -> Self {
        self.options.max_requests = Some(max);
        self
    }

    pub fn no_tracking(mut self, no_tracking: bool) -> Self {
        self.options.no_tracking = no_tracking;
        self
    }

    pub fn build(self) -> SessionOptions {
        self.options
    }
}
