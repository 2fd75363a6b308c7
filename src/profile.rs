//! Display-name editor.
//!
//! A committed name replaces the shown one before the backend write finishes.
//! If the write fails the previous name comes back and the error is kept for
//! display.

use tracing::{debug, warn};

use crate::aggregates::UserId;
use crate::backend::Backend;
use crate::error::{Error, Result};

/// Editing state of one user's display name.
///
/// # Examples
///
/// ```rust
/// use interruttore::backend::LocalBackend;
/// use interruttore::config::Config;
/// use interruttore::profile::NameEditor;
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let backend = LocalBackend::new(&Config::default());
/// let mut editor = NameEditor::load(&backend, "u1".into(), "Anonymous").await.unwrap();
///
/// editor.begin();
/// editor.set_draft("  Grace  ");
/// assert_eq!(editor.commit(&backend).await.unwrap(), "Grace");
/// # });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameEditor {
    user: UserId,
    current: String,
    draft: Option<String>,
    last_error: Option<Error>,
}

impl NameEditor {
    pub fn new(user: UserId, current: impl Into<String>) -> Self {
        Self {
            user,
            current: current.into(),
            draft: None,
            last_error: None,
        }
    }

    /// Reads the stored name, falling back to `default_name` before the
    /// user's first click or rename.
    pub async fn load<B: Backend + ?Sized>(
        backend: &B,
        user: UserId,
        default_name: &str,
    ) -> Result<Self> {
        let current = backend
            .fetch_profile(&user)
            .await?
            .map(|entry| entry.display_name)
            .unwrap_or_else(|| default_name.to_string());
        Ok(Self::new(user, current))
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Name to display.
    pub fn current_name(&self) -> &str {
        &self.current
    }

    pub fn draft(&self) -> Option<&str> {
        self.draft.as_deref()
    }

    pub fn is_editing(&self) -> bool {
        self.draft.is_some()
    }

    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Opens the editor with an empty draft.
    pub fn begin(&mut self) {
        self.draft = Some(String::new());
        self.last_error = None;
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        if let Some(draft) = self.draft.as_mut() {
            *draft = text.into();
        }
    }

    pub fn cancel(&mut self) {
        self.draft = None;
    }

    /// Closes the editor and stores the trimmed draft.
    ///
    /// An empty draft keeps the current name and writes nothing. Committing
    /// while not editing returns the current name.
    pub async fn commit<B: Backend + ?Sized>(&mut self, backend: &B) -> Result<&str> {
        let Some(draft) = self.draft.take() else {
            return Ok(&self.current);
        };
        let name = draft.trim();
        if name.is_empty() || name == self.current {
            return Ok(&self.current);
        }

        let previous = std::mem::replace(&mut self.current, name.to_string());
        match backend.rename_profile(&self.user, &self.current).await {
            Ok(()) => {
                debug!(user = %self.user, name = %self.current, "display name saved");
                Ok(&self.current)
            }
            Err(err) => {
                warn!(user = %self.user, %err, "display name not saved, reverting");
                self.current = previous;
                self.last_error = Some(err.clone());
                Err(err)
            }
        }
    }
}
