//! Immutable registry of application descriptors.
//!
//! The catalog is read once at startup from a JSON document of the form
//! `{"apps": [...]}`. Structural problems are reported as [`CatalogError`]
//! before any operation can run; after loading, the catalog is read-only and
//! shared through `Arc`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::CatalogError;

/// Describes how to obtain, prepare, and start one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDescriptor {
    id: String,
    name: String,
    description: String,
    source_url: String,
    install_command: Option<String>,
    setup_command: Option<String>,
    start_command: String,
}

impl AppDescriptor {
    /// Creates a descriptor with no description and no optional commands.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source_url: impl Into<String>,
        start_command: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            source_url: source_url.into(),
            install_command: None,
            setup_command: None,
            start_command: start_command.into(),
        }
    }

    /// Sets the free-form description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the install-dependencies command; blank commands are ignored.
    #[must_use]
    pub fn with_install_command(mut self, command: impl Into<String>) -> Self {
        self.install_command = non_blank(Some(command.into()));
        self
    }

    /// Sets the setup command; blank commands are ignored.
    #[must_use]
    pub fn with_setup_command(mut self, command: impl Into<String>) -> Self {
        self.setup_command = non_blank(Some(command.into()));
        self
    }

    /// Stable identifier, also the install directory name.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free-form description, possibly empty.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Repository cloned on install.
    #[must_use]
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// Shell command that installs dependencies, if any.
    #[must_use]
    pub fn install_command(&self) -> Option<&str> {
        self.install_command.as_deref()
    }

    /// Shell command run after install and after updates that change the
    /// checkout, if any.
    #[must_use]
    pub fn setup_command(&self) -> Option<&str> {
        self.setup_command.as_deref()
    }

    /// Shell command that starts the application.
    #[must_use]
    pub fn start_command(&self) -> &str {
        &self.start_command
    }
}

/// Descriptor as written in the catalog document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    #[serde(alias = "gitUrl")]
    source_url: Option<String>,
    install_command: Option<String>,
    setup_command: Option<String>,
    start_command: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    apps: Vec<RawDescriptor>,
}

impl RawDescriptor {
    fn into_descriptor(self, index: usize) -> Result<AppDescriptor, CatalogError> {
        let required = |value: Option<String>, field: &'static str| {
            non_blank(value).ok_or(CatalogError::MissingField { index, field })
        };
        // Ids are validated untrimmed.
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or(CatalogError::MissingField { index, field: "id" })?;
        Ok(AppDescriptor {
            id,
            name: required(self.name, "name")?,
            description: self.description.unwrap_or_default(),
            source_url: required(self.source_url, "sourceUrl")?,
            install_command: non_blank(self.install_command),
            setup_command: non_blank(self.setup_command),
            start_command: required(self.start_command, "startCommand")?,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_owned())
        .filter(|text| !text.is_empty())
}

/// Why an identifier cannot name an install directory.
fn id_defect(id: &str) -> Option<&'static str> {
    if id.trim() != id {
        return Some("leading or trailing whitespace");
    }
    if id == "." || id == ".." {
        return Some("relative path component");
    }
    if id.contains(['/', '\\']) {
        return Some("path separator");
    }
    if id.contains('\0') {
        return Some("NUL byte");
    }
    None
}

/// Read-only set of [`AppDescriptor`]s in catalog order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    apps: Vec<AppDescriptor>,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Parses and validates a catalog document.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Parse`] for malformed JSON, and the
    /// validation errors of [`Catalog::from_descriptors`] plus
    /// [`CatalogError::MissingField`] for structurally invalid entries.
    pub fn load(source: &str) -> Result<Self, CatalogError> {
        let document: CatalogDocument =
            serde_json::from_str(source).map_err(|source_error| CatalogError::Parse {
                source: Arc::new(source_error),
            })?;
        let apps = document
            .apps
            .into_iter()
            .enumerate()
            .map(|(index, raw)| raw.into_descriptor(index))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_descriptors(apps)
    }

    /// Reads and loads the catalog document at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Read`] when the file cannot be read, otherwise
    /// as [`Catalog::load`].
    pub fn load_path(path: &Path) -> Result<Self, CatalogError> {
        let raw = fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source: Arc::new(source),
        })?;
        Self::load(&raw)
    }

    /// Builds a catalog from descriptors constructed in code.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::MissingField`] for blank required values,
    /// [`CatalogError::InvalidId`] when an id is not a single path component,
    /// and [`CatalogError::DuplicateId`] when an id repeats.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = AppDescriptor>,
    ) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();
        for (index, app) in descriptors.into_iter().enumerate() {
            let blank_field = [
                ("id", app.id.as_str()),
                ("name", app.name.as_str()),
                ("sourceUrl", app.source_url.as_str()),
                ("startCommand", app.start_command.as_str()),
            ]
            .into_iter()
            .find(|(_, value)| value.trim().is_empty());
            if let Some((field, _)) = blank_field {
                return Err(CatalogError::MissingField { index, field });
            }
            if let Some(reason) = id_defect(&app.id) {
                return Err(CatalogError::InvalidId {
                    index,
                    id: app.id,
                    reason,
                });
            }
            if catalog.index.contains_key(&app.id) {
                return Err(CatalogError::DuplicateId { id: app.id });
            }
            catalog.index.insert(app.id.clone(), catalog.apps.len());
            catalog.apps.push(app);
        }
        Ok(catalog)
    }

    /// Looks up a descriptor by id.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<&AppDescriptor> {
        self.index.get(id).and_then(|position| self.apps.get(*position))
    }

    /// Iterates descriptors in catalog order.
    pub fn iter(&self) -> std::slice::Iter<'_, AppDescriptor> {
        self.apps.iter()
    }

    /// Number of descriptors.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.apps.len()
    }

    /// Returns `true` when the catalog is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a AppDescriptor;
    type IntoIter = std::slice::Iter<'a, AppDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
