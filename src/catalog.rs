// src/catalog.rs

//! Immutable software catalog metadata
//!
//! A [`Catalog`] is the result of one build pass: a flat list of components
//! together with the origin file and scope they were loaded from. Catalogs
//! are replaced wholesale on rebuild and never mutated in place, which is
//! what lets [`CatalogCache`](crate::CatalogCache) hand out shared read
//! access without per-read locking.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Where a catalog's metadata is installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Not recorded in the catalog index
    #[default]
    Unknown,
    /// Available system-wide
    System,
    /// Available to the current user only
    User,
}

impl FromStr for Scope {
    type Err = std::convert::Infallible;

    /// Unrecognized strings map to [`Scope::Unknown`]
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "system" => Self::System,
            "user" => Self::User,
            _ => Self::Unknown,
        })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::System => "system",
            Self::User => "user",
        };
        f.write_str(s)
    }
}

/// Kind of a catalog component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComponentKind {
    /// Anything without a more specific kind
    #[default]
    Generic,
    /// Graphical application with a desktop launchable
    DesktopApplication,
    /// Command-line application
    ConsoleApplication,
    /// Extension of another component
    Addon,
}

impl FromStr for ComponentKind {
    type Err = std::convert::Infallible;

    /// Unrecognized strings map to [`ComponentKind::Generic`]
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "desktop-application" => Self::DesktopApplication,
            "console-application" => Self::ConsoleApplication,
            "addon" => Self::Addon,
            _ => Self::Generic,
        })
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Generic => "generic",
            Self::DesktopApplication => "desktop-application",
            Self::ConsoleApplication => "console-application",
            Self::Addon => "addon",
        };
        f.write_str(s)
    }
}

/// One software component in a catalog index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    /// Component id, e.g. "org.example.Editor"
    pub id: String,
    #[serde(default)]
    pub kind: ComponentKind,
    pub name: Option<String>,
    pub summary: Option<String>,
    /// Desktop launchable ids, e.g. "org.example.Editor.desktop"
    #[serde(default)]
    pub launchables: Vec<String>,
    /// Package the component ships in, when known
    pub pkgname: Option<String>,
}

/// A parsed, immutable catalog of software components
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    /// Index file the catalog was loaded from, when it came from disk
    pub origin: Option<PathBuf>,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub components: Vec<Component>,
}

impl Catalog {
    /// Parse a catalog from a JSON index stream
    pub fn from_json_reader(reader: impl Read) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Load a catalog from a JSON index file
    ///
    /// When the index does not record its own origin, the loaded catalog's
    /// origin is set to `path`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| Error::CatalogRead {
            path: path.to_path_buf(),
            source,
        })?;
        let mut catalog: Catalog = serde_json::from_reader(BufReader::new(file)).map_err(
            |source| Error::CatalogParse {
                path: path.to_path_buf(),
                source,
            },
        )?;
        if catalog.origin.is_none() {
            catalog.origin = Some(path.to_path_buf());
        }
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_scope_from_str() {
        assert_eq!("system".parse::<Scope>().unwrap(), Scope::System);
        assert_eq!("user".parse::<Scope>().unwrap(), Scope::User);
        assert_eq!("flatpak".parse::<Scope>().unwrap(), Scope::Unknown);
        assert_eq!("".parse::<Scope>().unwrap(), Scope::Unknown);
    }

    #[test]
    fn test_component_kind_display_roundtrip() {
        for kind in [
            ComponentKind::Generic,
            ComponentKind::DesktopApplication,
            ComponentKind::ConsoleApplication,
            ComponentKind::Addon,
        ] {
            assert_eq!(kind.to_string().parse::<ComponentKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_catalog_from_json_reader() {
        let json = r#"{
            "scope": "system",
            "components": [
                {
                    "id": "org.example.Editor",
                    "kind": "desktop-application",
                    "name": "Editor",
                    "launchables": ["org.example.Editor.desktop"],
                    "pkgname": "example-editor"
                },
                { "id": "org.example.Editor.Spellcheck", "kind": "addon" }
            ]
        }"#;

        let catalog = Catalog::from_json_reader(json.as_bytes()).unwrap();
        assert_eq!(catalog.scope, Scope::System);
        assert_eq!(catalog.components.len(), 2);
        assert_eq!(catalog.components[0].kind, ComponentKind::DesktopApplication);
        assert_eq!(catalog.components[0].launchables, ["org.example.Editor.desktop"]);
        assert_eq!(catalog.components[1].name, None);
        assert!(catalog.origin.is_none());
    }

    #[test]
    fn test_catalog_from_json_file_records_origin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{ "components": [ { "id": "org.example.Tool" } ] }"#)
            .unwrap();

        let catalog = Catalog::from_json_file(file.path()).unwrap();
        assert_eq!(catalog.origin.as_deref(), Some(file.path()));
        assert_eq!(catalog.scope, Scope::Unknown);
        assert_eq!(catalog.components[0].id, "org.example.Tool");
    }

    #[test]
    fn test_catalog_from_json_file_missing() {
        let err = Catalog::from_json_file("/nonexistent/catalog.json").unwrap_err();
        assert!(matches!(err, Error::CatalogRead { .. }));
    }

    #[test]
    fn test_catalog_from_json_reader_invalid() {
        let err = Catalog::from_json_reader(&b"not json"[..]).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }
}
