//! Package declarations: what a module depends on and what it builds.
//!
//! A manifest names the package, lists the sibling packages it depends on
//! (each exposing a main library and/or a test library) and the targets
//! assembled from them. Validation of references lives in the build graph.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Errors loading a manifest or parsing an artifact reference.
#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Manifest path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The TOML did not match the schema.
    #[error("invalid manifest: {0}")]
    Parse(#[from] toml::de::Error),

    /// An artifact kind string is unknown.
    #[error("unknown artifact kind '{0}' (expected main-lib, test-lib, desktop-app or unittest)")]
    UnknownKind(String),

    /// An artifact reference is not `package:kind` or `:target`.
    #[error("malformed artifact reference '{0}'")]
    BadReference(String),
}

/// Kind of a build artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    /// Static library linked into applications
    MainLib,
    /// Library linked into test executables only
    TestLib,
    /// Desktop executable
    DesktopApp,
    /// Unit test executable
    Unittest,
}

impl ArtifactKind {
    /// Canonical spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MainLib => "main-lib",
            Self::TestLib => "test-lib",
            Self::DesktopApp => "desktop-app",
            Self::Unittest => "unittest",
        }
    }

    /// Libraries can be exposed by dependencies; executables cannot.
    pub fn is_library(self) -> bool {
        matches!(self, Self::MainLib | Self::TestLib)
    }

    /// Artifacts that ship and must not link test-only code.
    pub fn is_production(self) -> bool {
        matches!(self, Self::MainLib | Self::DesktopApp)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main-lib" => Ok(Self::MainLib),
            "test-lib" => Ok(Self::TestLib),
            "desktop-app" => Ok(Self::DesktopApp),
            "unittest" => Ok(Self::Unittest),
            other => Err(ManifestError::UnknownKind(other.to_string())),
        }
    }
}

/// A reference from a target to something it links.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactRef {
    /// `ccore:main-lib`
    External {
        /// Dependency package name
        package: String,
        /// Library kind
        kind: ArtifactKind,
    },
    /// `:cconartist`, a target of the same package
    Local(String),
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::External { package, kind } => write!(f, "{package}:{kind}"),
            Self::Local(target) => write!(f, ":{target}"),
        }
    }
}

impl FromStr for ArtifactRef {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ManifestError::BadReference(s.to_string());
        let (package, rest) = s.split_once(':').ok_or_else(bad)?;
        if rest.is_empty() || rest.contains(':') {
            return Err(bad());
        }
        if package.is_empty() {
            return Ok(Self::Local(rest.to_string()));
        }
        let kind: ArtifactKind = rest.parse()?;
        if !kind.is_library() {
            return Err(bad());
        }
        Ok(Self::External {
            package: package.to_string(),
            kind,
        })
    }
}

macro_rules! serde_via_str {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

serde_via_str!(ArtifactKind);
serde_via_str!(ArtifactRef);

/// The `[package]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDecl {
    /// Package name
    pub name: String,
    /// Repository path
    pub path: String,
}

fn default_exposed() -> Vec<ArtifactKind> {
    vec![ArtifactKind::MainLib, ArtifactKind::TestLib]
}

fn library_kinds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<ArtifactKind>, D::Error> {
    let kinds = Vec::<ArtifactKind>::deserialize(deserializer)?;
    if let Some(kind) = kinds.iter().find(|k| !k.is_library()) {
        return Err(serde::de::Error::custom(format!(
            "'{kind}' is not a library kind (expected main-lib or test-lib)"
        )));
    }
    Ok(kinds)
}

/// A `[[dependency]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDecl {
    /// Package name, unique within the manifest
    pub name: String,
    /// Repository path
    #[serde(default)]
    pub path: String,
    /// Libraries the package exposes
    #[serde(default = "default_exposed", deserialize_with = "library_kinds")]
    pub artifacts: Vec<ArtifactKind>,
}

impl DependencyDecl {
    /// Whether the dependency exposes `kind`.
    pub fn exposes(&self, kind: ArtifactKind) -> bool {
        self.artifacts.contains(&kind)
    }
}

/// Post-build copy of files matching `pattern` from `from` into `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyRule {
    /// Source directory, relative to the package root
    pub from: PathBuf,
    /// Glob over file names, e.g. `*.dylib`
    pub pattern: String,
    /// Destination directory, relative to the output root
    pub to: PathBuf,
}

/// A `[[target]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDecl {
    /// Target name, unique within the package
    pub name: String,
    /// What is produced
    pub kind: ArtifactKind,
    /// Produced binary name, defaults to `name`
    #[serde(default)]
    pub output: Option<String>,
    /// Artifacts linked by this target
    #[serde(default)]
    pub depends: Vec<ArtifactRef>,
    /// Post-build copy rules
    #[serde(default)]
    pub copy: Vec<CopyRule>,
}

impl TargetDecl {
    /// Name of the produced binary.
    pub fn output_name(&self) -> &str {
        self.output.as_deref().unwrap_or(&self.name)
    }
}

/// A complete package manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Package identity
    pub package: PackageDecl,
    /// Sibling packages, in declaration order
    #[serde(default)]
    pub dependency: Vec<DependencyDecl>,
    /// Build targets, in declaration order
    #[serde(default)]
    pub target: Vec<TargetDecl>,
}

impl PackageManifest {
    /// Read and parse a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse manifest text.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Parse`] on malformed TOML or bad references.
    pub fn from_toml_str(s: &str) -> Result<Self, ManifestError> {
        Ok(toml::from_str(s)?)
    }

    /// Serialize back to TOML.
    ///
    /// # Errors
    ///
    /// Fails only if a value cannot be represented in TOML.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
        [package]
        name = "cconartist"
        path = "github.com/jurgen-kluft"

        [[dependency]]
        name = "ccore"
        path = "github.com/jurgen-kluft/ccore"

        [[dependency]]
        name = "cunittest"
        artifacts = ["main-lib", "test-lib"]

        [[dependency]]
        name = "cjson"
        artifacts = ["main-lib"]

        [[target]]
        name = "cconartist"
        kind = "main-lib"
        depends = ["ccore:main-lib"]

        [[target]]
        name = "cconartist_app"
        kind = "desktop-app"
        output = "capp"
        depends = [":cconartist", "cjson:main-lib"]

        [[target.copy]]
        from = "source/main/plugins"
        pattern = "*.dylib"
        to = "plugins"
    "#;

    #[test]
    fn test_parse_manifest() {
        let manifest = PackageManifest::from_toml_str(MANIFEST).unwrap();
        assert_eq!(manifest.package.name, "cconartist");
        assert_eq!(manifest.dependency.len(), 3);
        assert!(manifest.dependency[0].exposes(ArtifactKind::TestLib));
        assert!(!manifest.dependency[2].exposes(ArtifactKind::TestLib));

        let app = &manifest.target[1];
        assert_eq!(app.kind, ArtifactKind::DesktopApp);
        assert_eq!(app.output_name(), "capp");
        assert_eq!(manifest.target[0].output_name(), "cconartist");
        assert_eq!(app.depends[0], ArtifactRef::Local("cconartist".into()));
        assert_eq!(app.copy[0].pattern, "*.dylib");
    }

    #[test]
    fn test_artifact_ref_parsing() {
        let r: ArtifactRef = "ccore:test-lib".parse().unwrap();
        assert_eq!(
            r,
            ArtifactRef::External {
                package: "ccore".into(),
                kind: ArtifactKind::TestLib
            }
        );
        assert_eq!(r.to_string(), "ccore:test-lib");
        assert_eq!(":app".parse::<ArtifactRef>().unwrap().to_string(), ":app");

        for bad in ["ccore", "ccore:", ":", "a:b:c", "ccore:desktop-app"] {
            assert!(bad.parse::<ArtifactRef>().is_err(), "{bad} should fail");
        }
        assert!(matches!(
            "ccore:shared".parse::<ArtifactRef>(),
            Err(ManifestError::UnknownKind(_))
        ));
    }

    #[test]
    fn test_bad_reference_in_toml() {
        let text = r#"
            [package]
            name = "p"
            path = "x"
            [[target]]
            name = "t"
            kind = "main-lib"
            depends = ["nonsense"]
        "#;
        assert!(matches!(
            PackageManifest::from_toml_str(text),
            Err(ManifestError::Parse(_))
        ));
    }

    #[test]
    fn test_dependency_exposes_only_libraries() {
        for kind in ["desktop-app", "unittest"] {
            let text = format!(
                "[package]\nname = \"p\"\npath = \"x\"\n[[dependency]]\nname = \"ccore\"\nartifacts = [\"main-lib\", \"{kind}\"]\n"
            );
            let err = PackageManifest::from_toml_str(&text).unwrap_err();
            assert!(err.to_string().contains("not a library kind"), "{kind}: {err}");
        }
    }

    #[test]
    fn test_toml_roundtrip_keeps_refs() {
        let manifest = PackageManifest::from_toml_str(MANIFEST).unwrap();
        let text = manifest.to_toml_string().unwrap();
        assert!(text.contains(":cconartist"));
        assert_eq!(PackageManifest::from_toml_str(&text).unwrap(), manifest);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            PackageManifest::load(&dir.path().join("package.toml")),
            Err(ManifestError::Io { .. })
        ));
    }
}
