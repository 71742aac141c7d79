//! Hosted registry source
//!
//! Packages published to a Keel package registry over HTTP. The description
//! is the registry base URL; two descriptions denote the same registry when
//! their URLs are equal modulo a trailing slash.

use super::{Source, SourceError};
use crate::manifest::{Dependency, PackageManifest};
use crate::package::{Description, PackageId, PackageRef};
use crate::semver::Version;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Default registry URL
pub const DEFAULT_REGISTRY: &str = "https://pkg.keel-lang.org/api/v1";

/// Package metadata from the registry
///
/// Response from GET /packages/{name}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageMetadata {
    /// Package name
    pub name: String,

    /// List of available versions, newest first
    pub versions: Vec<String>,

    /// Package description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Version information from the registry
///
/// Response from GET /packages/{name}/{version}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Package name
    pub name: String,

    /// Version number
    pub version: String,

    /// SHA-256 checksum of the package archive
    pub checksum: String,

    /// Download information
    pub download: VersionDownload,

    /// Dependencies (name -> version constraint)
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,

    /// Environment constraints (magic package name -> constraint),
    /// e.g. the minimum Keel SDK version
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Feature-gated dependency groups
    #[serde(default)]
    pub features: BTreeMap<String, BTreeMap<String, String>>,
}

/// Download information for a package version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionDownload {
    /// Download URL for the package archive
    pub url: String,
}

/// Source for packages hosted on an HTTP registry
#[derive(Debug)]
pub struct HostedSource {
    client: Client,
}

impl HostedSource {
    /// Create the hosted source with the standard HTTP client settings
    pub fn new() -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("keelpm/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HostedSource { client })
    }

    /// Canonical registry URL for a raw description
    ///
    /// Accepts a bare URL string (empty means the default registry) or a
    /// table with a `url` key. Trailing slashes are insignificant.
    fn canonical_url(description: &Description) -> Result<String, SourceError> {
        let raw = match description {
            Description::String(s) => s.as_str(),
            Description::Table(table) => match table.get("url") {
                Some(Description::String(s)) => s.as_str(),
                _ => {
                    return Err(SourceError::parse(
                        "hosted description",
                        "expected a registry url",
                    ))
                }
            },
            _ => {
                return Err(SourceError::parse(
                    "hosted description",
                    "expected a registry url",
                ))
            }
        };

        if raw.is_empty() {
            return Ok(DEFAULT_REGISTRY.to_string());
        }

        let url = Url::parse(raw)
            .map_err(|e| SourceError::parse(format!("registry url '{}'", raw), e))?;
        Ok(url.as_str().trim_end_matches('/').to_string())
    }

    fn registry_of(&self, package: &PackageRef) -> Result<String, SourceError> {
        let description = package.description().ok_or_else(|| {
            SourceError::parse("hosted ref", format!("{} has no description", package.name()))
        })?;
        Self::canonical_url(description)
    }

    fn get_metadata(&self, base: &str, name: &str) -> Result<PackageMetadata, SourceError> {
        let url = format!("{}/packages/{}", base, name);
        let response = self.client.get(&url).send()?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::PackageNotFound(name.to_string()));
        }
        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "Registry returned status {}",
                response.status()
            )));
        }

        Ok(response.json()?)
    }

    fn get_version_info(
        &self,
        base: &str,
        name: &str,
        version: &Version,
    ) -> Result<VersionInfo, SourceError> {
        let url = format!("{}/packages/{}/{}", base, name, version);
        let response = self.client.get(&url).send()?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::VersionNotFound {
                package: name.to_string(),
                version: version.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "Registry returned status {}",
                response.status()
            )));
        }

        Ok(response.json()?)
    }

    fn download_url(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        let response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(SourceError::Unavailable(format!(
                "Download failed with status {}",
                response.status()
            )));
        }
        Ok(response.bytes()?.to_vec())
    }

    fn extract_archive(&self, archive: &[u8], target: &Path) -> Result<(), SourceError> {
        use flate2::read::GzDecoder;
        use tar::Archive;

        let decoder = GzDecoder::new(archive);
        let mut archive = Archive::new(decoder);
        archive
            .unpack(target)
            .map_err(|e| SourceError::Unavailable(format!("Failed to extract archive: {}", e)))?;
        Ok(())
    }
}

impl Source for HostedSource {
    fn name(&self) -> &str {
        "hosted"
    }

    fn parse_ref(&self, name: &str, description: &Description) -> Result<PackageRef, SourceError> {
        let canonical = Self::canonical_url(description)?;
        let hash = self.hash_description(&Description::String(canonical.clone()));
        Ok(PackageRef::sourced(
            name,
            self.name(),
            Description::String(canonical),
            hash,
        ))
    }

    fn parse_id(
        &self,
        name: &str,
        version: Version,
        description: &Description,
    ) -> Result<PackageId, SourceError> {
        Ok(self.parse_ref(name, description)?.with_version(version))
    }

    fn descriptions_equal(&self, a: &Description, b: &Description) -> bool {
        match (Self::canonical_url(a), Self::canonical_url(b)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    fn hash_description(&self, description: &Description) -> u64 {
        let mut hasher = DefaultHasher::new();
        match Self::canonical_url(description) {
            Ok(canonical) => canonical.hash(&mut hasher),
            Err(_) => description.to_string().hash(&mut hasher),
        }
        hasher.finish()
    }

    fn list_versions(&self, package: &PackageRef) -> Result<Vec<PackageId>, SourceError> {
        let base = self.registry_of(package)?;
        let metadata = self.get_metadata(&base, package.name())?;

        let mut versions: Vec<Version> = metadata
            .versions
            .iter()
            .filter_map(|v| Version::parse(v).ok())
            .collect();
        // Newest first; equal versions keep the registry's listing order
        versions.sort_by(|a, b| b.cmp(a));

        Ok(versions
            .into_iter()
            .map(|v| package.with_version(v))
            .collect())
    }

    fn describe_dependencies(&self, id: &PackageId) -> Result<PackageManifest, SourceError> {
        let base = self.registry_of(id.to_ref())?;
        let info = self.get_version_info(&base, id.name(), id.version())?;

        let mut manifest = PackageManifest::new(info.name, info.version);
        for (name, constraint) in info.dependencies {
            manifest
                .dependencies
                .insert(name, Dependency::Simple(constraint));
        }
        manifest.environment = info.environment;
        for (feature, group) in info.features {
            let deps = group
                .into_iter()
                .map(|(name, constraint)| (name, Dependency::Simple(constraint)))
                .collect();
            manifest.features.insert(feature, deps);
        }
        Ok(manifest)
    }

    fn materialize(&self, id: &PackageId, cache_root: &Path) -> Result<PathBuf, SourceError> {
        let base = self.registry_of(id.to_ref())?;
        let info = self.get_version_info(&base, id.name(), id.version())?;

        // Content-addressed by checksum; a hit means the bits are present
        let final_dir = cache_root.join("hosted").join(&info.checksum);
        if final_dir.join("keel.toml").exists() {
            return Ok(final_dir);
        }

        let archive = self.download_url(&info.download.url)?;
        let actual = hex::encode(Sha256::digest(&archive));
        if actual != info.checksum {
            return Err(SourceError::ChecksumMismatch {
                package: id.name().to_string(),
                version: id.version().to_string(),
                expected: info.checksum,
                actual,
            });
        }

        let tmp_dir = cache_root.join("tmp").join(format!(
            "{}-{}-{}",
            id.name(),
            id.version(),
            std::process::id()
        ));
        fs::create_dir_all(&tmp_dir)?;
        self.extract_archive(&archive, &tmp_dir)?;

        if final_dir.exists() {
            fs::remove_dir_all(&final_dir)?;
        }
        if let Some(parent) = final_dir.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&tmp_dir, &final_dir)?;

        Ok(final_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosted() -> HostedSource {
        HostedSource::new().unwrap()
    }

    #[test]
    fn test_empty_description_means_default_registry() {
        let r = hosted()
            .parse_ref("http", &Description::String(String::new()))
            .unwrap();
        assert_eq!(
            r.description(),
            Some(&Description::String(DEFAULT_REGISTRY.to_string()))
        );
    }

    #[test]
    fn test_trailing_slash_is_insignificant() {
        let source = hosted();
        let a = Description::String("https://pkg.keel-lang.org/api/v1/".to_string());
        let b = Description::String("https://pkg.keel-lang.org/api/v1".to_string());
        assert!(source.descriptions_equal(&a, &b));
        assert_eq!(source.hash_description(&a), source.hash_description(&b));

        let ra = source.parse_ref("http", &a).unwrap();
        let rb = source.parse_ref("http", &b).unwrap();
        assert_eq!(ra, rb);
    }

    #[test]
    fn test_distinct_registries_differ() {
        let source = hosted();
        let a = Description::String("https://pkg.keel-lang.org/api/v1".to_string());
        let b = Description::String("https://mirror.example.com/api/v1".to_string());
        assert!(!source.descriptions_equal(&a, &b));
    }

    #[test]
    fn test_table_description() {
        let source = hosted();
        let mut table = toml::Table::new();
        table.insert(
            "url".into(),
            Description::String("https://mirror.example.com/api/v1".to_string()),
        );
        let r = source.parse_ref("http", &Description::Table(table)).unwrap();
        assert_eq!(
            r.description(),
            Some(&Description::String(
                "https://mirror.example.com/api/v1".to_string()
            ))
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        let source = hosted();
        let bad = Description::String("not a url".to_string());
        assert!(source.parse_ref("http", &bad).is_err());
    }

    #[test]
    fn test_deserialize_version_info() {
        let json = r#"{
            "name": "http",
            "version": "1.0.0",
            "checksum": "abc123",
            "download": { "url": "https://pkg.keel-lang.org/http/1.0.0/download" },
            "dependencies": { "sockets": "^1.0.0" },
            "environment": { "keel": "^3.0.0" }
        }"#;

        let info: VersionInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.dependencies["sockets"], "^1.0.0");
        assert_eq!(info.environment["keel"], "^3.0.0");
        assert!(info.features.is_empty());
    }
}
