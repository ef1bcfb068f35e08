//! Manifest model: directory table, resource index and container dependency index
//!
//! A resource path is `directories[directory_index] + "/" + name`. Each
//! container carries the flattened list of containers it depends on, so
//! resolving dependencies never walks a graph.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// A loadable resource and the container that holds it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    /// File name inside its directory, e.g. `title.png`
    pub name: String,

    /// Index into `Manifest::directories`
    pub directory_index: usize,

    /// Index into `Manifest::containers`
    pub container_index: usize,
}

/// A container and its flattened dependency list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    /// Storage name, e.g. `assets/ui/title.pack`
    pub name: String,

    /// Indices into `Manifest::containers`
    #[serde(default)]
    pub dependency_indices: BTreeSet<usize>,

    /// Container length in bytes
    #[serde(default)]
    pub length: u64,

    /// Hex checksum of the container
    #[serde(default)]
    pub hash: String,
}

/// Resolved mapping from resources to containers and from containers to dependencies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Unique directory paths
    #[serde(default)]
    pub directories: Vec<String>,

    #[serde(default)]
    pub resources: Vec<ResourceRef>,

    #[serde(default)]
    pub containers: Vec<ContainerRef>,

    /// Declared variant containers, named `<base>.<variant>`
    #[serde(default)]
    pub variants: Vec<String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory, returning its index (existing index if already present)
    pub fn add_directory<S: Into<String>>(&mut self, path: S) -> usize {
        let path = path.into();
        if let Some(idx) = self.directories.iter().position(|d| *d == path) {
            return idx;
        }
        self.directories.push(path);
        self.directories.len() - 1
    }

    /// Add a container, returning its index
    pub fn add_container<S: Into<String>>(
        &mut self,
        name: S,
        dependency_indices: &[usize],
        length: u64,
        hash: &str,
    ) -> usize {
        self.containers.push(ContainerRef {
            name: name.into(),
            dependency_indices: dependency_indices.iter().copied().collect(),
            length,
            hash: hash.to_string(),
        });
        self.containers.len() - 1
    }

    pub fn add_resource<S: Into<String>>(
        &mut self,
        name: S,
        directory_index: usize,
        container_index: usize,
    ) {
        self.resources.push(ResourceRef {
            name: name.into(),
            directory_index,
            container_index,
        });
    }

    /// Full path of a resource entry, `None` if its directory index is invalid
    pub fn resource_path(&self, resource: &ResourceRef) -> Option<String> {
        self.directories
            .get(resource.directory_index)
            .map(|dir| format!("{}/{}", dir, resource.name))
    }

    /// Build the immutable lookup tables used by the cache.
    ///
    /// Entries pointing at missing containers are skipped and logged.
    pub fn index(&self) -> ManifestIndex {
        let mut dependencies = HashMap::with_capacity(self.containers.len());
        for container in &self.containers {
            let deps: Vec<String> = container
                .dependency_indices
                .iter()
                .filter_map(|&i| match self.containers.get(i) {
                    Some(dep) => Some(dep.name.clone()),
                    None => {
                        tracing::error!(
                            container = %container.name,
                            index = i,
                            "dependency index out of range"
                        );
                        None
                    }
                })
                .collect();
            dependencies.insert(container.name.clone(), deps);
        }

        let mut resources = HashMap::with_capacity(self.resources.len());
        for resource in &self.resources {
            let Some(path) = self.resource_path(resource) else {
                tracing::error!(
                    resource = %resource.name,
                    index = resource.directory_index,
                    "directory index out of range"
                );
                continue;
            };
            match self.containers.get(resource.container_index) {
                Some(container) => {
                    resources.insert(path, container.name.clone());
                }
                None => {
                    tracing::error!(
                        resource = %path,
                        index = resource.container_index,
                        "container does not exist"
                    );
                }
            }
        }

        ManifestIndex {
            resources,
            dependencies,
            variants: self.variants.clone(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::not_found(path));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// Read-only lookup built from a [`Manifest`].
///
/// Replaced wholesale when a new manifest is loaded.
#[derive(Debug, Clone, Default)]
pub struct ManifestIndex {
    resources: HashMap<String, String>,
    dependencies: HashMap<String, Vec<String>>,
    variants: Vec<String>,
}

impl ManifestIndex {
    /// Container that holds the resource at `path`
    pub fn container_for(&self, path: &str) -> Option<&str> {
        self.resources.get(path).map(String::as_str)
    }

    /// Flattened dependency list of a container (empty when unknown)
    pub fn dependencies_of(&self, container: &str) -> &[String] {
        self.dependencies
            .get(container)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains_resource(&self, path: &str) -> bool {
        self.resources.contains_key(path)
    }

    pub fn resource_paths(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn variants(&self) -> &[String] {
        &self.variants
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.dependencies.is_empty()
    }
}
