use crate::{
    error::{Error, Result},
    geo::Footprint,
    marker::MarkerId,
    pass::Pass,
    resource::Resource,
    time,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

define_row_id! {
    /// Identifies a product.
    pub struct ProductId;
}

/// A processed data granule.
#[derive(Clone, Debug, PartialEq)]
pub struct Product {
    /// Assigned by the catalog when the product is stored.
    pub id: Option<ProductId>,
    pub product_type: String,
    pub start_time: DateTime<Utc>,
    pub stop_time: DateTime<Utc>,
    pub creation: DateTime<Utc>,
    pub pass: Pass,
    pub footprint: Footprint,
    pub delete_protected: bool,
    pub agent: Option<String>,
    pub algorithm: Option<String>,
    pub algorithm_version: Option<String>,
    /// Files of the product by resource key.
    pub resources: BTreeMap<String, Resource>,
    pub thumbnails: Vec<Resource>,
    /// Files that went into the product but aren't products themselves.
    pub contributors: Vec<Resource>,
    /// Products this one was derived from.
    pub ancestors: BTreeSet<ProductId>,
    /// Subtype name. Attributes are only meaningful when this is set.
    pub subproduct: Option<String>,
    pub attributes: BTreeMap<String, String>,
    /// Claim ticket the product was produced under.
    pub marker_id: Option<MarkerId>,
}

impl Product {
    pub fn new(
        product_type: impl Into<String>,
        pass: Pass,
        start_time: DateTime<Utc>,
        stop_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            product_type: product_type.into(),
            start_time,
            stop_time,
            creation: time::now(),
            pass,
            footprint: Footprint::default(),
            delete_protected: false,
            agent: None,
            algorithm: None,
            algorithm_version: None,
            resources: BTreeMap::new(),
            thumbnails: Vec::new(),
            contributors: Vec::new(),
            ancestors: BTreeSet::new(),
            subproduct: None,
            attributes: BTreeMap::new(),
            marker_id: None,
        }
    }

    pub fn with_resource(mut self, key: impl Into<String>, resource: Resource) -> Self {
        self.resources.insert(key.into(), resource);
        self
    }

    pub fn with_thumbnail(mut self, resource: Resource) -> Self {
        self.thumbnails.push(resource);
        self
    }

    pub fn with_contributor(mut self, resource: Resource) -> Self {
        self.contributors.push(resource);
        self
    }

    pub fn with_ancestor(mut self, id: ProductId) -> Self {
        self.ancestors.insert(id);
        self
    }

    pub fn with_algorithm(
        self,
        agent: impl Into<String>,
        algorithm: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            agent: Some(agent.into()),
            algorithm: Some(algorithm.into()),
            algorithm_version: Some(version.into()),
            ..self
        }
    }

    pub fn with_subproduct(self, name: impl Into<String>) -> Self {
        Self {
            subproduct: Some(name.into()),
            ..self
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_footprint(self, footprint: Footprint) -> Self {
        Self { footprint, ..self }
    }

    pub fn with_marker(self, marker_id: MarkerId) -> Self {
        Self {
            marker_id: Some(marker_id),
            ..self
        }
    }

    pub fn protected(self) -> Self {
        Self {
            delete_protected: true,
            ..self
        }
    }

    pub fn resource(&self, key: &str) -> Option<&Resource> {
        self.resources.get(key)
    }

    /// Whether every resource has a copy on the acting site. Fails on a product without
    /// resources.
    pub fn resources_are_local(&self) -> Result<bool> {
        if self.resources.is_empty() {
            return Err(Error::NoResources);
        }

        Ok(self.resources.values().all(Resource::is_local))
    }
}
