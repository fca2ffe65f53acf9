//! The claim protocol.
//!
//! A worker asks for a product of some type on behalf of a claim group. The reserver scans the
//! catalog for products the group hasn't claimed yet, claims one by inserting its marker, checks
//! that the companions the worker needs are ready too, and hands out the hydrated product with
//! its files present on the worker's site. The marker insert is the only synchronization point
//! between workers.

mod pattern;
mod query;

use self::{
    pattern::TypePattern,
    query::Direction,
};
use crate::{
    catalog::Catalog,
    db,
    error::{Error, Result},
    lineage,
    marker::{self, Claim, MarkerId, MarkerStatus},
    product::{Product, ProductId},
    registry,
    time,
    transfer::TransferCoordinator,
};
use std::time::Duration;
use tokio::time::sleep;
use tracing::instrument;

/// How product type names in a request are matched against registered types.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TypeMatch {
    #[default]
    Exact,
    /// `_` and `%` are wildcards, as in SQL `LIKE`.
    Like,
}

/// Temporally adjacent granules required alongside the main product.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Neighbors {
    pub granule_duration: Duration,
    /// Number of granules required on each side.
    pub count: u32,
}

#[derive(Clone, Debug)]
pub struct ReserveRequest {
    /// Claim group (colony) the product is reserved for.
    pub group: String,
    pub product_type: String,
    /// Types of the products covering the same granule that must be ready as well.
    pub companions: Vec<String>,
    pub matching: TypeMatch,
    pub neighbors: Option<Neighbors>,
}

impl ReserveRequest {
    pub fn new(group: impl Into<String>, product_type: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            product_type: product_type.into(),
            companions: Vec::new(),
            matching: TypeMatch::Exact,
            neighbors: None,
        }
    }

    pub fn with_companion(mut self, product_type: impl Into<String>) -> Self {
        self.companions.push(product_type.into());
        self
    }

    pub fn with_companions<I>(mut self, product_types: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.companions
            .extend(product_types.into_iter().map(Into::into));
        self
    }

    /// Match the type names as `LIKE` patterns. The fragments matched by the main type's
    /// wildcards fill the wildcards of the companion types.
    pub fn like(self) -> Self {
        Self {
            matching: TypeMatch::Like,
            ..self
        }
    }

    pub fn with_neighbors(self, granule_duration: Duration, count: u32) -> Self {
        Self {
            neighbors: Some(Neighbors {
                granule_duration,
                count,
            }),
            ..self
        }
    }
}

/// A claimed work unit.
#[derive(Clone, Debug)]
pub struct Reservation {
    pub marker: MarkerId,
    pub product: Product,
    /// In the order of the requested companion types.
    pub companions: Vec<Product>,
    /// Nearest first.
    pub previous: Vec<Product>,
    /// Nearest first.
    pub next: Vec<Product>,
}

/// Concrete main and companion types a request resolved to.
#[derive(Clone, Debug, Eq, PartialEq)]
struct Instantiation {
    main: String,
    companions: Vec<String>,
}

struct Claimed {
    marker: MarkerId,
    product: ProductId,
    companions: Vec<ProductId>,
    previous: Vec<ProductId>,
    next: Vec<ProductId>,
}

pub struct Reserver {
    catalog: Catalog,
    transfers: TransferCoordinator,
    claimant: String,
}

impl Reserver {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            transfers: TransferCoordinator::new(catalog.clone()),
            claimant: catalog.config().claimant(),
            catalog,
        }
    }

    /// Reserves a product, waiting for one to become available for as long as it takes.
    ///
    /// Fails right away if a requested type isn't registered. Apply a timeout to bound the wait.
    #[instrument(skip_all, fields(group = %request.group, product_type = %request.product_type))]
    pub async fn reserve(&self, request: &ReserveRequest) -> Result<Reservation> {
        let instantiations = self.resolve_types(request).await?;

        loop {
            if let Some(reservation) = self.scan(request, &instantiations).await? {
                return Ok(reservation);
            }

            sleep(self.catalog.config().claim_poll_interval).await;
        }
    }

    /// Like `reserve` but scans the catalog only once.
    pub async fn try_reserve(&self, request: &ReserveRequest) -> Result<Option<Reservation>> {
        let instantiations = self.resolve_types(request).await?;
        self.scan(request, &instantiations).await
    }

    /// Sets the final status of a claim. The marker itself is never removed. Returns whether the
    /// marker exists.
    pub async fn release(
        &self,
        group: &str,
        product: ProductId,
        status: MarkerStatus,
    ) -> Result<bool> {
        let mut tx = self.catalog.pool().begin_write().await?;
        let found = marker::set_status(&mut tx, product, group, status).await?;
        tx.commit().await?;

        Ok(found)
    }

    async fn resolve_types(&self, request: &ReserveRequest) -> Result<Vec<Instantiation>> {
        let mut conn = self.catalog.pool().acquire().await?;

        match request.matching {
            TypeMatch::Exact => {
                for name in std::iter::once(&request.product_type).chain(&request.companions) {
                    if !registry::product_type_exists(&mut conn, name).await? {
                        return Err(Error::UnknownProductType(name.clone()));
                    }
                }

                Ok(vec![Instantiation {
                    main: request.product_type.clone(),
                    companions: request.companions.clone(),
                }])
            }
            TypeMatch::Like => {
                let names = registry::product_type_names(&mut conn).await?;
                let instantiations = instantiate(&request.product_type, &request.companions, &names)?;

                if instantiations.is_empty() {
                    return Err(Error::UnknownProductType(request.product_type.clone()));
                }

                Ok(instantiations)
            }
        }
    }

    async fn scan(
        &self,
        request: &ReserveRequest,
        instantiations: &[Instantiation],
    ) -> Result<Option<Reservation>> {
        let site = self.catalog.site_name();

        let mut candidates = Vec::new();
        {
            let mut conn = self.catalog.pool().acquire().await?;

            for (index, instantiation) in instantiations.iter().enumerate() {
                for (start_time, id) in
                    query::candidates(&mut conn, &instantiation.main, &request.group, site).await?
                {
                    candidates.push((start_time, id, index));
                }
            }
        }

        candidates.sort();

        for (_, id, index) in candidates {
            let Some(claimed) = self.claim(request, &instantiations[index], id).await? else {
                continue;
            };

            match self.prepare(&claimed).await {
                Ok(reservation) => return Ok(Some(reservation)),
                Err(error) => {
                    tracing::error!(
                        product = %id,
                        group = %request.group,
                        error = %error.verbose(),
                        "failed to prepare reserved product"
                    );

                    self.release(&request.group, id, MarkerStatus::Failed)
                        .await?;
                }
            }
        }

        Ok(None)
    }

    /// Claims the candidate if nobody else did and everything it needs is ready. Otherwise the
    /// transaction is rolled back and no marker is left behind.
    async fn claim(
        &self,
        request: &ReserveRequest,
        instantiation: &Instantiation,
        id: ProductId,
    ) -> Result<Option<Claimed>> {
        let site = self.catalog.site_name();
        let mut tx = self.catalog.pool().begin_write().await?;

        let marker = match marker::claim(&mut tx, id, &request.group, &self.claimant).await? {
            Claim::Won(marker) => marker,
            Claim::Lost => return Ok(None),
            Claim::Unexpected(count) => {
                tracing::error!(
                    product = %id,
                    group = %request.group,
                    count,
                    "claim affected an unexpected number of rows"
                );
                return Ok(None);
            }
        };

        let mut companions = Vec::with_capacity(instantiation.companions.len());

        for product_type in &instantiation.companions {
            match query::companion(&mut tx, id, product_type, site).await? {
                Some(companion) => companions.push(companion),
                None => {
                    tracing::debug!(product = %id, companion = %product_type, "companion not ready");
                    return Ok(None);
                }
            }
        }

        let (previous, next) = match request.neighbors {
            Some(neighbors) => match find_neighbors(&mut tx, id, neighbors, site).await? {
                Some(found) => found,
                None => {
                    tracing::debug!(product = %id, "neighbors not ready");
                    return Ok(None);
                }
            },
            None => (Vec::new(), Vec::new()),
        };

        tx.commit().await?;

        tracing::debug!(product = %id, %marker, "claimed");

        Ok(Some(Claimed {
            marker,
            product: id,
            companions,
            previous,
            next,
        }))
    }

    /// Loads the claimed products and brings their files to this site.
    async fn prepare(&self, claimed: &Claimed) -> Result<Reservation> {
        Ok(Reservation {
            marker: claimed.marker,
            product: self.hydrate(claimed.product).await?,
            companions: self.hydrate_all(&claimed.companions).await?,
            previous: self.hydrate_all(&claimed.previous).await?,
            next: self.hydrate_all(&claimed.next).await?,
        })
    }

    async fn hydrate_all(&self, ids: &[ProductId]) -> Result<Vec<Product>> {
        let mut products = Vec::with_capacity(ids.len());

        for id in ids {
            products.push(self.hydrate(*id).await?);
        }

        Ok(products)
    }

    async fn hydrate(&self, id: ProductId) -> Result<Product> {
        let mut product = {
            let mut conn = self.catalog.pool().acquire().await?;
            lineage::load(&mut conn, id, self.catalog.site_name()).await?
        };

        if !product.resources_are_local()? {
            self.transfers.localize_product(&mut product).await?;
        }

        Ok(product)
    }
}

/// Resolves `LIKE` patterns against the registered type names. Instantiations some of whose
/// companions aren't registered are dropped.
fn instantiate(
    main: &str,
    companions: &[String],
    registered: &[String],
) -> Result<Vec<Instantiation>> {
    let pattern =
        TypePattern::new(main).map_err(|_| Error::UnknownProductType(main.to_owned()))?;

    Ok(registered
        .iter()
        .filter_map(|name| {
            let captures = pattern.captures(name)?;
            let companions: Vec<_> = companions
                .iter()
                .map(|companion| pattern::substitute(companion, &captures))
                .collect();

            companions
                .iter()
                .all(|companion| registered.contains(companion))
                .then(|| Instantiation {
                    main: name.clone(),
                    companions,
                })
        })
        .collect())
}

async fn find_neighbors(
    conn: &mut db::Connection,
    id: ProductId,
    neighbors: Neighbors,
    site: &str,
) -> Result<Option<(Vec<ProductId>, Vec<ProductId>)>> {
    let Some(granule) = query::granule(conn, id).await? else {
        return Err(Error::ProductNotFound(id));
    };

    let duration = time::duration_millis(neighbors.granule_duration);
    let mut previous = Vec::with_capacity(neighbors.count as usize);
    let mut next = Vec::with_capacity(neighbors.count as usize);

    for slot in 1..=neighbors.count {
        for (direction, found) in [
            (Direction::Previous, &mut previous),
            (Direction::Next, &mut next),
        ] {
            match query::neighbor(conn, id, &granule, direction, slot, duration, site).await? {
                Some(neighbor) => found.push(neighbor),
                None => return Ok(None),
            }
        }
    }

    Ok(Some((previous, next)))
}
