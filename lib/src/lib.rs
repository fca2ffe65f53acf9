#[macro_use]
mod macros;

pub mod ancillary;
pub mod config;
pub mod reservation;
pub mod transfer;
pub mod transport;

mod catalog;
mod db;
mod error;
mod geo;
mod lineage;
mod marker;
mod pass;
mod product;
mod registry;
mod resource;
mod site;
#[cfg(test)]
mod test_utils;
mod time;

pub use self::{
    ancillary::{Ancillary, AncillaryId, AncillaryResolver, TimeWindow},
    catalog::Catalog,
    config::{FtpConfig, SiteConfig},
    error::{Error, Result},
    geo::Footprint,
    marker::{Marker, MarkerId, MarkerStatus},
    pass::{Pass, PassId},
    product::{Product, ProductId},
    registry::ProductType,
    reservation::{Neighbors, Reservation, ReserveRequest, Reserver, TypeMatch},
    resource::{Location, Resource, ResourceId},
    site::{Site, SiteMap},
    transfer::{TransferAgent, TransferCoordinator, TransferId, TransferStatus},
    transport::{LocalMover, Mover, MoverKind},
};
