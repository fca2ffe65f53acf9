use crate::{
    config::ConfigError, db, pass::PassId, product::ProductId, time::TimeOutOfRange,
    transfer::TransferId, transport,
};
use std::fmt;
use thiserror::Error;

/// A specialized `Result` type for convenience.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error")]
    Db(#[from] db::Error),
    #[error("transport error")]
    Transport(#[from] transport::Error),
    #[error("configuration error")]
    Config(#[from] ConfigError),
    #[error("product type is not registered: {0}")]
    UnknownProductType(String),
    #[error("product has no resources")]
    NoResources,
    #[error("invalid time window: {0}")]
    InvalidTimeWindow(&'static str),
    #[error("product {0} is delete protected")]
    DeleteProtected(ProductId),
    #[error("product not found: {0}")]
    ProductNotFound(ProductId),
    #[error("pass not found: {0}")]
    PassNotFound(PassId),
    #[error("algorithm {algorithm:?} maps to no claim group but product {product} has ancestors")]
    MissingGroupMapping {
        algorithm: String,
        product: ProductId,
    },
    #[error("unknown site: {0}")]
    UnknownSite(String),
    #[error("no site reachable from here holds {0}")]
    NoReachableSource(String),
    #[error("transfer {0} failed")]
    TransferFailed(TransferId),
    #[error("data is malformed")]
    MalformedData,
}

impl Error {
    /// Returns an object that implements `Display` which prints this error together with its whole
    /// causal chain.
    pub fn verbose(&self) -> Verbose<'_> {
        Verbose(self)
    }
}

impl From<sqlx::Error> for Error {
    fn from(src: sqlx::Error) -> Self {
        Self::Db(src.into())
    }
}

impl From<TimeOutOfRange> for Error {
    fn from(_: TimeOutOfRange) -> Self {
        Self::MalformedData
    }
}

pub struct Verbose<'a>(&'a Error);

impl fmt::Display for Verbose<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use std::error::Error;

        writeln!(f, "{}", self.0)?;

        let mut current = self.0 as &dyn Error;

        while let Some(source) = current.source() {
            writeln!(f, "    caused by: {}", source)?;
            current = source;
        }

        Ok(())
    }
}
