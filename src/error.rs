use thiserror::Error;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("schema error: {0}")]
    Schema(String),
    #[error("unknown type: {0}")]
    UnknownType(String),
    #[error("unknown property: {0}")]
    UnknownProperty(String),
    #[error("unknown edge: {0}")]
    UnknownEdge(String),
    #[error("No index covers query [{0}]")]
    NoCoveringIndex(String),
    #[error("edge {0} is derived and read-only")]
    ReadOnlyEdge(String),
    #[error("property {0} is maintained by a rollup and read-only")]
    ReadOnlyProperty(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
