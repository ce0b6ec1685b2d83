use crate::cache::CacheError;
use crate::extractor::ExtractError;
use crate::resolver::ResolveError;
use metascope_image::ImageError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetascopeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot enumerate directory {}: {source}", .path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("module image error: {0}")]
    Image(#[from] ImageError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub type Result<T> = std::result::Result<T, MetascopeError>;
