//! Artifact resolution and download.
//!
//! [`ArtifactResolver`] turns `(flavor, version)` into a [`ResolvedBuild`];
//! [`ArtifactDownloader`] caches that build in the instance's directory.

pub mod catalog;
mod downloader;
pub mod http;
mod resolver;
pub mod version;

pub use downloader::ArtifactDownloader;
pub use http::{ByteStream, HttpClient, ReqwestClient};
pub use resolver::{ArtifactResolver, Checksum, ResolvedBuild};
