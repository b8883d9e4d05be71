pub mod adapters;
pub mod client;
pub mod config;
pub mod credentials;
pub mod model;
pub mod retry;
pub mod signer;
pub mod snippets;
pub mod util;

pub use client::{ClientOptions, ObjectListing, StorageClient};
pub use credentials::{CredentialProvider, Session};
pub use model::{
    error::{ErrorKind, StorageError},
    object::{Object, UploadOptions},
};
pub use retry::RetryPolicy;
pub use signer::{HmacKey, SignedUrl, UrlSigner};
