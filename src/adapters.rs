use std::{future::Future, time::Duration};

use crate::{
    credentials::Session,
    model::{
        error::{StorageError, TransportError},
        object::{Object, ObjectPage, UploadOptions},
    },
    signer::{SignedUrl, SignedUrlRequest, UrlSigner},
    util,
};

pub mod gcs;
pub mod mock;
pub mod s3;

/// Context of a single transport call.
pub struct Call<'a> {
    pub session: &'a Session,
    pub deadline: Option<Duration>,
}

impl Call<'_> {
    /// Runs an SDK future on the session runtime within the call deadline.
    pub fn block_on<Fut, T>(&self, future: Fut) -> Result<T, TransportError>
    where
        Fut: Future<Output = Result<T, TransportError>>,
    {
        util::poll::poll_until_ready_error(self.session.runtime(), self.deadline, future)
    }
}

/// Object CRUD, ACL and metadata endpoints of a backing store.
///
/// Implementations report raw failures; classification and retries happen
/// in [`crate::client::StorageClient`].
pub trait Transport {
    fn list_page(
        &self,
        call: &Call,
        bucket: &str,
        prefix: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<ObjectPage, TransportError>;

    fn put_object(
        &self,
        call: &Call,
        bucket: &str,
        key: &str,
        body: &[u8],
        options: &UploadOptions,
    ) -> Result<Object, TransportError>;

    fn get_object(&self, call: &Call, bucket: &str, key: &str) -> Result<Vec<u8>, TransportError>;

    fn head_object(&self, call: &Call, bucket: &str, key: &str) -> Result<Object, TransportError>;

    /// Fails with status 404 when the object is absent.
    fn delete_object(&self, call: &Call, bucket: &str, key: &str) -> Result<(), TransportError>;

    /// A single copy request. When [`Transport::copy_precondition_is_atomic`]
    /// holds it fails with status 412 if `overwrite` is false and the
    /// destination exists; otherwise `overwrite` is ignored and the caller
    /// checks the destination beforehand.
    #[allow(clippy::too_many_arguments)]
    fn copy_object(
        &self,
        call: &Call,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        overwrite: bool,
    ) -> Result<Object, TransportError>;

    fn grant_public_read(&self, call: &Call, bucket: &str, key: &str) -> Result<(), TransportError>;

    fn copy_precondition_is_atomic(&self) -> bool {
        true
    }

    fn signer(&self) -> &UrlSigner;

    /// Signs with the key of the API identity itself, e.g. a service
    /// account's private key. `None` when the identity cannot sign.
    fn identity_signed_url(
        &self,
        _call: &Call,
        _req: &SignedUrlRequest,
    ) -> Option<Result<SignedUrl, StorageError>> {
        None
    }
}
