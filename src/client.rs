use std::{
    collections::VecDeque,
    io::Write,
    path::Path,
    time::Duration,
};

use tracing::{info, span, Level};

use crate::{
    adapters::{gcs::GcsTransport, s3::S3Transport, Call, Transport},
    credentials::Session,
    model::{
        error::{StorageError, TransportError},
        object::{Object, UploadOptions},
    },
    retry::{Idempotency, RetryPolicy},
    signer::{SignedUrl, SignedUrlRequest},
    util::{self, object::Provider},
};

#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub retry: RetryPolicy,
    /// Passed to every transport call; expiry fails the call as transient.
    pub deadline: Option<Duration>,
    /// Let copy and rename replace an existing destination.
    pub overwrite_existing: bool,
    pub s3_region: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            deadline: Some(Duration::from_secs(30)),
            overwrite_existing: false,
            s3_region: "us-east-1".to_string(),
        }
    }
}

/// Blocking object-storage client. Owns its session; not meant to be shared
/// between threads, create one client per worker instead.
pub struct StorageClient {
    session: Session,
    transport: Box<dyn Transport>,
    options: ClientOptions,
}

impl StorageClient {
    pub fn new(session: Session, transport: Box<dyn Transport>, options: ClientOptions) -> Self {
        Self {
            session,
            transport,
            options,
        }
    }

    /// Builds the transport matching the session's provider.
    pub fn connect(session: Session, options: ClientOptions) -> Result<Self, StorageError> {
        let transport: Box<dyn Transport> = match session.provider() {
            Provider::Gcs => Box::new(GcsTransport::connect(&session)?),
            Provider::S3 => Box::new(S3Transport::connect(&session, &options.s3_region)?),
        };

        Ok(Self::new(session, transport, options))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    fn call(&self) -> Call<'_> {
        Call {
            session: &self.session,
            deadline: self.options.deadline,
        }
    }

    /// Retries apply to the single transport call made by `f`.
    fn run<T, F>(&self, operation: &str, mode: Idempotency, mut f: F) -> Result<T, StorageError>
    where
        F: FnMut(&dyn Transport, &Call) -> Result<T, TransportError>,
    {
        let call = self.call();

        self.options
            .retry
            .execute_with_retry(operation, mode, || f(self.transport.as_ref(), &call))
            .map_err(StorageError::from)
    }

    fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<crate::model::object::ObjectPage, StorageError> {
        util::object::validate_name("bucket", bucket)?;
        self.run("list_objects", Idempotency::Idempotent, |t, call| {
            t.list_page(call, bucket, prefix, page_token)
        })
    }

    /// Objects of `bucket` in key order, fetched page by page while iterating.
    pub fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> ObjectListing<'_> {
        ObjectListing {
            client: self,
            bucket: bucket.to_string(),
            prefix: prefix.map(str::to_string),
        }
    }

    pub fn upload(&self, bucket: &str, local_path: &Path, dest_key: &str) -> Result<Object, StorageError> {
        self.upload_with(bucket, local_path, dest_key, &UploadOptions::default())
    }

    pub fn upload_with(
        &self,
        bucket: &str,
        local_path: &Path,
        dest_key: &str,
        options: &UploadOptions,
    ) -> Result<Object, StorageError> {
        let body = std::fs::read(local_path).map_err(|err| StorageError::local(local_path, err))?;
        self.upload_bytes(bucket, dest_key, &body, options)
    }

    pub fn upload_bytes(
        &self,
        bucket: &str,
        key: &str,
        body: &[u8],
        options: &UploadOptions,
    ) -> Result<Object, StorageError> {
        util::object::validate_name("bucket", bucket)?;
        util::object::validate_name("key", key)?;

        let span = span!(Level::INFO, "upload", bucket = bucket, key = key);
        let _e = span.enter();

        let object = self.run("upload", Idempotency::SideEffect, |t, call| {
            t.put_object(call, bucket, key, body, options)
        })?;
        info!(size = body.len(), generation = ?object.generation, "uploaded");

        Ok(object)
    }

    pub fn download_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        util::object::validate_name("bucket", bucket)?;
        util::object::validate_name("key", key)?;

        self.run("download", Idempotency::Idempotent, |t, call| {
            t.get_object(call, bucket, key)
        })
    }

    /// Writes the object to `local_path` through a temporary file in the same
    /// directory, so a failed download never leaves a partial file behind.
    pub fn download(&self, bucket: &str, key: &str, local_path: &Path) -> Result<u64, StorageError> {
        let span = span!(Level::INFO, "download", bucket = bucket, key = key);
        let _e = span.enter();

        let data = self.download_bytes(bucket, key)?;

        let dir = match local_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let local = |err: std::io::Error| StorageError::local(local_path, err);

        let existing = std::fs::metadata(local_path).ok().map(|meta| meta.permissions());

        let mut tmp = temp_file_in(dir).map_err(local)?;
        if let Some(permissions) = existing {
            tmp.as_file().set_permissions(permissions).map_err(local)?;
        }
        tmp.write_all(&data).map_err(local)?;
        tmp.as_file().sync_all().map_err(local)?;
        tmp.persist(local_path).map_err(|err| local(err.error))?;

        info!(size = data.len(), path = %local_path.display(), "downloaded");
        Ok(data.len() as u64)
    }

    pub fn get_metadata(&self, bucket: &str, key: &str) -> Result<Object, StorageError> {
        util::object::validate_name("bucket", bucket)?;
        util::object::validate_name("key", key)?;

        self.run("get_metadata", Idempotency::Idempotent, |t, call| {
            t.head_object(call, bucket, key)
        })
    }

    /// Fails with `NotFound` when the object does not exist.
    pub fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        util::object::validate_name("bucket", bucket)?;
        util::object::validate_name("key", key)?;

        self.run("delete", Idempotency::SideEffect, |t, call| {
            t.delete_object(call, bucket, key)
        })?;
        info!(bucket = bucket, key = key, "deleted");

        Ok(())
    }

    /// Makes sure the object is gone. `true` when the final attempt deleted
    /// it, `false` when that attempt found nothing, which includes an earlier
    /// timed-out attempt having already removed it.
    pub fn delete_if_exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        util::object::validate_name("bucket", bucket)?;
        util::object::validate_name("key", key)?;

        match self.run("delete_if_exists", Idempotency::Idempotent, |t, call| {
            t.delete_object(call, bucket, key)
        }) {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn make_public(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        util::object::validate_name("bucket", bucket)?;
        util::object::validate_name("key", key)?;

        self.run("make_public", Idempotency::Idempotent, |t, call| {
            t.grant_public_read(call, bucket, key)
        })?;
        info!(bucket = bucket, key = key, "granted public read");

        Ok(())
    }

    pub fn public_url(&self, bucket: &str, key: &str) -> String {
        self.transport.signer().public_url(bucket, key)
    }

    pub fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<Object, StorageError> {
        for (what, value) in [
            ("source bucket", src_bucket),
            ("source key", src_key),
            ("destination bucket", dst_bucket),
            ("destination key", dst_key),
        ] {
            util::object::validate_name(what, value)?;
        }

        let span = span!(Level::INFO, "copy", src_bucket = src_bucket, src_key = src_key);
        let _e = span.enter();

        let overwrite = self.options.overwrite_existing;
        if !overwrite && !self.transport.copy_precondition_is_atomic() {
            self.ensure_absent(dst_bucket, dst_key)?;
        }

        let object = self.run("copy", Idempotency::SideEffect, |t, call| {
            t.copy_object(call, src_bucket, src_key, dst_bucket, dst_key, overwrite)
        })?;
        info!(dst_bucket = dst_bucket, dst_key = dst_key, "copied");

        Ok(object)
    }

    /// Destination check for stores without a create-only copy precondition.
    /// Runs once, ahead of the copy send and its retries.
    fn ensure_absent(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        match self.run("copy_precheck", Idempotency::Idempotent, |t, call| {
            t.head_object(call, bucket, key)
        }) {
            Ok(_) => Err(StorageError::AlreadyExists(format!(
                "destination exists: {}/{}",
                bucket, key
            ))),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Copy followed by delete. When the copy succeeds but the delete fails the
    /// error is `PartialFailure` and both objects exist.
    pub fn rename(&self, bucket: &str, old_key: &str, new_key: &str) -> Result<Object, StorageError> {
        if old_key == new_key {
            return Err(StorageError::InvalidArgument(format!(
                "cannot rename {} onto itself",
                old_key
            )));
        }

        let copied = self.copy(bucket, old_key, bucket, new_key)?;

        match self.delete(bucket, old_key) {
            Ok(()) => Ok(copied),
            // Someone else removed the source; the rename outcome holds.
            Err(err) if err.is_not_found() => Ok(copied),
            Err(err) => Err(StorageError::PartialFailure {
                completed: format!("copied {}/{} to {}/{}", bucket, old_key, bucket, new_key),
                source: Box::new(err),
            }),
        }
    }

    /// GET URL valid for `ttl` from now.
    pub fn generate_signed_url(&self, bucket: &str, key: &str, ttl: Duration) -> Result<SignedUrl, StorageError> {
        self.generate_signed_url_with(&SignedUrlRequest::get(bucket, key, ttl))
    }

    /// Signs with the service account key when the session has one, else
    /// with the session's HMAC key.
    pub fn generate_signed_url_with(&self, req: &SignedUrlRequest) -> Result<SignedUrl, StorageError> {
        if let Some(signed) = self.transport.identity_signed_url(&self.call(), req) {
            return signed;
        }

        let key = self.session.signing_key().ok_or_else(|| {
            StorageError::Unauthenticated(
                "session has neither a service account key nor an hmac key for signing"
                    .to_string(),
            )
        })?;

        self.transport.signer().sign(key, req)
    }
}

/// New files get the default mode for the process umask rather than the
/// owner-only mode of a temp file.
fn temp_file_in(dir: &Path) -> std::io::Result<tempfile::NamedTempFile> {
    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }
    #[cfg(not(unix))]
    let _ = &mut builder;

    builder.tempfile_in(dir)
}

/// Restartable listing: every [`ObjectListing::iter`] starts from the first page.
pub struct ObjectListing<'a> {
    client: &'a StorageClient,
    bucket: String,
    prefix: Option<String>,
}

impl<'a> ObjectListing<'a> {
    pub fn iter(&self) -> ObjectIter<'a> {
        ObjectIter {
            client: self.client,
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
            buffer: VecDeque::new(),
            next_page_token: None,
            done: false,
        }
    }

    pub fn collect_all(&self) -> Result<Vec<Object>, StorageError> {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for &ObjectListing<'a> {
    type Item = Result<Object, StorageError>;
    type IntoIter = ObjectIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct ObjectIter<'a> {
    client: &'a StorageClient,
    bucket: String,
    prefix: Option<String>,
    buffer: VecDeque<Object>,
    next_page_token: Option<String>,
    done: bool,
}

impl Iterator for ObjectIter<'_> {
    type Item = Result<Object, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(object) = self.buffer.pop_front() {
                return Some(Ok(object));
            }
            if self.done {
                return None;
            }

            let page = match self.client.list_page(
                &self.bucket,
                self.prefix.as_deref(),
                self.next_page_token.as_deref(),
            ) {
                Ok(page) => page,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };

            self.buffer.extend(page.objects);
            self.next_page_token = page.next_page_token;
            self.done = self.next_page_token.is_none();
        }
    }
}
