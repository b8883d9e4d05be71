use aws_config::retry::RetryConfig;
use aws_sdk_s3::{
    config::Credentials,
    error::{DisplayErrorContext, SdkError},
    operation::copy_object::CopyObjectOutput,
    primitives::{ByteStream, DateTime},
    types::ObjectCannedAcl,
};
use time::OffsetDateTime;
use tracing::info;

use crate::{
    adapters::{Call, Transport},
    credentials::{Identity, Session},
    model::{
        error::{Failure, StorageError, TransportError},
        object::{Object, ObjectPage, UploadOptions},
    },
    signer::{self, UrlSigner},
    util,
};

pub struct S3Transport {
    client: aws_sdk_s3::Client,
    signer: UrlSigner,
}

impl S3Transport {
    pub fn connect(session: &Session, region: &str) -> Result<Self, StorageError> {
        let config = util::poll::poll_until_ready(
            session.runtime(),
            load_config(session.identity(), region.to_string()),
        )?;
        info!(region = region, identity = ?session.identity(), "connected to s3");

        Ok(Self {
            client: aws_sdk_s3::Client::new(&config),
            signer: UrlSigner::s3(region),
        })
    }
}

async fn load_config(identity: &Identity, region: String) -> Result<aws_config::SdkConfig, StorageError> {
    // Retries belong to `RetryPolicy` alone.
    let loader = aws_config::from_env()
        .region(aws_config::Region::new(region))
        .retry_config(RetryConfig::disabled());

    let loader = match identity {
        Identity::AccessKey(key) => loader.credentials_provider(Credentials::new(
            key.access_id.clone(),
            key.secret().to_string(),
            None,
            None,
            "objectclient",
        )),
        Identity::Ambient => loader,
        Identity::Anonymous => loader.no_credentials(),
        Identity::ServiceAccountFile(_) | Identity::ServiceAccountJson(_) => {
            return Err(StorageError::InvalidArgument(
                "a gcs service account cannot authenticate s3 api calls".to_string(),
            ))
        }
    };

    Ok(loader.load().await)
}

fn failure<E>(operation: &str, target: &str, err: SdkError<E>) -> TransportError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let message = format!("failed to {}: {}, {}", operation, target, DisplayErrorContext(&err));
    match &err {
        SdkError::TimeoutError(_) => TransportError::timeout(message),
        SdkError::DispatchFailure(dispatch) if dispatch.is_timeout() => TransportError::timeout(message),
        SdkError::DispatchFailure(dispatch) if dispatch.is_io() => TransportError::connection(message),
        // Identity resolution runs just before transmit, so a credential
        // provider failure arrives as an unclassified dispatch failure.
        SdkError::DispatchFailure(dispatch) if dispatch.is_other() => {
            TransportError::new(Failure::Auth, message)
        }
        SdkError::DispatchFailure(_) | SdkError::ConstructionFailure(_) => {
            TransportError::new(Failure::Other, message)
        }
        _ => match err.raw_response() {
            Some(raw) => TransportError::status(raw.status().as_u16(), message),
            None => TransportError::new(Failure::Other, message),
        },
    }
}

fn to_time(dt: &DateTime) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos()).ok()
}

/// CopyObject does not report the object size; `size` stays 0.
fn copied_object(bucket: &str, key: &str, co: &CopyObjectOutput) -> Object {
    let result = co.copy_object_result();
    let etag = result.and_then(|r| r.e_tag());

    Object {
        bucket: bucket.to_string(),
        key: key.to_string(),
        generation: co.version_id().or(etag).map(str::to_string),
        etag: etag.map(str::to_string),
        updated: result.and_then(|r| r.last_modified()).and_then(to_time),
        public: Some(false),
        ..Default::default()
    }
}

impl Transport for S3Transport {
    fn list_page(
        &self,
        call: &Call,
        bucket: &str,
        prefix: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<ObjectPage, TransportError> {
        let req = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_prefix(prefix.map(str::to_string))
            .set_continuation_token(page_token.map(str::to_string));

        let lo = call.block_on(async {
            req.send()
                .await
                .map_err(|err| failure("list_objects", prefix.unwrap_or(bucket), err))
        })?;

        let objects = lo
            .contents()
            .iter()
            .map(|o| Object {
                bucket: bucket.to_string(),
                key: o.key().unwrap_or("").to_string(),
                size: o.size().unwrap_or(0) as u64,
                etag: o.e_tag().map(str::to_string),
                generation: o.e_tag().map(str::to_string),
                storage_class: o.storage_class().map(|class| class.as_str().to_string()),
                updated: o.last_modified().and_then(to_time),
                ..Default::default()
            })
            .collect();

        Ok(ObjectPage {
            objects,
            next_page_token: lo.next_continuation_token().map(str::to_string),
        })
    }

    fn put_object(
        &self,
        call: &Call,
        bucket: &str,
        key: &str,
        body: &[u8],
        options: &UploadOptions,
    ) -> Result<Object, TransportError> {
        let metadata = if options.metadata.is_empty() {
            None
        } else {
            Some(options.metadata.clone())
        };

        let req = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(options.content_type())
            .set_metadata(metadata)
            .body(ByteStream::from(body.to_vec()));

        let po = call.block_on(async {
            req.send()
                .await
                .map_err(|err| failure("put_object", key, err))
        })?;

        Ok(Object {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: body.len() as u64,
            content_type: Some(options.content_type().to_string()),
            metadata: options.metadata.clone(),
            generation: po.version_id().or(po.e_tag()).map(str::to_string),
            etag: po.e_tag().map(str::to_string),
            updated: Some(OffsetDateTime::now_utc()),
            public: Some(false),
            ..Default::default()
        })
    }

    fn get_object(&self, call: &Call, bucket: &str, key: &str) -> Result<Vec<u8>, TransportError> {
        let req = self.client.get_object().bucket(bucket).key(key);

        call.block_on(async {
            let o = req
                .send()
                .await
                .map_err(|err| failure("get_object", key, err))?;

            let bytes = o.body.collect().await.map_err(|err| {
                TransportError::connection(format!("failed to collect body: {}, {}", key, err))
            })?;

            Ok(bytes.into_bytes().to_vec())
        })
    }

    fn head_object(&self, call: &Call, bucket: &str, key: &str) -> Result<Object, TransportError> {
        let req = self.client.head_object().bucket(bucket).key(key);

        let ho = call.block_on(async {
            req.send()
                .await
                .map_err(|err| failure("head_object", key, err))
        })?;

        Ok(Object {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: ho.content_length().unwrap_or(0) as u64,
            content_type: ho.content_type().map(str::to_string),
            metadata: ho.metadata().cloned().unwrap_or_default(),
            generation: ho.version_id().or(ho.e_tag()).map(str::to_string),
            etag: ho.e_tag().map(str::to_string),
            storage_class: ho.storage_class().map(|class| class.as_str().to_string()),
            updated: ho.last_modified().and_then(to_time),
            ..Default::default()
        })
    }

    fn delete_object(&self, call: &Call, bucket: &str, key: &str) -> Result<(), TransportError> {
        // S3 acknowledges deletes of absent keys, so check first.
        self.head_object(call, bucket, key)?;

        let req = self.client.delete_object().bucket(bucket).key(key);
        call.block_on(async {
            req.send()
                .await
                .map(|_| ())
                .map_err(|err| failure("delete_object", key, err))
        })
    }

    fn copy_object(
        &self,
        call: &Call,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        _overwrite: bool,
    ) -> Result<Object, TransportError> {
        let req = self
            .client
            .copy_object()
            .copy_source(format!("{}/{}", src_bucket, signer::encode_key(src_key)))
            .bucket(dst_bucket)
            .key(dst_key);

        let co = call.block_on(async {
            req.send()
                .await
                .map_err(|err| failure("copy_object", src_key, err))
        })?;

        Ok(copied_object(dst_bucket, dst_key, &co))
    }

    /// S3 has no create-only precondition on CopyObject.
    fn copy_precondition_is_atomic(&self) -> bool {
        false
    }

    fn grant_public_read(&self, call: &Call, bucket: &str, key: &str) -> Result<(), TransportError> {
        let req = self
            .client
            .put_object_acl()
            .bucket(bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead);

        call.block_on(async {
            req.send()
                .await
                .map(|_| ())
                .map_err(|err| failure("put_object_acl", key, err))
        })
    }

    fn signer(&self) -> &UrlSigner {
        &self.signer
    }
}
