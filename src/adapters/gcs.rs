use std::fmt;

use google_cloud_storage::{
    client::{google_cloud_auth::credentials::CredentialsFile, Client, ClientConfig},
    http::{
        object_access_controls::{
            insert::{InsertObjectAccessControlRequest, ObjectAccessControlCreationConfig},
            ObjectACLRole,
        },
        objects::{
            copy::CopyObjectRequest,
            delete::DeleteObjectRequest,
            download::Range,
            get::GetObjectRequest,
            list::ListObjectsRequest,
            upload::{UploadObjectRequest, UploadType},
            Object as GcsObject,
        },
        Error,
    },
    sign::{SignedURLMethod, SignedURLOptions},
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
    signer::{Method, SignedUrl, SignedUrlRequest, UrlSigner},
    util,
};

const ALL_USERS: &str = "allUsers";

pub struct GcsTransport {
    client: Client,
    signer: UrlSigner,
    /// The client config holds a service account private key.
    service_account: bool,
}

impl GcsTransport {
    pub fn connect(session: &Session) -> Result<Self, StorageError> {
        let config =
            util::poll::poll_until_ready(session.runtime(), client_config(session.identity()))?;
        info!(identity = ?session.identity(), "connected to gcs");

        Ok(Self {
            client: Client::new(config),
            signer: UrlSigner::gcs(),
            service_account: matches!(
                session.identity(),
                Identity::ServiceAccountFile(_) | Identity::ServiceAccountJson(_)
            ),
        })
    }

    /// V4 RSA signing with the service account key. Runs locally; the URL is
    /// always issued at the current time.
    fn sign_with_service_account(
        &self,
        call: &Call,
        req: &SignedUrlRequest,
    ) -> Result<SignedUrl, StorageError> {
        req.validate()?;

        let opts = SignedURLOptions {
            method: signed_url_method(req.method),
            expires: req.ttl,
            ..Default::default()
        };
        let issued_at = OffsetDateTime::now_utc();
        let url = util::poll::poll_until_ready(
            call.session.runtime(),
            self.client.signed_url(&req.bucket, &req.key, None, None, opts),
        )
        .map_err(|err| {
            StorageError::Unauthenticated(format!(
                "failed to sign with service account: {}, {}",
                req.key, err
            ))
        })?;

        Ok(SignedUrl {
            url,
            expires_at: issued_at + req.ttl,
        })
    }
}

fn signed_url_method(method: Method) -> SignedURLMethod {
    match method {
        Method::Get => SignedURLMethod::GET,
        Method::Head => SignedURLMethod::HEAD,
        Method::Put => SignedURLMethod::PUT,
        Method::Delete => SignedURLMethod::DELETE,
    }
}

async fn client_config(identity: &Identity) -> Result<ClientConfig, StorageError> {
    match identity {
        Identity::ServiceAccountFile(path) => {
            let file = CredentialsFile::new_from_file(path.to_string_lossy().to_string())
                .await
                .map_err(unauthenticated)?;
            ClientConfig::default()
                .with_credentials(file)
                .await
                .map_err(unauthenticated)
        }
        Identity::ServiceAccountJson(json) => {
            let file = CredentialsFile::new_from_str(json)
                .await
                .map_err(unauthenticated)?;
            ClientConfig::default()
                .with_credentials(file)
                .await
                .map_err(unauthenticated)
        }
        Identity::Ambient => ClientConfig::default()
            .with_auth()
            .await
            .map_err(unauthenticated),
        Identity::Anonymous => Ok(ClientConfig::default().anonymous()),
        Identity::AccessKey(_) => Err(StorageError::InvalidArgument(
            "an access key pair cannot authenticate gcs api calls".to_string(),
        )),
    }
}

fn unauthenticated(err: impl fmt::Display) -> StorageError {
    StorageError::Unauthenticated(format!("failed to load gcs credentials: {}", err))
}

fn failure(operation: &str, target: &str, err: Error) -> TransportError {
    let message = format!("failed to {}: {}, {}", operation, target, err);
    match err {
        Error::Response(response) => TransportError::status(response.code, message),
        Error::HttpClient(err) => {
            if err.is_timeout() {
                TransportError::timeout(message)
            } else if err.is_connect() {
                TransportError::connection(message)
            } else if let Some(status) = err.status() {
                TransportError::status(status.as_u16(), message)
            } else {
                TransportError::new(Failure::Other, message)
            }
        }
        Error::TokenSource(_) => TransportError::new(Failure::Auth, message),
        _ => TransportError::new(Failure::Other, message),
    }
}

fn to_object(obj: GcsObject) -> Object {
    let public = obj
        .acl
        .as_ref()
        .map(|acl| acl.iter().any(|entry| entry.entity == ALL_USERS));

    Object {
        bucket: obj.bucket,
        key: obj.name,
        size: obj.size as u64,
        content_type: obj.content_type.into(),
        metadata: obj.metadata.unwrap_or_default(),
        generation: Some(obj.generation.to_string()),
        metageneration: Some(obj.metageneration as i64),
        etag: obj.etag.into(),
        md5_hash: obj.md5_hash.into(),
        crc32c: obj.crc32c.into(),
        storage_class: obj.storage_class.into(),
        updated: obj.updated,
        public,
    }
}

impl Transport for GcsTransport {
    fn list_page(
        &self,
        call: &Call,
        bucket: &str,
        prefix: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<ObjectPage, TransportError> {
        let req = ListObjectsRequest {
            bucket: bucket.to_string(),
            prefix: prefix.map(str::to_string),
            page_token: page_token.map(str::to_string),
            ..Default::default()
        };

        let lo = call.block_on(async {
            self.client
                .list_objects(&req)
                .await
                .map_err(|err| failure("list_objects", prefix.unwrap_or(bucket), err))
        })?;

        Ok(ObjectPage {
            objects: lo.items.unwrap_or_default().into_iter().map(to_object).collect(),
            next_page_token: lo.next_page_token,
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
        let req = UploadObjectRequest {
            bucket: bucket.to_string(),
            ..Default::default()
        };
        let upload_type = UploadType::Multipart(Box::new(GcsObject {
            name: key.to_string(),
            content_type: options.content_type().to_string().into(),
            metadata: options.metadata.clone().into(),
            ..Default::default()
        }));

        let obj = call.block_on(async {
            self.client
                .upload_object(&req, body.to_vec(), &upload_type)
                .await
                .map_err(|err| failure("put_object", key, err))
        })?;

        Ok(to_object(obj))
    }

    fn get_object(&self, call: &Call, bucket: &str, key: &str) -> Result<Vec<u8>, TransportError> {
        let req = GetObjectRequest {
            bucket: bucket.to_string(),
            object: key.to_string(),
            ..Default::default()
        };

        call.block_on(async {
            self.client
                .download_object(&req, &Range::default())
                .await
                .map_err(|err| failure("download_object", key, err))
        })
    }

    fn head_object(&self, call: &Call, bucket: &str, key: &str) -> Result<Object, TransportError> {
        let req = GetObjectRequest {
            bucket: bucket.to_string(),
            object: key.to_string(),
            ..Default::default()
        };

        let obj = call.block_on(async {
            self.client
                .get_object(&req)
                .await
                .map_err(|err| failure("get_object", key, err))
        })?;

        Ok(to_object(obj))
    }

    fn delete_object(&self, call: &Call, bucket: &str, key: &str) -> Result<(), TransportError> {
        let req = DeleteObjectRequest {
            bucket: bucket.to_string(),
            object: key.to_string(),
            ..Default::default()
        };

        call.block_on(async {
            self.client
                .delete_object(&req)
                .await
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
        overwrite: bool,
    ) -> Result<Object, TransportError> {
        // ifGenerationMatch=0 only succeeds while the destination does not exist.
        let req = CopyObjectRequest {
            source_bucket: src_bucket.to_string(),
            source_object: src_key.to_string(),
            destination_bucket: dst_bucket.to_string(),
            destination_object: dst_key.to_string(),
            if_generation_match: if overwrite { None } else { Some(0) },
            ..Default::default()
        };

        let obj = call.block_on(async {
            self.client
                .copy_object(&req)
                .await
                .map_err(|err| failure("copy_object", src_key, err))
        })?;

        Ok(to_object(obj))
    }

    fn grant_public_read(&self, call: &Call, bucket: &str, key: &str) -> Result<(), TransportError> {
        let req = InsertObjectAccessControlRequest {
            bucket: bucket.to_string(),
            object: key.to_string(),
            generation: None,
            acl: ObjectAccessControlCreationConfig {
                entity: ALL_USERS.to_string(),
                role: ObjectACLRole::READER,
            },
        };

        call.block_on(async {
            self.client
                .insert_object_access_control(&req)
                .await
                .map(|_| ())
                .map_err(|err| failure("insert_object_access_control", key, err))
        })
    }

    fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    fn identity_signed_url(
        &self,
        call: &Call,
        req: &SignedUrlRequest,
    ) -> Option<Result<SignedUrl, StorageError>> {
        self.service_account
            .then(|| self.sign_with_service_account(call, req))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{model::error::ErrorKind, util::object::Provider};

    fn call_with<T>(session: &Session, f: impl FnOnce(&Call) -> T) -> T {
        f(&Call {
            session,
            deadline: None,
        })
    }

    #[test]
    fn test_token_failures_are_unauthenticated() {
        let err = failure("get_object", "k", Error::TokenSource("token expired".into()));

        assert_eq!(err.failure, Failure::Auth);
        assert_eq!(StorageError::from(err).kind(), ErrorKind::Unauthenticated);
    }

    #[test]
    fn test_service_account_signs_urls() {
        let json = include_str!("../../tests/data/service_account.json");
        let session = Session::new(
            Provider::Gcs,
            Identity::ServiceAccountJson(json.to_string()),
            None,
        )
        .unwrap();
        let transport = GcsTransport::connect(&session).unwrap();
        let req = SignedUrlRequest::get("b", "k", Duration::from_secs(600));

        let signed = call_with(&session, |call| transport.identity_signed_url(call, &req))
            .unwrap()
            .unwrap();

        assert!(signed.url.starts_with("https://storage.googleapis.com/b/k?"));
        assert!(signed.url.contains("GOOG4-RSA-SHA256"));
        assert!(signed.url.contains("X-Goog-Signature="));
        assert!(signed.expires_at > OffsetDateTime::now_utc());
    }

    #[test]
    fn test_service_account_signing_checks_ttl() {
        let json = include_str!("../../tests/data/service_account.json");
        let session = Session::new(
            Provider::Gcs,
            Identity::ServiceAccountJson(json.to_string()),
            None,
        )
        .unwrap();
        let transport = GcsTransport::connect(&session).unwrap();
        let req = SignedUrlRequest::get("b", "k", Duration::from_secs(8 * 24 * 3600));

        let err = call_with(&session, |call| transport.identity_signed_url(call, &req))
            .unwrap()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_anonymous_identity_cannot_sign() {
        let session = Session::anonymous(Provider::Gcs).unwrap();
        let transport = GcsTransport::connect(&session).unwrap();
        let req = SignedUrlRequest::get("b", "k", Duration::from_secs(600));

        assert!(call_with(&session, |call| transport.identity_signed_url(call, &req)).is_none());
    }
}
