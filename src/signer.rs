//! V4 query-string signing for time-limited object URLs.
//!
//! GCS HMAC keys (`GOOG4-HMAC-SHA256`) and S3 access keys
//! (`AWS4-HMAC-SHA256`) share one algorithm that differs only in its
//! constants. Signing is a pure function of its inputs and never talks to
//! the store.

use std::{collections::HashMap, fmt, time::Duration};

use hmac::{Hmac, Mac};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use time::{
    format_description::FormatItem, macros::format_description, OffsetDateTime, PrimitiveDateTime,
    UtcOffset,
};
use url::Url;

use crate::{model::error::StorageError, util};

type HmacSha256 = Hmac<Sha256>;

pub const MAX_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const TIMESTAMP: &[FormatItem<'static>] =
    format_description!("[year][month][day]T[hour][minute][second]Z");

const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const PATH: &AsciiSet = &UNRESERVED.remove(b'/');

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Goog4,
    Aws4,
}

impl Scheme {
    fn algorithm(&self) -> &'static str {
        match self {
            Scheme::Goog4 => "GOOG4-HMAC-SHA256",
            Scheme::Aws4 => "AWS4-HMAC-SHA256",
        }
    }

    fn key_prefix(&self) -> &'static str {
        match self {
            Scheme::Goog4 => "GOOG4",
            Scheme::Aws4 => "AWS4",
        }
    }

    fn service(&self) -> &'static str {
        match self {
            Scheme::Goog4 => "storage",
            Scheme::Aws4 => "s3",
        }
    }

    fn terminator(&self) -> &'static str {
        match self {
            Scheme::Goog4 => "goog4_request",
            Scheme::Aws4 => "aws4_request",
        }
    }

    fn param(&self, name: &str) -> String {
        match self {
            Scheme::Goog4 => format!("X-Goog-{}", name),
            Scheme::Aws4 => format!("X-Amz-{}", name),
        }
    }
}

/// Access id and secret of an HMAC key.
#[derive(Clone, PartialEq, Eq)]
pub struct HmacKey {
    pub access_id: String,
    secret: String,
}

impl HmacKey {
    pub fn new(access_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            access_id: access_id.into(),
            secret: secret.into(),
        }
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for HmacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacKey")
            .field("access_id", &self.access_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

#[derive(Clone, Debug)]
pub struct SignedUrlRequest {
    pub method: Method,
    pub bucket: String,
    pub key: String,
    pub issued_at: OffsetDateTime,
    pub ttl: Duration,
}

impl SignedUrlRequest {
    /// A GET request issued now.
    pub fn get(bucket: &str, key: &str, ttl: Duration) -> Self {
        Self {
            method: Method::Get,
            bucket: bucket.to_string(),
            key: key.to_string(),
            issued_at: OffsetDateTime::now_utc(),
            ttl,
        }
    }

    /// Names must be non-empty and the ttl within 1s..=7 days.
    pub fn validate(&self) -> Result<(), StorageError> {
        util::object::validate_name("bucket", &self.bucket)?;
        util::object::validate_name("key", &self.key)?;
        if self.ttl.as_secs() == 0 || self.ttl > MAX_TTL {
            return Err(StorageError::InvalidArgument(format!(
                "signed url ttl must be between 1s and {}s, got {:?}",
                MAX_TTL.as_secs(),
                self.ttl
            )));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: OffsetDateTime,
}

impl fmt::Display for SignedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlSigner {
    scheme: Scheme,
    host: String,
    region: String,
}

impl UrlSigner {
    pub fn gcs() -> Self {
        Self {
            scheme: Scheme::Goog4,
            host: "storage.googleapis.com".to_string(),
            region: "auto".to_string(),
        }
    }

    pub fn s3(region: &str) -> Self {
        Self {
            scheme: Scheme::Aws4,
            host: format!("s3.{}.amazonaws.com", region),
            region: region.to_string(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Unauthenticated URL of an object, valid only once it is public.
    pub fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("https://{}{}", self.host, canonical_path(bucket, key))
    }

    pub fn sign(&self, key: &HmacKey, req: &SignedUrlRequest) -> Result<SignedUrl, StorageError> {
        req.validate()?;

        let timestamp = req
            .issued_at
            .to_offset(UtcOffset::UTC)
            .format(TIMESTAMP)
            .map_err(|err| StorageError::InvalidArgument(format!("issue time: {}", err)))?;
        let scope = format!(
            "{}/{}/{}/{}",
            &timestamp[..8],
            self.region,
            self.scheme.service(),
            self.scheme.terminator()
        );

        let path = canonical_path(&req.bucket, &req.key);
        let query = self.canonical_query(key, &timestamp, &scope, req.ttl);
        let signature = self.signature(key, req.method, &path, &query, &timestamp, &scope);

        let expires_at = req.issued_at + req.ttl;

        Ok(SignedUrl {
            url: format!(
                "https://{}{}?{}&{}={}",
                self.host,
                path,
                query,
                self.scheme.param("Signature"),
                signature
            ),
            expires_at,
        })
    }

    /// Checks a URL produced by [`UrlSigner::sign`] the way the store does:
    /// matching credential, untampered signature, not yet expired.
    pub fn verify(
        &self,
        key: &HmacKey,
        method: Method,
        url: &Url,
        now: OffsetDateTime,
    ) -> Result<(), StorageError> {
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let param = |name: &str| {
            params
                .get(&self.scheme.param(name))
                .cloned()
                .ok_or_else(|| StorageError::PermissionDenied(format!("missing {} parameter", name)))
        };

        let credential = param("Credential")?;
        if credential.split('/').next() != Some(key.access_id.as_str()) {
            return Err(StorageError::PermissionDenied(
                "credential does not match signing key".to_string(),
            ));
        }

        let issued_at = PrimitiveDateTime::parse(&param("Date")?, TIMESTAMP)
            .map_err(|err| StorageError::PermissionDenied(format!("bad date: {}", err)))?
            .assume_utc();
        let ttl = param("Expires")?
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|err| StorageError::PermissionDenied(format!("bad expires: {}", err)))?;

        let (bucket, object_key) = split_path(url.path())?;
        let expected = self.sign(
            key,
            &SignedUrlRequest {
                method,
                bucket,
                key: object_key,
                issued_at,
                ttl,
            },
        )?;

        let expected_url = Url::parse(&expected.url)
            .map_err(|err| StorageError::Backend(format!("re-signed url: {}", err)))?;
        let expected_signature = expected_url
            .query_pairs()
            .find(|(name, _)| *name == self.scheme.param("Signature"))
            .map(|(_, value)| value.into_owned());

        let presented = params.get(&self.scheme.param("Signature"));
        if expected_signature.is_none() || expected_signature.as_ref() != presented {
            return Err(StorageError::PermissionDenied(
                "signature does not match".to_string(),
            ));
        }

        if now >= expected.expires_at {
            return Err(StorageError::PermissionDenied(format!(
                "signed url expired at {}",
                expected.expires_at
            )));
        }

        Ok(())
    }

    fn canonical_query(&self, key: &HmacKey, timestamp: &str, scope: &str, ttl: Duration) -> String {
        let mut params = vec![
            (self.scheme.param("Algorithm"), self.scheme.algorithm().to_string()),
            (
                self.scheme.param("Credential"),
                format!("{}/{}", key.access_id, scope),
            ),
            (self.scheme.param("Date"), timestamp.to_string()),
            (self.scheme.param("Expires"), ttl.as_secs().to_string()),
            (self.scheme.param("SignedHeaders"), "host".to_string()),
        ];
        params.sort();

        params
            .iter()
            .map(|(name, value)| {
                format!(
                    "{}={}",
                    utf8_percent_encode(name, UNRESERVED),
                    utf8_percent_encode(value, UNRESERVED)
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    fn signature(
        &self,
        key: &HmacKey,
        method: Method,
        path: &str,
        query: &str,
        timestamp: &str,
        scope: &str,
    ) -> String {
        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
            method.as_str(),
            path,
            query,
            self.host
        );

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            self.scheme.algorithm(),
            timestamp,
            scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let date_key = hmac_sha256(
            format!("{}{}", self.scheme.key_prefix(), key.secret).as_bytes(),
            &timestamp[..8],
        );
        let region_key = hmac_sha256(&date_key, &self.region);
        let service_key = hmac_sha256(&region_key, self.scheme.service());
        let signing_key = hmac_sha256(&service_key, self.scheme.terminator());

        hex::encode(hmac_sha256(&signing_key, &string_to_sign))
    }
}

fn hmac_sha256(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts keys of any length");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn canonical_path(bucket: &str, key: &str) -> String {
    format!(
        "/{}/{}",
        utf8_percent_encode(bucket, UNRESERVED),
        utf8_percent_encode(key, PATH)
    )
}

/// Percent-encodes an object key, keeping `/` separators.
pub(crate) fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, PATH).to_string()
}

fn split_path(path: &str) -> Result<(String, String), StorageError> {
    let (bucket, key) = path
        .trim_start_matches('/')
        .split_once('/')
        .ok_or_else(|| StorageError::NotFound(format!("no object in path {}", path)))?;

    let decode = |part: &str| {
        percent_decode_str(part)
            .decode_utf8()
            .map(|decoded| decoded.into_owned())
            .map_err(|err| StorageError::InvalidArgument(format!("path {}: {}", path, err)))
    };

    Ok((decode(bucket)?, decode(key)?))
}

/// Splits the path of a path-style object URL into bucket and key.
pub fn object_from_url(url: &Url) -> Result<(String, String), StorageError> {
    split_path(url.path())
}
