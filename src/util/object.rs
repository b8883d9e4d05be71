use std::{fmt, str::FromStr};

use crate::model::error::StorageError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provider {
    Gcs,
    S3,
}

impl Provider {
    pub fn scheme(&self) -> &'static str {
        match self {
            Provider::Gcs => "gs",
            Provider::S3 => "s3",
        }
    }

    pub fn is_gcs(&self) -> bool {
        matches!(self, Provider::Gcs)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scheme())
    }
}

impl FromStr for Provider {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gs" | "gcs" => Ok(Provider::Gcs),
            "s3" | "aws" => Ok(Provider::S3),
            other => Err(StorageError::InvalidArgument(format!(
                "unknown provider: {}",
                other
            ))),
        }
    }
}

pub fn parse_provider_from_uri(bucket_uri: &str) -> Result<Provider, StorageError> {
    if bucket_uri.starts_with("gs://") {
        Ok(Provider::Gcs)
    } else if bucket_uri.starts_with("s3://") {
        Ok(Provider::S3)
    } else {
        Err(StorageError::InvalidArgument(format!(
            "failed to parse provider of: {}",
            bucket_uri
        )))
    }
}

/// Bucket name of a `scheme://bucket[/...]` URI, empty when there is no scheme.
pub fn parse_bucket_from_uri(bucket_uri: &str) -> &str {
    bucket_uri
        .split_once("://")
        .map(|(_, rest)| rest.split('/').next().unwrap_or(""))
        .unwrap_or("")
}

pub fn validate_name(what: &str, value: &str) -> Result<(), StorageError> {
    if value.is_empty() {
        return Err(StorageError::InvalidArgument(format!("{} must not be empty", what)));
    }

    Ok(())
}
