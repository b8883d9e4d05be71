//! One function per storage task, each printing a short report to `out`.

use std::{io::Write, path::Path, time::Duration};

use tracing::info;

use crate::{client::StorageClient, model::error::StorageError};

const SIGNED_URL_TTL: Duration = Duration::from_secs(3600);

fn emit<W: Write>(out: &mut W, line: std::fmt::Arguments<'_>) -> Result<(), StorageError> {
    writeln!(out, "{}", line).map_err(|err| StorageError::local("<output>", err))
}

/// Lists all the objects in the bucket.
pub fn list_blobs<W: Write>(client: &StorageClient, out: &mut W, bucket: &str) -> Result<(), StorageError> {
    for object in &client.list_objects(bucket, None) {
        emit(out, format_args!("{}", object?.key))?;
    }

    Ok(())
}

/// Lists the objects whose key starts with `prefix`.
pub fn list_blobs_with_prefix<W: Write>(
    client: &StorageClient,
    out: &mut W,
    bucket: &str,
    prefix: &str,
) -> Result<(), StorageError> {
    emit(out, format_args!("Blobs:"))?;
    for object in &client.list_objects(bucket, Some(prefix)) {
        emit(out, format_args!("{}", object?.key))?;
    }

    Ok(())
}

pub fn upload_blob<W: Write>(
    client: &StorageClient,
    out: &mut W,
    bucket: &str,
    source_file: &Path,
    destination_key: &str,
) -> Result<(), StorageError> {
    client.upload(bucket, source_file, destination_key)?;
    emit(
        out,
        format_args!("File {} uploaded to {}.", source_file.display(), destination_key),
    )
}

pub fn download_blob<W: Write>(
    client: &StorageClient,
    out: &mut W,
    bucket: &str,
    source_key: &str,
    destination_file: &Path,
) -> Result<(), StorageError> {
    client.download(bucket, source_key, destination_file)?;
    emit(
        out,
        format_args!("Blob {} downloaded to {}.", source_key, destination_file.display()),
    )
}

/// Prints the properties of an object without fetching its body.
pub fn blob_metadata<W: Write>(
    client: &StorageClient,
    out: &mut W,
    bucket: &str,
    key: &str,
) -> Result<(), StorageError> {
    let object = client.get_metadata(bucket, key)?;
    let show = |value: &Option<String>| value.clone().unwrap_or_else(|| "None".to_string());

    emit(out, format_args!("Blob: {}", object.key))?;
    emit(out, format_args!("Bucket: {}", object.bucket))?;
    emit(out, format_args!("Storage class: {}", show(&object.storage_class)))?;
    emit(out, format_args!("Size: {}", object.size))?;
    match object.updated {
        Some(updated) => emit(out, format_args!("Updated: {}", updated))?,
        None => emit(out, format_args!("Updated: None"))?,
    }
    emit(out, format_args!("Generation: {}", show(&object.generation)))?;
    match object.metageneration {
        Some(m) => emit(out, format_args!("Metageneration: {}", m))?,
        None => emit(out, format_args!("Metageneration: None"))?,
    }
    emit(out, format_args!("Etag: {}", show(&object.etag)))?;
    emit(out, format_args!("md5_hash: {}", show(&object.md5_hash)))?;
    emit(out, format_args!("crc32c: {}", show(&object.crc32c)))?;
    emit(out, format_args!("Content-type: {}", show(&object.content_type)))?;

    let mut metadata: Vec<_> = object.metadata.iter().collect();
    metadata.sort();
    emit(out, format_args!("Metadata: {:?}", metadata))
}

pub fn delete_blob<W: Write>(client: &StorageClient, out: &mut W, bucket: &str, key: &str) -> Result<(), StorageError> {
    client.delete(bucket, key)?;
    emit(out, format_args!("Blob {} deleted.", key))
}

pub fn make_blob_public<W: Write>(
    client: &StorageClient,
    out: &mut W,
    bucket: &str,
    key: &str,
) -> Result<(), StorageError> {
    client.make_public(bucket, key)?;
    emit(
        out,
        format_args!("Blob {} is publicly accessible at {}", key, client.public_url(bucket, key)),
    )
}

/// Prints a GET URL valid for one hour. The URL is the last token printed.
pub fn generate_signed_url<W: Write>(
    client: &StorageClient,
    out: &mut W,
    bucket: &str,
    key: &str,
) -> Result<(), StorageError> {
    generate_signed_url_for(client, out, bucket, key, SIGNED_URL_TTL)
}

pub fn generate_signed_url_for<W: Write>(
    client: &StorageClient,
    out: &mut W,
    bucket: &str,
    key: &str,
    ttl: Duration,
) -> Result<(), StorageError> {
    let url = client.generate_signed_url(bucket, key, ttl)?;
    info!(key = key, expires_at = %url.expires_at, "signed url");
    emit(out, format_args!("The signed url for {} is {}", key, url))
}

pub fn rename_blob<W: Write>(
    client: &StorageClient,
    out: &mut W,
    bucket: &str,
    old_key: &str,
    new_key: &str,
) -> Result<(), StorageError> {
    client.rename(bucket, old_key, new_key)?;
    emit(out, format_args!("Blob {} has been renamed to {}", old_key, new_key))
}

pub fn copy_blob<W: Write>(
    client: &StorageClient,
    out: &mut W,
    bucket: &str,
    key: &str,
    destination_bucket: &str,
    destination_key: &str,
) -> Result<(), StorageError> {
    client.copy(bucket, key, destination_bucket, destination_key)?;
    emit(
        out,
        format_args!(
            "Blob {} in bucket {} copied to blob {} in bucket {}.",
            key, bucket, destination_key, destination_bucket
        ),
    )
}
