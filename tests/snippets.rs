use std::{io::Write, path::PathBuf, time::Duration};

use objectclient::{
    adapters::mock::{MemoryStore, MockTransport, Op},
    credentials::{CredentialProvider, ExplicitCredentials, Identity},
    model::error::TransportError,
    snippets,
    util::object::Provider,
    ClientOptions, ErrorKind, HmacKey, RetryPolicy, Session, StorageClient,
};
use time::OffsetDateTime;

const BUCKET: &str = "B";
const SIGIL: &str = "storage_snippets_test_sigil";
const SIGIL_TEXT: &str = "Hello, is it me you're looking for?";

struct Fixture {
    store: MemoryStore,
    client: StorageClient,
}

impl Fixture {
    fn new() -> Self {
        Self::with_options(ClientOptions::default())
    }

    fn with_options(options: ClientOptions) -> Self {
        let key = signing_key();
        let store = MemoryStore::new();
        store.create_bucket(BUCKET);
        store.trust_signing_key(key.clone());
        store.insert(BUCKET, SIGIL, SIGIL_TEXT.as_bytes());

        let session = Session::new(Provider::Gcs, Identity::Anonymous, Some(key)).unwrap();
        let options = ClientOptions {
            retry: RetryPolicy {
                initial_backoff: Duration::ZERO,
                ..options.retry
            },
            ..options
        };
        let client = StorageClient::new(session, Box::new(MockTransport::new(store.clone())), options);

        Self { store, client }
    }

    fn output<F>(&self, f: F) -> String
    where
        F: FnOnce(&StorageClient, &mut Vec<u8>) -> Result<(), objectclient::StorageError>,
    {
        let mut out = Vec::new();
        f(&self.client, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn get(&self, url: &str, now: OffsetDateTime) -> (u16, String) {
        let response = self.store.anonymous_get(url, now);
        (response.status, response.text())
    }
}

fn signing_key() -> HmacKey {
    HmacKey::new("GOOG1EXAMPLEACCESSID", "example-secret")
}

fn last_token(out: &str) -> &str {
    out.split_whitespace().last().unwrap()
}

#[test]
fn test_list_blobs() {
    let fx = Fixture::new();
    let out = fx.output(|c, o| snippets::list_blobs(c, o, BUCKET));
    assert!(out.lines().any(|line| line == SIGIL));
}

#[test]
fn test_list_blobs_with_prefix() {
    let fx = Fixture::new();
    fx.store.insert(BUCKET, "unrelated", b"x");

    let out = fx.output(|c, o| snippets::list_blobs_with_prefix(c, o, BUCKET, "storage_snippets"));

    assert!(out.starts_with("Blobs:"));
    assert!(out.contains(SIGIL));
    assert!(!out.contains("unrelated"));
}

#[test]
fn test_upload_blob() {
    let fx = Fixture::new();
    let mut source = tempfile::NamedTempFile::new().unwrap();
    source.write_all(b"test").unwrap();

    let out = fx.output(|c, o| snippets::upload_blob(c, o, BUCKET, source.path(), "test_upload_blob"));

    assert!(out.contains("uploaded to test_upload_blob."));
    assert_eq!(fx.store.get(BUCKET, "test_upload_blob").unwrap(), b"test");
}

#[test]
fn test_download_blob() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("sigil.txt");

    let out = fx.output(|c, o| snippets::download_blob(c, o, BUCKET, SIGIL, &dest));

    assert!(out.starts_with(&format!("Blob {} downloaded to", SIGIL)));
    assert_eq!(std::fs::read_to_string(&dest).unwrap(), SIGIL_TEXT);
}

#[test]
fn test_download_overwrites_existing_file() {
    let fx = Fixture::new();
    let dest = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(dest.path(), b"stale contents that are longer").unwrap();

    fx.client.download(BUCKET, SIGIL, dest.path()).unwrap();

    assert_eq!(std::fs::read_to_string(dest.path()).unwrap(), SIGIL_TEXT);
}

#[test]
fn test_blob_metadata() {
    let fx = Fixture::new();
    let out = fx.output(|c, o| snippets::blob_metadata(c, o, BUCKET, SIGIL));

    assert!(out.contains(&format!("Blob: {}", SIGIL)));
    assert!(out.contains(&format!("Bucket: {}", BUCKET)));
    assert!(out.contains(&format!("Size: {}", SIGIL_TEXT.len())));
    assert!(out.contains("Content-type: application/octet-stream"));
}

#[test]
fn test_delete_blob() {
    let fx = Fixture::new();
    let out = fx.output(|c, o| snippets::delete_blob(c, o, BUCKET, SIGIL));

    assert_eq!(out.trim(), format!("Blob {} deleted.", SIGIL));
    let err = fx.client.get_metadata(BUCKET, SIGIL).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_make_blob_public() {
    let fx = Fixture::new();
    let now = OffsetDateTime::now_utc();
    let url = fx.client.public_url(BUCKET, SIGIL);
    assert_eq!(fx.get(&url, now).0, 403);

    let out = fx.output(|c, o| snippets::make_blob_public(c, o, BUCKET, SIGIL));

    assert_eq!(last_token(&out), url);
    assert_eq!(fx.get(&url, now), (200, SIGIL_TEXT.to_string()));
}

#[test]
fn test_generate_signed_url() {
    let fx = Fixture::new();
    let out = fx.output(|c, o| snippets::generate_signed_url(c, o, BUCKET, SIGIL));
    let url = last_token(&out);
    let now = OffsetDateTime::now_utc();

    assert_eq!(fx.get(url, now), (200, SIGIL_TEXT.to_string()));
    assert_eq!(fx.get(url, now + Duration::from_secs(2 * 3600)).0, 403);

    fx.store.insert(BUCKET, "storage_snippets_other", b"secret");
    let tampered = url.replace(SIGIL, "storage_snippets_other");
    assert_eq!(fx.get(&tampered, now).0, 403);
}

#[test]
fn test_signed_url_from_untrusted_key() {
    let fx = Fixture::new();
    fx.store.trust_signing_key(HmacKey::new("GOOG1OTHER", "other-secret"));

    let url = fx
        .client
        .generate_signed_url(BUCKET, SIGIL, Duration::from_secs(60))
        .unwrap();

    assert_eq!(fx.get(&url.url, OffsetDateTime::now_utc()).0, 403);
}

#[test]
fn test_rename_blob() {
    let fx = Fixture::new();
    fx.client.delete_if_exists(BUCKET, "test_rename_blob").unwrap();

    let out = fx.output(|c, o| snippets::rename_blob(c, o, BUCKET, SIGIL, "test_rename_blob"));

    assert!(out.contains("has been renamed to test_rename_blob"));
    assert!(fx.client.get_metadata(BUCKET, "test_rename_blob").is_ok());
    assert_eq!(
        fx.client.get_metadata(BUCKET, SIGIL).unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[test]
fn test_copy_blob() {
    let fx = Fixture::new();
    fx.client.delete_if_exists(BUCKET, "test_copy_blob").unwrap();

    fx.output(|c, o| snippets::copy_blob(c, o, BUCKET, SIGIL, BUCKET, "test_copy_blob"));

    assert_eq!(
        fx.client.download_bytes(BUCKET, "test_copy_blob").unwrap(),
        fx.client.download_bytes(BUCKET, SIGIL).unwrap()
    );
}

#[test]
fn test_copy_across_buckets() {
    let fx = Fixture::new();
    fx.store.create_bucket("archive");

    let copied = fx.client.copy(BUCKET, SIGIL, "archive", SIGIL).unwrap();

    assert_eq!(copied.bucket, "archive");
    assert_eq!(fx.store.get("archive", SIGIL).unwrap(), SIGIL_TEXT.as_bytes());
}

#[test]
fn test_copy_onto_existing_destination() {
    let fx = Fixture::new();
    fx.store.insert(BUCKET, "taken", b"keep me");

    let err = fx.client.copy(BUCKET, SIGIL, BUCKET, "taken").unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(fx.store.get(BUCKET, "taken").unwrap(), b"keep me");
}

#[test]
fn test_download_matches_upload() {
    let fx = Fixture::new();
    let body: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let mut source = tempfile::NamedTempFile::new().unwrap();
    source.write_all(&body).unwrap();

    fx.client.upload(BUCKET, source.path(), "bin").unwrap();
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("bin");
    let size = fx.client.download(BUCKET, "bin", &dest).unwrap();

    assert_eq!(size, body.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
}

#[test]
fn test_rename_partial_failure_keeps_old_object() {
    let fx = Fixture::new();
    fx.store
        .fail_next(Op::Delete, TransportError::status(403, "delete forbidden"));

    let err = fx.client.rename(BUCKET, SIGIL, "renamed").unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PartialFailure);
    assert!(err.to_string().contains("renamed"));
    assert!(fx.store.contains(BUCKET, SIGIL));
    assert!(fx.store.contains(BUCKET, "renamed"));
}

#[test]
fn test_transient_failures_are_retried() {
    let fx = Fixture::new();
    fx.store.fail_next(Op::Get, TransportError::status(503, "unavailable"));
    fx.store.fail_next(Op::Get, TransportError::connection("reset by peer"));

    assert_eq!(fx.client.download_bytes(BUCKET, SIGIL).unwrap(), SIGIL_TEXT.as_bytes());
    assert_eq!(fx.store.calls(Op::Get), 3);
}

#[test]
fn test_retries_are_bounded() {
    let fx = Fixture::with_options(ClientOptions {
        retry: RetryPolicy {
            max_retries: 1,
            ..RetryPolicy::default()
        },
        ..ClientOptions::default()
    });
    for _ in 0..3 {
        fx.store.fail_next(Op::List, TransportError::status(500, "internal"));
    }

    let err = fx.client.list_objects(BUCKET, None).collect_all().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransientIO);
    assert_eq!(fx.store.calls(Op::List), 2);
}

#[test]
fn test_upload_not_retried_after_timeout() {
    let fx = Fixture::new();
    fx.store.fail_next(Op::Put, TransportError::timeout("deadline exceeded"));

    let err = fx
        .client
        .upload_bytes(BUCKET, "k", b"body", &Default::default())
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransientIO);
    assert_eq!(fx.store.calls(Op::Put), 1);
    assert!(!fx.store.contains(BUCKET, "k"));
}

#[test]
fn test_error_classification() {
    let fx = Fixture::new();
    let source = tempfile::NamedTempFile::new().unwrap();

    let cases = vec![
        (
            "missing bucket",
            fx.client.upload("nonexistent", source.path(), "k").unwrap_err(),
            ErrorKind::NotFound,
        ),
        (
            "missing local file",
            fx.client
                .upload(BUCKET, &PathBuf::from("/nonexistent/file"), "k")
                .unwrap_err(),
            ErrorKind::Local,
        ),
        (
            "missing object",
            fx.client.download_bytes(BUCKET, "absent").unwrap_err(),
            ErrorKind::NotFound,
        ),
        (
            "empty key",
            fx.client.delete(BUCKET, "").unwrap_err(),
            ErrorKind::InvalidArgument,
        ),
    ];
    for (name, err, kind) in cases {
        assert_eq!(err.kind(), kind, "failed for case: {}", name);
    }

    fx.store
        .fail_next(Op::Head, TransportError::status(403, "forbidden"));
    assert_eq!(
        fx.client.get_metadata(BUCKET, SIGIL).unwrap_err().kind(),
        ErrorKind::PermissionDenied
    );

    fx.store
        .fail_next(Op::Head, TransportError::status(401, "token expired"));
    assert_eq!(
        fx.client.get_metadata(BUCKET, SIGIL).unwrap_err().kind(),
        ErrorKind::Unauthenticated
    );
}

#[test]
fn test_no_credentials() {
    let provider = CredentialProvider::default_chain(Provider::Gcs, ExplicitCredentials::default());
    let err = provider.resolve_with(|_| None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
}

#[test]
fn test_failed_download_leaves_no_file() {
    let fx = Fixture::new();
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("absent.txt");

    let err = fx.client.download(BUCKET, "absent", &dest).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(!dest.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_session_from_credential_chain() {
    let store = MemoryStore::new();
    store.create_bucket(BUCKET);
    store.trust_signing_key(signing_key());
    store.insert(BUCKET, SIGIL, SIGIL_TEXT.as_bytes());

    let env = |name: &str| match name {
        "GOOGLE_APPLICATION_CREDENTIALS" => Some("/secrets/sa.json".to_string()),
        "GCS_HMAC_ACCESS_ID" => Some("GOOG1EXAMPLEACCESSID".to_string()),
        "GCS_HMAC_SECRET" => Some("example-secret".to_string()),
        _ => None,
    };
    let session = CredentialProvider::default_chain(Provider::Gcs, ExplicitCredentials::default())
        .resolve_with(env)
        .unwrap();
    let client = StorageClient::new(
        session,
        Box::new(MockTransport::new(store.clone())),
        ClientOptions::default(),
    );

    let url = client
        .generate_signed_url(BUCKET, SIGIL, Duration::from_secs(600))
        .unwrap();
    assert_eq!(store.anonymous_get(&url.url, OffsetDateTime::now_utc()).status, 200);
}
