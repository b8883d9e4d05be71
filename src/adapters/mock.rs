//! In-memory backing store used by the test harness.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use url::Url;

use crate::{
    adapters::{Call, Transport},
    credentials::Identity,
    model::{
        error::{StorageError, TransportError},
        object::{Object, ObjectPage, UploadOptions},
    },
    signer::{self, HmacKey, Method, SignedUrl, SignedUrlRequest, UrlSigner},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Put,
    Get,
    Head,
    Delete,
    Copy,
    GrantPublicRead,
}

/// When an injected fault fires relative to applying the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Before,
    After,
}

#[derive(Clone, Debug)]
struct StoredObject {
    data: Vec<u8>,
    meta: Object,
}

struct State {
    buckets: HashMap<String, BTreeMap<String, StoredObject>>,
    next_generation: i64,
    page_size: usize,
    faults: VecDeque<(Op, Phase, TransportError)>,
    calls: HashMap<Op, usize>,
    signer: UrlSigner,
    trusted_key: Option<HmacKey>,
    identity_key: Option<HmacKey>,
    atomic_copy: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            buckets: HashMap::new(),
            next_generation: 1,
            page_size: 1000,
            faults: VecDeque::new(),
            calls: HashMap::new(),
            signer: UrlSigner::gcs(),
            trusted_key: None,
            identity_key: None,
            atomic_copy: true,
        }
    }
}

/// Response to an unauthenticated GET.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Shared handle to the in-memory buckets. Clones see the same state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .lock()
            .expect("failed to acquire `MemoryStore` guard")
    }

    pub fn create_bucket(&self, bucket: &str) {
        self.lock().buckets.entry(bucket.to_string()).or_default();
    }

    pub fn set_page_size(&self, page_size: usize) {
        self.lock().page_size = page_size.max(1);
    }

    pub fn set_signer(&self, signer: UrlSigner) {
        self.lock().signer = signer;
    }

    /// Key whose signed URLs the store accepts.
    pub fn trust_signing_key(&self, key: HmacKey) {
        self.lock().trusted_key = Some(key);
    }

    /// Lets service account sessions sign URLs with `key`, standing in for
    /// the account's private key. The store accepts those URLs too.
    pub fn sign_as_identity(&self, key: HmacKey) {
        self.lock().identity_key = Some(key);
    }

    /// With `false`, copies ignore the overwrite flag the way S3 does.
    pub fn set_atomic_copy_precondition(&self, atomic: bool) {
        self.lock().atomic_copy = atomic;
    }

    pub fn insert(&self, bucket: &str, key: &str, data: &[u8]) -> Object {
        let mut state = self.lock();
        state.buckets.entry(bucket.to_string()).or_default();
        state.store(bucket, key, data.to_vec(), &UploadOptions::default())
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|stored| stored.data.clone())
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.get(bucket, key).is_some()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Makes the next `op` call fail with `err` instead of touching the store.
    pub fn fail_next(&self, op: Op, err: TransportError) {
        self.lock().faults.push_back((op, Phase::Before, err));
    }

    /// Applies the next `op` call and then reports `err`, as when the
    /// response is lost on the way back.
    pub fn fail_after_next(&self, op: Op, err: TransportError) {
        self.lock().faults.push_back((op, Phase::After, err));
    }

    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Serves `url` the way the store's public endpoint would for a caller
    /// without credentials.
    pub fn anonymous_get(&self, url: &str, now: OffsetDateTime) -> HttpResponse {
        let state = self.lock();

        let url = match Url::parse(url) {
            Ok(url) => url,
            Err(_) => return HttpResponse::new(400, "malformed url"),
        };
        if url.host_str() != Some(state.signer.host()) {
            return HttpResponse::new(404, "unknown host");
        }

        let (bucket, key) = match signer::object_from_url(&url) {
            Ok(parts) => parts,
            Err(_) => return HttpResponse::new(404, "no such object"),
        };
        let stored = match state.buckets.get(&bucket).and_then(|objects| objects.get(&key)) {
            Some(stored) => stored,
            None => return HttpResponse::new(404, "no such object"),
        };

        let signed = url
            .query_pairs()
            .any(|(name, _)| name.ends_with("-Signature"));
        let allowed = if signed {
            [&state.trusted_key, &state.identity_key]
                .into_iter()
                .flatten()
                .any(|trusted| state.signer.verify(trusted, Method::Get, &url, now).is_ok())
        } else {
            stored.meta.public == Some(true)
        };

        if allowed {
            HttpResponse::new(200, stored.data.clone())
        } else {
            HttpResponse::new(403, "access denied")
        }
    }
}

impl State {
    fn record(&mut self, op: Op) -> Result<(), TransportError> {
        *self.calls.entry(op).or_insert(0) += 1;
        self.take_fault(op, Phase::Before)
    }

    /// Called once `op` has been applied.
    fn settle(&mut self, op: Op) -> Result<(), TransportError> {
        self.take_fault(op, Phase::After)
    }

    fn take_fault(&mut self, op: Op, phase: Phase) -> Result<(), TransportError> {
        let index = self
            .faults
            .iter()
            .position(|(fault_op, fault_phase, _)| *fault_op == op && *fault_phase == phase);

        match index.and_then(|index| self.faults.remove(index)) {
            Some((_, _, err)) => Err(err),
            None => Ok(()),
        }
    }

    fn bucket(&self, bucket: &str) -> Result<&BTreeMap<String, StoredObject>, TransportError> {
        self.buckets
            .get(bucket)
            .ok_or_else(|| TransportError::status(404, format!("bucket not found: {}", bucket)))
    }

    fn object(&self, bucket: &str, key: &str) -> Result<&StoredObject, TransportError> {
        self.bucket(bucket)?
            .get(key)
            .ok_or_else(|| TransportError::status(404, format!("object not found: {}/{}", bucket, key)))
    }

    fn store(&mut self, bucket: &str, key: &str, data: Vec<u8>, options: &UploadOptions) -> Object {
        let generation = self.next_generation;
        self.next_generation += 1;

        let meta = Object {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: data.len() as u64,
            content_type: Some(options.content_type().to_string()),
            metadata: options.metadata.clone(),
            generation: Some(generation.to_string()),
            metageneration: Some(1),
            etag: Some(hex::encode(&Sha256::digest(&data)[..8])),
            storage_class: Some("STANDARD".to_string()),
            updated: Some(OffsetDateTime::now_utc()),
            public: Some(false),
            ..Default::default()
        };

        if let Some(objects) = self.buckets.get_mut(bucket) {
            objects.insert(
                key.to_string(),
                StoredObject {
                    data,
                    meta: meta.clone(),
                },
            );
        }

        meta
    }
}

pub struct MockTransport {
    store: MemoryStore,
    signer: UrlSigner,
}

impl MockTransport {
    pub fn new(store: MemoryStore) -> Self {
        let signer = store.lock().signer.clone();
        Self { store, signer }
    }
}

impl Transport for MockTransport {
    fn list_page(
        &self,
        _call: &Call,
        bucket: &str,
        prefix: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<ObjectPage, TransportError> {
        let mut state = self.store.lock();
        state.record(Op::List)?;

        let page_size = state.page_size;
        let prefix = prefix.unwrap_or("");
        let mut matching = state
            .bucket(bucket)?
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| page_token.map_or(true, |token| key.as_str() > token))
            .map(|(_, stored)| stored.meta.clone());

        let objects: Vec<Object> = matching.by_ref().take(page_size).collect();
        let next_page_token = match matching.next() {
            Some(_) => objects.last().map(|last| last.key.clone()),
            None => None,
        };

        Ok(ObjectPage {
            objects,
            next_page_token,
        })
    }

    fn put_object(
        &self,
        _call: &Call,
        bucket: &str,
        key: &str,
        body: &[u8],
        options: &UploadOptions,
    ) -> Result<Object, TransportError> {
        let mut state = self.store.lock();
        state.record(Op::Put)?;
        state.bucket(bucket)?;

        let object = state.store(bucket, key, body.to_vec(), options);
        state.settle(Op::Put)?;
        Ok(object)
    }

    fn get_object(&self, _call: &Call, bucket: &str, key: &str) -> Result<Vec<u8>, TransportError> {
        let mut state = self.store.lock();
        state.record(Op::Get)?;

        Ok(state.object(bucket, key)?.data.clone())
    }

    fn head_object(&self, _call: &Call, bucket: &str, key: &str) -> Result<Object, TransportError> {
        let mut state = self.store.lock();
        state.record(Op::Head)?;

        Ok(state.object(bucket, key)?.meta.clone())
    }

    fn delete_object(&self, _call: &Call, bucket: &str, key: &str) -> Result<(), TransportError> {
        let mut state = self.store.lock();
        state.record(Op::Delete)?;
        state.object(bucket, key)?;

        if let Some(objects) = state.buckets.get_mut(bucket) {
            objects.remove(key);
        }

        state.settle(Op::Delete)
    }

    fn copy_object(
        &self,
        _call: &Call,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        overwrite: bool,
    ) -> Result<Object, TransportError> {
        let mut state = self.store.lock();
        state.record(Op::Copy)?;

        let source = state.object(src_bucket, src_key)?.clone();
        let exists = state.bucket(dst_bucket)?.contains_key(dst_key);
        if exists && !overwrite && state.atomic_copy {
            return Err(TransportError::status(
                412,
                format!("precondition failed: {}/{} exists", dst_bucket, dst_key),
            ));
        }

        let options = UploadOptions {
            content_type: source.meta.content_type.clone(),
            metadata: source.meta.metadata.clone(),
        };

        let object = state.store(dst_bucket, dst_key, source.data, &options);
        state.settle(Op::Copy)?;
        Ok(object)
    }

    fn grant_public_read(&self, _call: &Call, bucket: &str, key: &str) -> Result<(), TransportError> {
        let mut state = self.store.lock();
        state.record(Op::GrantPublicRead)?;
        state.object(bucket, key)?;

        if let Some(stored) = state
            .buckets
            .get_mut(bucket)
            .and_then(|objects| objects.get_mut(key))
        {
            stored.meta.public = Some(true);
            stored.meta.metageneration = stored.meta.metageneration.map(|m| m + 1);
        }

        state.settle(Op::GrantPublicRead)
    }

    fn copy_precondition_is_atomic(&self) -> bool {
        self.store.lock().atomic_copy
    }

    fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    fn identity_signed_url(
        &self,
        call: &Call,
        req: &SignedUrlRequest,
    ) -> Option<Result<SignedUrl, StorageError>> {
        if !matches!(
            call.session.identity(),
            Identity::ServiceAccountFile(_) | Identity::ServiceAccountJson(_)
        ) {
            return None;
        }

        let state = self.store.lock();
        state
            .identity_key
            .as_ref()
            .map(|key| state.signer.sign(key, req))
    }
}
