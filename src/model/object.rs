use std::collections::HashMap;

use time::OffsetDateTime;

/// Metadata of a stored object. Never carries the body.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Object {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    /// Store-assigned revision token; S3 reports the version id or etag here.
    pub generation: Option<String>,
    pub metageneration: Option<i64>,
    pub etag: Option<String>,
    pub md5_hash: Option<String>,
    pub crc32c: Option<String>,
    pub storage_class: Option<String>,
    pub updated: Option<OffsetDateTime>,
    /// `None` when the store did not report the object's ACL.
    pub public: Option<bool>,
}

/// One page of a listing.
#[derive(Clone, Debug, Default)]
pub struct ObjectPage {
    pub objects: Vec<Object>,
    pub next_page_token: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl UploadOptions {
    pub fn content_type(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or("application/octet-stream")
    }
}
