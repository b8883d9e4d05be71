use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Parser, Subcommand};

use crate::{
    client::{ClientOptions, StorageClient},
    credentials::{CredentialProvider, ExplicitCredentials},
    model::error::StorageError,
    signer::HmacKey,
    util::{self, object::Provider},
};

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Object storage snippets for GCS and S3")]
pub struct Args {
    /// Bucket URI, e.g. gs://my-bucket or s3://my-bucket
    pub bucket_uri: String,

    #[command(subcommand)]
    pub command: Command,

    /// Per-call deadline in seconds (overrides OBJECTCLIENT_DEADLINE_SECS)
    #[arg(long, global = true)]
    pub deadline_secs: Option<u64>,

    /// Retries of transient failures (overrides OBJECTCLIENT_MAX_RETRIES)
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// First retry delay in milliseconds (overrides OBJECTCLIENT_INITIAL_BACKOFF_MS)
    #[arg(long, global = true)]
    pub initial_backoff_ms: Option<u64>,

    /// Let copy and rename replace an existing destination (overrides OBJECTCLIENT_OVERWRITE)
    #[arg(long, global = true)]
    pub overwrite: bool,

    /// S3 region (overrides OBJECTCLIENT_S3_REGION)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Service account key file for GCS
    #[arg(long, global = true)]
    pub credentials: Option<PathBuf>,

    /// HMAC access id used for signing
    #[arg(long, global = true, requires = "hmac_secret")]
    pub hmac_access_id: Option<String>,

    /// HMAC secret used for signing
    #[arg(long, global = true, requires = "hmac_access_id")]
    pub hmac_secret: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List objects in the bucket
    List {
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Upload a local file
    Upload { source: PathBuf, destination: String },
    /// Download an object to a local file
    Download { source: String, destination: PathBuf },
    /// Print the metadata of an object
    Metadata { key: String },
    /// Delete an object
    Delete { key: String },
    /// Grant anonymous read access to an object
    MakePublic { key: String },
    /// Print a signed GET URL for an object
    SignedUrl {
        key: String,
        #[arg(long, default_value_t = 3600)]
        ttl_secs: u64,
    },
    /// Rename an object within the bucket
    Rename { old_key: String, new_key: String },
    /// Copy an object, possibly into another bucket
    Copy {
        key: String,
        destination_bucket: String,
        destination_key: String,
    },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub provider: Provider,
    pub bucket: String,
    pub options: ClientOptions,
    pub explicit: ExplicitCredentials,
}

impl Settings {
    pub fn from_env_and_args(args: &Args) -> Result<Self, StorageError> {
        Self::from_lookup(args, |name| std::env::var(name).ok())
    }

    /// Flags win over environment variables, which win over defaults.
    pub fn from_lookup<F>(args: &Args, env: F) -> Result<Self, StorageError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = util::object::parse_provider_from_uri(&args.bucket_uri)?;
        let bucket = util::object::parse_bucket_from_uri(&args.bucket_uri).to_string();
        util::object::validate_name("bucket", &bucket)?;

        // --- Environment fallback ---
        let mut options = ClientOptions::default();
        if let Some(secs) = env_value::<u64, _>(&env, "OBJECTCLIENT_DEADLINE_SECS")? {
            options.deadline = deadline(secs);
        }
        if let Some(retries) = env_value(&env, "OBJECTCLIENT_MAX_RETRIES")? {
            options.retry.max_retries = retries;
        }
        if let Some(ms) = env_value(&env, "OBJECTCLIENT_INITIAL_BACKOFF_MS")? {
            options.retry.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(overwrite) = env_value(&env, "OBJECTCLIENT_OVERWRITE")? {
            options.overwrite_existing = overwrite;
        }
        if let Some(region) = env("OBJECTCLIENT_S3_REGION").filter(|r| !r.is_empty()) {
            options.s3_region = region;
        }

        // --- Merge ---
        if let Some(secs) = args.deadline_secs {
            options.deadline = deadline(secs);
        }
        if let Some(retries) = args.max_retries {
            options.retry.max_retries = retries;
        }
        if let Some(ms) = args.initial_backoff_ms {
            options.retry.initial_backoff = Duration::from_millis(ms);
        }
        options.overwrite_existing |= args.overwrite;
        if let Some(region) = &args.region {
            options.s3_region = region.clone();
        }

        let hmac_key = match (&args.hmac_access_id, &args.hmac_secret) {
            (Some(id), Some(secret)) => Some(HmacKey::new(id.as_str(), secret.as_str())),
            _ => None,
        };

        Ok(Self {
            provider,
            bucket,
            options,
            explicit: ExplicitCredentials {
                service_account_file: args.credentials.clone(),
                hmac_key,
            },
        })
    }

    pub fn connect(&self) -> Result<StorageClient, StorageError> {
        let session =
            CredentialProvider::default_chain(self.provider, self.explicit.clone()).resolve()?;
        StorageClient::connect(session, self.options.clone())
    }
}

/// Zero disables the deadline.
fn deadline(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn env_value<T, F>(env: &F, name: &str) -> Result<Option<T>, StorageError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match env(name).filter(|value| !value.is_empty()) {
        Some(value) => value.parse::<T>().map(Some).map_err(|err| {
            StorageError::InvalidArgument(format!("parsing {} value `{}`: {}", name, value, err))
        }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::error::ErrorKind;
    use std::collections::HashMap;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("objectclient").chain(argv.iter().copied())).unwrap()
    }

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_subcommands() {
        let cases = vec![
            (vec!["gs://b", "list"], Command::List { prefix: None }),
            (
                vec!["gs://b", "list", "--prefix", "logs/"],
                Command::List {
                    prefix: Some("logs/".to_string()),
                },
            ),
            (
                vec!["gs://b", "signed-url", "k"],
                Command::SignedUrl {
                    key: "k".to_string(),
                    ttl_secs: 3600,
                },
            ),
            (
                vec!["s3://b", "make-public", "k"],
                Command::MakePublic {
                    key: "k".to_string(),
                },
            ),
            (
                vec!["gs://b", "copy", "k", "other", "k2"],
                Command::Copy {
                    key: "k".to_string(),
                    destination_bucket: "other".to_string(),
                    destination_key: "k2".to_string(),
                },
            ),
        ];

        for (argv, expected) in cases {
            assert_eq!(parse(&argv).command, expected, "failed for case: {:?}", argv);
        }
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(&parse(&["gs://b", "list"]), env_of(&[])).unwrap();

        assert_eq!(settings.provider, Provider::Gcs);
        assert_eq!(settings.bucket, "b");
        assert_eq!(settings.options.deadline, Some(Duration::from_secs(30)));
        assert_eq!(settings.options.retry.max_retries, 3);
        assert!(!settings.options.overwrite_existing);
        assert_eq!(settings.options.s3_region, "us-east-1");
    }

    #[test]
    fn test_flags_override_environment() {
        let env = env_of(&[
            ("OBJECTCLIENT_DEADLINE_SECS", "5"),
            ("OBJECTCLIENT_MAX_RETRIES", "7"),
            ("OBJECTCLIENT_INITIAL_BACKOFF_MS", "20"),
            ("OBJECTCLIENT_S3_REGION", "eu-west-1"),
        ]);
        let args = parse(&[
            "s3://b",
            "list",
            "--max-retries",
            "1",
            "--region",
            "ap-south-1",
            "--overwrite",
        ]);

        let settings = Settings::from_lookup(&args, env).unwrap();

        assert_eq!(settings.provider, Provider::S3);
        assert_eq!(settings.options.deadline, Some(Duration::from_secs(5)));
        assert_eq!(settings.options.retry.max_retries, 1);
        assert_eq!(settings.options.retry.initial_backoff, Duration::from_millis(20));
        assert_eq!(settings.options.s3_region, "ap-south-1");
        assert!(settings.options.overwrite_existing);
    }

    #[test]
    fn test_zero_deadline_disables_it() {
        let args = parse(&["gs://b", "list", "--deadline-secs", "0"]);
        let settings = Settings::from_lookup(&args, env_of(&[])).unwrap();
        assert_eq!(settings.options.deadline, None);
    }

    #[test]
    fn test_invalid_settings() {
        let cases = vec![
            (vec!["b", "list"], vec![]),
            (vec!["gs://", "list"], vec![]),
            (vec!["gs://b", "list"], vec![("OBJECTCLIENT_MAX_RETRIES", "many")]),
            (vec!["gs://b", "list"], vec![("OBJECTCLIENT_OVERWRITE", "maybe")]),
        ];

        for (argv, vars) in cases {
            let err = Settings::from_lookup(&parse(&argv), env_of(&vars)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "failed for case: {:?}", argv);
        }
    }

    #[test]
    fn test_hmac_flags() {
        let args = parse(&[
            "gs://b",
            "signed-url",
            "k",
            "--hmac-access-id",
            "GOOG1",
            "--hmac-secret",
            "s",
        ]);
        let settings = Settings::from_lookup(&args, env_of(&[])).unwrap();

        assert_eq!(settings.explicit.hmac_key.unwrap().access_id, "GOOG1");
        assert!(Args::try_parse_from(["objectclient", "gs://b", "list", "--hmac-secret", "s"]).is_err());
    }
}
