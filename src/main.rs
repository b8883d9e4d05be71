use std::{io, time::Duration};

use clap::Parser;
use tracing::{info, span, Level};
use tracing_subscriber::EnvFilter;

use objectclient::{
    config::{Args, Command, Settings},
    snippets, StorageError,
};

fn run(args: &Args) -> Result<(), StorageError> {
    let settings = Settings::from_env_and_args(args)?;
    info!(provider = %settings.provider, bucket = %settings.bucket, "settings");

    let client = settings.connect()?;
    let bucket = settings.bucket.as_str();
    let out = &mut io::stdout().lock();

    match &args.command {
        Command::List { prefix: None } => snippets::list_blobs(&client, out, bucket),
        Command::List {
            prefix: Some(prefix),
        } => snippets::list_blobs_with_prefix(&client, out, bucket, prefix),
        Command::Upload {
            source,
            destination,
        } => snippets::upload_blob(&client, out, bucket, source, destination),
        Command::Download {
            source,
            destination,
        } => snippets::download_blob(&client, out, bucket, source, destination),
        Command::Metadata { key } => snippets::blob_metadata(&client, out, bucket, key),
        Command::Delete { key } => snippets::delete_blob(&client, out, bucket, key),
        Command::MakePublic { key } => snippets::make_blob_public(&client, out, bucket, key),
        Command::SignedUrl { key, ttl_secs } => snippets::generate_signed_url_for(
            &client,
            out,
            bucket,
            key,
            Duration::from_secs(*ttl_secs),
        ),
        Command::Rename { old_key, new_key } => {
            snippets::rename_blob(&client, out, bucket, old_key, new_key)
        }
        Command::Copy {
            key,
            destination_bucket,
            destination_key,
        } => snippets::copy_blob(&client, out, bucket, key, destination_bucket, destination_key),
    }
}

fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let span = span!(Level::INFO, "main", context = "main");
    let _e = span.enter();

    let args = Args::parse();
    info!(bucket_uri = %args.bucket_uri, command = ?args.command, "args");

    if let Err(err) = run(&args) {
        eprintln!("error ({}): {}", err.kind(), err);
        std::process::exit(1);
    }
}
