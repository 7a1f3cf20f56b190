use quickstart_lib::{
    BootstrapOutcome, BootstrapService, Collection, DocumentStore, SledStore, StoreConfig,
};
use serde_json::Value;
use std::path::PathBuf;
use structopt::StructOpt;
use uuid::Uuid;

#[derive(Debug, StructOpt)]
#[structopt(about = "Offline administration of the profile store")]
struct Opt {
    #[structopt(parse(from_os_str))]
    db_path: PathBuf,
    #[structopt(long, default_value = "user_profile")]
    bucket: String,
    #[structopt(long, default_value = "_default")]
    scope: String,
    #[structopt(long, default_value = "profile")]
    collection: String,
    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Create the bucket, collection and indexes the server expects
    Init,
    /// Print a stored profile document
    Show { pid: Uuid },
}

impl Opt {
    fn store_config(&self) -> StoreConfig {
        StoreConfig {
            connection_string: self.db_path.to_string_lossy().into_owned(),
            bucket_name: self.bucket.clone(),
            scope_name: self.scope.clone(),
            collection_name: self.collection.clone(),
            create_bucket: true,
            ..Default::default()
        }
    }
}

/// Turns a degraded bootstrap into an error so `main` returns and the store is flushed on drop.
fn ensure_ready(outcome: &BootstrapOutcome) -> anyhow::Result<()> {
    if !outcome.is_ready() {
        anyhow::bail!("store is {}", outcome);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let opt = Opt::from_args();
    let config = opt.store_config();
    let store = SledStore::connect(&config).await?;

    match opt.command {
        Command::Init => {
            let outcome = BootstrapService::new(&store, &config).run().await;
            println!("Store at {} is {}", opt.db_path.display(), outcome);
            ensure_ready(&outcome)?;
        }
        Command::Show { pid } => {
            let keyspace = config.keyspace();
            let document: Value = Collection::new(&store, &keyspace)
                .get(&pid.to_string())
                .await?;
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
    }

    Ok(())
}
