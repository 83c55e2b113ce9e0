use anyhow::Context;
use mongodb::{bson::doc, options::ClientOptions, Client, Database};
use std::time::Duration;

/// Connect to `uri` and return a handle on `database`.
///
/// The server is pinged before returning so an unreachable store fails here
/// rather than on the first change event.
pub async fn mongo_connect(uri: &str, database: &str) -> anyhow::Result<Database> {
    tracing::debug!("Parsing MongoDB connection options for database {database}");
    let mut options = ClientOptions::parse(uri)
        .await
        .with_context(|| format!("Failed to parse MongoDB connection string for {database}"))?;
    options.connect_timeout = Some(Duration::from_secs(10));
    options.server_selection_timeout = Some(Duration::from_secs(10));

    let client = Client::with_options(options)?;
    let database = client.database(database);

    database
        .run_command(doc! { "ping": 1 })
        .await
        .with_context(|| format!("Failed to reach MongoDB database {}", database.name()))?;
    tracing::info!("Connected to MongoDB database {}", database.name());

    Ok(database)
}
