// src/db.rs

use mongodb::{options::ClientOptions, Client, Database};

/// Handle to the scrumline database. Cheap to clone via `Arc` in `AppState`;
/// the driver only connects on first use.
pub struct MongoDB {
    pub client: Client,
    pub db: Database,
}

impl MongoDB {
    pub async fn init(uri: &str, db_name: &str) -> Self {
        let options = ClientOptions::parse(uri)
            .await
            .expect("MONGO_URI is not a valid MongoDB connection string");
        let client =
            Client::with_options(options).expect("Failed to build MongoDB client");
        let db = client.database(db_name);
        MongoDB { client, db }
    }
}
