use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::error::{MongoDaoError, MongoResult};

/// Pings attempted before the first connection is given up on. The storage
/// supervisor keeps retrying afterwards, so this stays short.
const PING_ATTEMPTS: u32 = 4;
const FIRST_PING_DELAY: Duration = Duration::from_millis(200);

/// Build a client and wait until the deployment answers a ping.
pub async fn establish_connection(
    options: &ClientOptions,
    database_name: &str,
) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let mut delay = FIRST_PING_DELAY;
    let mut attempt = 1;
    loop {
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => {
                debug!(attempt, database = database_name, "score database answered ping");
                return Ok((client, database));
            }
            Err(source) if attempt == PING_ATTEMPTS => {
                return Err(MongoDaoError::InitialPing {
                    attempts: attempt,
                    source,
                });
            }
            Err(err) => {
                warn!(attempt, wait_ms = delay.as_millis() as u64, error = %err, "score database ping failed");
                sleep(delay).await;
                delay = delay * 2 + Duration::from_millis(rand::rng().random_range(0..50));
                attempt += 1;
            }
        }
    }
}
