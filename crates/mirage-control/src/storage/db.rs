//! SQLite database for the Mirage control server.

use std::time::Duration;

pub use mirage_core::db::DatabaseError;

mirage_core::define_database!(ControlDatabase, "Control database migrations complete");

impl ControlDatabase {
    /// Liveness check bounded by `deadline`.
    pub async fn ping(&self, deadline: Duration) -> Result<(), DatabaseError> {
        mirage_core::db::ping_pool(self.pool(), deadline).await
    }
}
