//! Startup recovery for uploads interrupted by a crash or shutdown.

use tracing::info;

use crate::Result;
use crate::store::UploadUpdate;
use crate::types::UploadStatus;

use super::UploadManager;

impl UploadManager {
    /// Demote every upload that was in flight at shutdown to paused.
    ///
    /// Digests, resume tokens and session ids survive in the row, so a
    /// user-initiated resume continues the transfer instead of starting
    /// over. Returns the number of jobs demoted.
    pub async fn recover(&self) -> Result<usize> {
        let in_flight = self.store.list_in_flight_uploads().await?;
        let count = in_flight.len();
        if count > 0 {
            info!(count, "pausing uploads interrupted by shutdown");
        }

        for job in &in_flight {
            self.store
                .update_upload(
                    &job.id,
                    &UploadUpdate {
                        status: Some(UploadStatus::Paused),
                        speed: Some(0),
                        eta: Some(None),
                        ..Default::default()
                    },
                )
                .await?;
        }

        self.aggregate_folders().await?;
        self.emit_changed();
        Ok(count)
    }
}
