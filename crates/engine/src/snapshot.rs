use folio_storage::FolioStorage;

use crate::error::Result;

/// Commit `snapshot` if `result` is Ok, abort it otherwise.
///
/// Abort failures are swallowed: the snapshot is consumed either way and the
/// original error is what the caller needs.
pub(crate) async fn finish<S: FolioStorage, T>(
    storage: &S,
    snapshot: S::Snapshot,
    result: Result<T>,
) -> Result<T> {
    match result {
        Ok(value) => {
            storage.commit_snapshot(snapshot).await?;
            Ok(value)
        }
        Err(e) => {
            let _ = storage.abort_snapshot(snapshot).await;
            Err(e)
        }
    }
}
