use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::ExamId;

pub(crate) type ExamGuard = OwnedMutexGuard<()>;

/// One async mutex per exam id, created on demand. Entries nobody holds or waits on are
/// pruned on the next acquisition, so the table only tracks exams with work in flight.
#[derive(Debug, Default)]
pub(crate) struct ExamLocks {
    table: Mutex<HashMap<ExamId, Arc<AsyncMutex<()>>>>,
}

impl ExamLocks {
    pub(crate) async fn acquire(&self, id: &ExamId) -> ExamGuard {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
            table.entry(id.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
