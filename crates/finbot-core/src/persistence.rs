//! Persistence gateway: destination bookkeeping and row encoding on top of a
//! raw [`TabularStore`].

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde_json::Value;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::{classifier::DATE_FORMAT, domain::ClassifiedRecord, errors::PersistError};

/// Raw operations against a spreadsheet-like backend.
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Names of every destination (sheet/tab) that currently exists.
    async fn list_destinations(&self) -> Result<Vec<String>, PersistError>;

    async fn create_destination(&self, name: &str) -> Result<(), PersistError>;

    /// Append one row, anchored at the first column of `name`.
    async fn append_row(&self, name: &str, row: &[Value]) -> Result<(), PersistError>;
}

/// Encode a record as `(date, kind, amount, description, category)`.
pub fn record_row(record: &ClassifiedRecord) -> Vec<Value> {
    vec![
        Value::String(record.occurred_on.format(DATE_FORMAT).to_string()),
        Value::String(record.kind.label().to_string()),
        amount_cell(record.amount),
        Value::String(record.description.clone()),
        Value::String(record.category.label().to_string()),
    ]
}

/// A numeric cell when the amount survives the trip through `f64` unchanged,
/// otherwise the exact decimal text.
fn amount_cell(amount: Decimal) -> Value {
    let exact = amount.normalize().to_string();
    amount
        .to_f64()
        .filter(|f| f.to_string() == exact)
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::String(exact))
}

/// Process-wide handle to the store.
///
/// `ensure_destination` is single-flight per name: concurrent first callers
/// share one lookup/create, and a success is remembered for the process
/// lifetime. A failed attempt leaves nothing cached.
pub struct PersistenceGateway {
    store: Arc<dyn TabularStore>,
    ensured: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn TabularStore>) -> Self {
        Self {
            store,
            ensured: Mutex::new(HashMap::new()),
        }
    }

    async fn cell_for(&self, name: &str) -> Arc<OnceCell<()>> {
        let mut map = self.ensured.lock().await;
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    pub async fn ensure_destination(&self, name: &str) -> Result<(), PersistError> {
        let cell = self.cell_for(name).await;
        cell.get_or_try_init(|| async {
            let existing = self.store.list_destinations().await?;
            if existing.iter().any(|n| n == name) {
                debug!(destination = name, "destination already exists");
                return Ok(());
            }
            self.store.create_destination(name).await?;
            info!(destination = name, "destination created");
            Ok::<(), PersistError>(())
        })
        .await
        .map(|_| ())
    }

    /// Single append attempt; retrying is the caller's decision.
    pub async fn append_record(
        &self,
        name: &str,
        record: &ClassifiedRecord,
    ) -> Result<(), PersistError> {
        self.store.append_row(name, &record_row(record)).await?;
        debug!(destination = name, "row appended");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::TabularStore;
    use crate::errors::PersistError;

    /// In-memory store with scripted failures and call counters.
    #[derive(Default)]
    pub struct FakeStore {
        pub destinations: Mutex<Vec<String>>,
        pub rows: Mutex<Vec<(String, Vec<Value>)>>,
        pub list_calls: Mutex<u32>,
        pub create_calls: Mutex<u32>,
        pub append_calls: Mutex<u32>,
        /// Number of upcoming appends that fail.
        pub failing_appends: Mutex<u32>,
        pub fail_lookups: Mutex<bool>,
        /// Artificial latency on lookups, to widen race windows.
        pub lookup_delay: Option<Duration>,
    }

    impl FakeStore {
        pub fn with_destinations(names: &[&str]) -> Self {
            Self {
                destinations: Mutex::new(names.iter().map(|s| s.to_string()).collect()),
                ..Default::default()
            }
        }

        pub fn count(counter: &Mutex<u32>) -> u32 {
            *counter.lock().unwrap()
        }
    }

    #[async_trait]
    impl TabularStore for FakeStore {
        async fn list_destinations(&self) -> Result<Vec<String>, PersistError> {
            *self.list_calls.lock().unwrap() += 1;
            if let Some(d) = self.lookup_delay {
                tokio::time::sleep(d).await;
            }
            if *self.fail_lookups.lock().unwrap() {
                return Err(PersistError::Lookup("store unavailable".to_string()));
            }
            Ok(self.destinations.lock().unwrap().clone())
        }

        async fn create_destination(&self, name: &str) -> Result<(), PersistError> {
            *self.create_calls.lock().unwrap() += 1;
            self.destinations.lock().unwrap().push(name.to_string());
            Ok(())
        }

        async fn append_row(&self, name: &str, row: &[Value]) -> Result<(), PersistError> {
            *self.append_calls.lock().unwrap() += 1;
            {
                let mut failing = self.failing_appends.lock().unwrap();
                if *failing > 0 {
                    *failing -= 1;
                    return Err(PersistError::Append {
                        name: name.to_string(),
                        reason: "503 backend error".to_string(),
                    });
                }
            }
            self.rows
                .lock()
                .unwrap()
                .push((name.to_string(), row.to_vec()));
            Ok(())
        }
    }
}
