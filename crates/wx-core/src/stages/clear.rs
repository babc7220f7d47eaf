//! Step 1: drop the tables a previous run left behind.

use std::sync::Arc;

use tracing::info;
use wx_config::keys;

use super::{try_stage, Stage, StageInput, StageName, StageOutcome, StageOutput};
use crate::store::{ColumnStore, ScopedConnection};

/// Deletes the differencing, lag and final tables. Missing tables are fine.
pub struct ClearStage {
    store: Arc<dyn ColumnStore>,
}

impl ClearStage {
    pub fn new(store: Arc<dyn ColumnStore>) -> Self {
        Self { store }
    }
}

impl Stage for ClearStage {
    fn name(&self) -> StageName {
        StageName::Clear
    }

    fn run(&self, input: &StageInput<'_>) -> StageOutcome {
        let tables = try_stage!(input.props.require_all(&[
            keys::ARIMA_DIFFERENCING_TABLE,
            keys::ARIMA_LAGS_TABLE,
            keys::ARIMA_OUT_TABLE,
        ]));
        let conn = try_stage!(ScopedConnection::open(self.store.clone()));
        for table in tables.values() {
            let existed = try_stage!(conn.delete_table(table));
            info!(table = %table, existed, "cleared table");
        }
        StageOutcome::Advance(StageOutput::default())
    }
}
