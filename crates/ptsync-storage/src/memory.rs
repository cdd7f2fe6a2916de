use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{parse_a1_cell, RangeUpdate, SheetStore, StoreError, StoreOp};

#[derive(Debug, Default)]
struct MemoryState {
    sheets: HashMap<String, Vec<Vec<String>>>,
    notes: HashMap<(String, u32), String>,
    frozen: HashSet<String>,
    failures: HashMap<StoreOp, VecDeque<StoreError>>,
    calls: Vec<StoreOp>,
    hide_append_position: bool,
}

impl MemoryState {
    fn take_failure(&mut self, op: StoreOp) -> Result<(), StoreError> {
        self.calls.push(op);
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn sheet_mut(&mut self, sheet: &str) -> Result<&mut Vec<Vec<String>>, StoreError> {
        self.sheets
            .get_mut(sheet)
            .ok_or_else(|| StoreError::SheetNotFound(sheet.to_string()))
    }
}

fn place(rows: &mut Vec<Vec<String>>, range: &str, values: Vec<Vec<String>>) -> Result<(), StoreError> {
    let (col, row) = parse_a1_cell(range)
        .ok_or_else(|| StoreError::Remote {
            status: 400,
            message: format!("Unable to parse range: {range}"),
        })?;
    for (offset, value_row) in values.into_iter().enumerate() {
        let row_idx = (row as usize - 1) + offset;
        if rows.len() <= row_idx {
            rows.resize_with(row_idx + 1, Vec::new);
        }
        let target = &mut rows[row_idx];
        if target.len() < col + value_row.len() {
            target.resize(col + value_row.len(), String::new());
        }
        for (i, cell) in value_row.into_iter().enumerate() {
            target[col + i] = cell;
        }
    }
    Ok(())
}

fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

/// In-process [`SheetStore`] with scripted failures and a call log.
#[derive(Debug, Default)]
pub struct MemorySheetStore {
    state: Mutex<MemoryState>,
}

impl MemorySheetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet(mut self, sheet: &str, rows: Vec<Vec<String>>) -> Self {
        self.state.get_mut().sheets.insert(sheet.to_string(), rows);
        self
    }

    /// Make appends report no position, forcing callers onto the re-read fallback.
    pub fn without_append_position(mut self) -> Self {
        self.state.get_mut().hide_append_position = true;
        self
    }

    /// Queue an error for the next call of `op`.
    pub async fn fail_next(&self, op: StoreOp, err: StoreError) {
        self.state
            .lock()
            .await
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub async fn sheet(&self, sheet: &str) -> Option<Vec<Vec<String>>> {
        self.state.lock().await.sheets.get(sheet).cloned()
    }

    pub async fn calls(&self) -> Vec<StoreOp> {
        self.state.lock().await.calls.clone()
    }

    pub async fn count_calls(&self, op: StoreOp) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| **c == op)
            .count()
    }

    pub async fn note(&self, sheet: &str, row: u32) -> Option<String> {
        self.state
            .lock()
            .await
            .notes
            .get(&(sheet.to_string(), row))
            .cloned()
    }

    pub async fn is_frozen(&self, sheet: &str) -> bool {
        self.state.lock().await.frozen.contains(sheet)
    }
}

#[async_trait]
impl SheetStore for MemorySheetStore {
    async fn ensure_sheet(&self, sheet: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.take_failure(StoreOp::EnsureSheet)?;
        state.sheets.entry(sheet.to_string()).or_default();
        Ok(())
    }

    async fn read_all(&self, sheet: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let mut state = self.state.lock().await;
        state.take_failure(StoreOp::ReadAll)?;
        let mut rows = state.sheet_mut(sheet)?.clone();
        while rows.last().is_some_and(|r| is_blank_row(r)) {
            rows.pop();
        }
        Ok(rows)
    }

    async fn write_range(
        &self,
        sheet: &str,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.take_failure(StoreOp::WriteRange)?;
        place(state.sheet_mut(sheet)?, range, values)
    }

    async fn append_row(&self, sheet: &str, row: Vec<String>) -> Result<Option<u32>, StoreError> {
        let mut state = self.state.lock().await;
        state.take_failure(StoreOp::AppendRow)?;
        let hide = state.hide_append_position;
        let rows = state.sheet_mut(sheet)?;
        // The table ends at the first blank row; the append fills it in place.
        let slot = rows.iter().position(|r| is_blank_row(r)).unwrap_or(rows.len());
        if slot == rows.len() {
            rows.push(row);
        } else {
            rows[slot] = row;
        }
        let position = (slot + 1) as u32;
        Ok(if hide { None } else { Some(position) })
    }

    async fn batch_write(&self, sheet: &str, updates: Vec<RangeUpdate>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.take_failure(StoreOp::BatchWrite)?;
        let rows = state.sheet_mut(sheet)?;
        for update in updates {
            place(rows, &update.range, update.values)?;
        }
        Ok(())
    }

    async fn annotate_row(
        &self,
        sheet: &str,
        row: u32,
        _width: usize,
        note: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.take_failure(StoreOp::Annotate)?;
        state.sheet_mut(sheet)?;
        state
            .notes
            .insert((sheet.to_string(), row), note.to_string());
        Ok(())
    }

    async fn freeze_header_row(&self, sheet: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.take_failure(StoreOp::FreezeHeader)?;
        state.sheet_mut(sheet)?;
        state.frozen.insert(sheet.to_string());
        Ok(())
    }
}
