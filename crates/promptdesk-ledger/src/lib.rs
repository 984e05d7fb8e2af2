use anyhow::Result;
use promptdesk_core::{AuditAction, AuditTrailEntry, DEFAULT_AUDIT_CAP, EditError, EditHistoryEntry};
use std::collections::VecDeque;
use uuid::Uuid;

/// Linear undo/redo checkpoints with a single cursor.
///
/// `cursor` counts the entries currently in effect: entries `[0, cursor)` are
/// applied, `[cursor, len)` form the redo tail. The history never touches the
/// live buffer; callers write the returned text themselves.
#[derive(Debug, Clone, Default)]
pub struct EditHistory {
    entries: Vec<EditHistoryEntry>,
    cursor: usize,
    cap: Option<usize>,
}

impl EditHistory {
    pub fn new(cap: Option<usize>) -> Self {
        Self {
            entries: Vec::new(),
            cursor: 0,
            cap: cap.map(|c| c.max(1)),
        }
    }

    /// Append a checkpoint, dropping any redo tail beyond the cursor.
    pub fn record(&mut self, entry: EditHistoryEntry) {
        self.entries.truncate(self.cursor);
        self.entries.push(entry);
        if let Some(cap) = self.cap
            && self.entries.len() > cap
        {
            let overflow = self.entries.len() - cap;
            self.entries.drain(..overflow);
        }
        self.cursor = self.entries.len();
    }

    /// Step back one checkpoint; apply the returned entry's `text_before`.
    pub fn undo(&mut self) -> Result<&EditHistoryEntry, EditError> {
        if self.cursor == 0 {
            return Err(EditError::AtBoundary("undo"));
        }
        self.cursor -= 1;
        Ok(&self.entries[self.cursor])
    }

    /// Step forward one checkpoint; apply the returned entry's `text_after`.
    pub fn redo(&mut self) -> Result<&EditHistoryEntry, EditError> {
        if self.cursor == self.entries.len() {
            return Err(EditError::AtBoundary("redo"));
        }
        self.cursor += 1;
        Ok(&self.entries[self.cursor - 1])
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.entries.len()
    }

    pub fn index(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[EditHistoryEntry] {
        &self.entries
    }
}

/// Append-only audit log kept as a ring buffer; the oldest entries fall off
/// once the cap is reached. The cap is at least one, so the latest entry always
/// survives.
#[derive(Debug, Clone)]
pub struct AuditTrail {
    entries: VecDeque<AuditTrailEntry>,
    cap: usize,
    dropped: u64,
}

impl AuditTrail {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            entries: VecDeque::with_capacity(cap.min(DEFAULT_AUDIT_CAP)),
            cap,
            dropped: 0,
        }
    }

    pub fn append(&mut self, entry: AuditTrailEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.cap {
            self.entries.pop_front();
            self.dropped = self.dropped.saturating_add(1);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries evicted by the cap since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn latest(&self) -> Option<&AuditTrailEntry> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuditTrailEntry> {
        self.entries.iter()
    }

    pub fn by_action(&self, action: AuditAction) -> Vec<&AuditTrailEntry> {
        self.entries.iter().filter(|e| e.action == action).collect()
    }

    pub fn for_session(&self, session_id: Uuid) -> Vec<&AuditTrailEntry> {
        self.entries
            .iter()
            .filter(|e| e.session_id == session_id)
            .collect()
    }

    pub fn export_json(&self) -> Result<String> {
        let entries: Vec<&AuditTrailEntry> = self.entries.iter().collect();
        Ok(serde_json::to_string_pretty(&entries)?)
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIT_CAP)
    }
}

/// Undo/redo history plus the audit trail. The two are independent: rejected
/// suggestions advance the trail but never the history cursor.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub history: EditHistory,
    pub audit: AuditTrail,
}

impl Ledger {
    pub fn new(audit_cap: usize, history_cap: Option<usize>) -> Self {
        Self {
            history: EditHistory::new(history_cap),
            audit: AuditTrail::new(audit_cap),
        }
    }

    pub fn from_settings(settings: &promptdesk_core::LedgerSettings) -> Self {
        Self::new(settings.audit_cap, settings.history_cap)
    }
}
