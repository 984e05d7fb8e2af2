use promptdesk_core::{byte_offset, char_len};

/// Selection range in characters. `start == end` is a caret.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub start: usize,
    pub end: usize,
}

impl Selection {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    pub fn caret(at: usize) -> Self {
        Self { start: at, end: at }
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Normalized and clamped to a buffer of `len` characters.
    pub fn clamp(&self, len: usize) -> Self {
        Self::new(self.start.min(len), self.end.min(len))
    }

    /// The selected characters of `text`.
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        let sel = self.clamp(char_len(text));
        let from = byte_offset(text, sel.start).unwrap_or(text.len());
        let to = byte_offset(text, sel.end).unwrap_or(text.len());
        &text[from..to]
    }
}

/// The editor widget as seen by the orchestrator.
///
/// Change notification is the widget's job: after user keystrokes it calls
/// `Orchestrator::notify_buffer_changed`.
pub trait TextBuffer {
    fn value(&self) -> String;
    fn set_value(&mut self, text: &str);
    fn selection(&self) -> Selection;
    fn set_selection(&mut self, selection: Selection);
}

/// In-process buffer used by the CLI and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryBuffer {
    text: String,
    selection: Selection,
}

impl MemoryBuffer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            selection: Selection::default(),
        }
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection.clamp(char_len(&self.text));
        self
    }

    /// Simulate typing at a character position.
    pub fn type_at(&mut self, at: usize, inserted: &str) {
        let byte = byte_offset(&self.text, at.min(char_len(&self.text))).unwrap_or(self.text.len());
        self.text.insert_str(byte, inserted);
        self.selection = Selection::caret(at + char_len(inserted));
    }
}

impl TextBuffer for MemoryBuffer {
    fn value(&self) -> String {
        self.text.clone()
    }

    fn set_value(&mut self, text: &str) {
        self.text = text.to_string();
    }

    fn selection(&self) -> Selection {
        self.selection
    }

    fn set_selection(&mut self, selection: Selection) {
        self.selection = selection;
    }
}
