// Splits the leading <thinking> block out of streamed assistant text

const OPEN_TAG: &str = "<thinking>";
const CLOSE_TAG: &str = "</thinking>";

/// Cap on leading whitespace held while waiting for an opening tag.
const MAX_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Thinking(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Phase {
    /// Nothing but whitespace or a prefix of `<thinking>` seen so far.
    #[default]
    Leading,
    Thinking,
    /// Everything from here on is answer text, tags included.
    Answer,
}

/// Stateful splitter for text chunks that may open with a `<thinking>` block.
///
/// Only a block at the very start of the response (after optional
/// whitespace) is reasoning. After its closing tag, or once any other text
/// appears first, all further text passes through unchanged. Tags can
/// arrive split across chunks; a partial tag is held back until the next
/// chunk decides it.
#[derive(Debug, Default)]
pub struct ThinkingSplitter {
    pending: String,
    phase: Phase,
}

impl ThinkingSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) -> Vec<Segment> {
        match self.phase {
            Phase::Answer => text_segment(chunk.to_string()).into_iter().collect(),
            Phase::Thinking => self.push_thinking(chunk),
            Phase::Leading => {
                self.pending.push_str(chunk);
                let trimmed = self.pending.trim_start();

                if let Some(rest) = trimmed.strip_prefix(OPEN_TAG) {
                    let rest = rest.to_string();
                    self.pending.clear();
                    self.phase = Phase::Thinking;
                    return self.push_thinking(&rest);
                }

                if OPEN_TAG.starts_with(trimmed) && self.pending.len() <= MAX_BUFFER {
                    return Vec::new();
                }

                self.phase = Phase::Answer;
                text_segment(std::mem::take(&mut self.pending))
                    .into_iter()
                    .collect()
            }
        }
    }

    fn push_thinking(&mut self, chunk: &str) -> Vec<Segment> {
        let mut text = std::mem::take(&mut self.pending);
        text.push_str(chunk);

        let mut segments = Vec::new();
        match text.find(CLOSE_TAG) {
            Some(idx) => {
                if idx > 0 {
                    segments.push(Segment::Thinking(text[..idx].to_string()));
                }
                self.phase = Phase::Answer;
                segments.extend(text_segment(text[idx + CLOSE_TAG.len()..].to_string()));
            }
            None => {
                let split = find_partial_tag(&text, CLOSE_TAG).unwrap_or(text.len());
                if split > 0 {
                    segments.push(Segment::Thinking(text[..split].to_string()));
                }
                self.pending = text[split..].to_string();
            }
        }
        segments
    }

    /// Releases any held-back partial tag as content of the current phase.
    pub fn flush(&mut self) -> Option<Segment> {
        if self.pending.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.pending);
        match self.phase {
            Phase::Thinking => Some(Segment::Thinking(text)),
            Phase::Leading | Phase::Answer => Some(Segment::Text(text)),
        }
    }
}

fn text_segment(text: String) -> Option<Segment> {
    (!text.is_empty()).then_some(Segment::Text(text))
}

/// Index where a trailing prefix of `tag` starts, if `text` ends with one.
fn find_partial_tag(text: &str, tag: &str) -> Option<usize> {
    (1..tag.len())
        .rev()
        .map(|i| &tag[..i])
        .find(|prefix| text.ends_with(prefix))
        .map(|prefix| text.len() - prefix.len())
}
