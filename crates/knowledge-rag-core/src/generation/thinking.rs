//! Separation of inline `<think>…</think>` reasoning from answer text.
//!
//! Reasoning models served without a dedicated thinking channel emit their
//! trace inline. [`ThinkSplitter`] routes that text to
//! [`StreamEvent::Thinking`] and everything else to [`StreamEvent::Delta`],
//! even when a tag is split across two deltas.

use super::{Generation, StreamEvent};

const OPEN_TAG: &str = "<think>";
const CLOSE_TAG: &str = "</think>";

/// Incremental `<think>` tag splitter for streamed text.
#[derive(Debug, Default)]
pub struct ThinkSplitter {
    inside: bool,
    pending: String,
}

impl ThinkSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one delta; returns the events that are now unambiguous.
    pub fn push(&mut self, delta: &str) -> Vec<StreamEvent> {
        self.pending.push_str(delta);
        let mut events = Vec::new();

        loop {
            let tag = if self.inside { CLOSE_TAG } else { OPEN_TAG };
            match self.pending.find(tag) {
                Some(pos) => {
                    let before: String = self.pending.drain(..pos).collect();
                    self.emit(before, &mut events);
                    self.pending.drain(..tag.len());
                    self.inside = !self.inside;
                }
                None => {
                    let keep = partial_tag_suffix(&self.pending, tag);
                    let ready_len = self.pending.len() - keep;
                    let ready: String = self.pending.drain(..ready_len).collect();
                    self.emit(ready, &mut events);
                    break;
                }
            }
        }

        events
    }

    /// Flush whatever is still buffered at end of stream.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let rest = std::mem::take(&mut self.pending);
        let mut events = Vec::new();
        self.emit(rest, &mut events);
        events
    }

    fn emit(&self, text: String, events: &mut Vec<StreamEvent>) {
        if text.is_empty() {
            return;
        }
        if self.inside {
            events.push(StreamEvent::Thinking(text));
        } else {
            events.push(StreamEvent::Delta(text));
        }
    }
}

/// Length of the longest suffix of `s` that is a proper prefix of `tag`.
fn partial_tag_suffix(s: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&k| s.ends_with(&tag[..k]))
        .unwrap_or(0)
}

/// Split a complete response into answer and thinking trace.
///
/// # Example
///
/// ```rust
/// use knowledge_rag_core::generation::split_thinking;
///
/// let g = split_thinking("<think>check the docs</think>\nParis.");
/// assert_eq!(g.answer, "Paris.");
/// assert_eq!(g.thinking.as_deref(), Some("check the docs"));
/// ```
pub fn split_thinking(raw: &str) -> Generation {
    let mut splitter = ThinkSplitter::new();
    let mut events = splitter.push(raw);
    events.extend(splitter.finish());

    let mut answer = String::new();
    let mut thinking = String::new();
    for event in events {
        match event {
            StreamEvent::Delta(t) => answer.push_str(&t),
            StreamEvent::Thinking(t) => thinking.push_str(&t),
            StreamEvent::Done => {}
        }
    }

    let thinking = thinking.trim();
    Generation {
        answer: answer.trim().to_string(),
        thinking: (!thinking.is_empty()).then(|| thinking.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(deltas: &[&str]) -> (String, String) {
        let mut s = ThinkSplitter::new();
        let mut events = Vec::new();
        for d in deltas {
            events.extend(s.push(d));
        }
        events.extend(s.finish());
        let mut answer = String::new();
        let mut thinking = String::new();
        for e in events {
            match e {
                StreamEvent::Delta(t) => answer.push_str(&t),
                StreamEvent::Thinking(t) => thinking.push_str(&t),
                StreamEvent::Done => {}
            }
        }
        (answer, thinking)
    }

    #[test]
    fn test_plain_text_passes_through() {
        let g = split_thinking("  just an answer \n");
        assert_eq!(g.answer, "just an answer");
        assert!(g.thinking.is_none());
    }

    #[test]
    fn test_tag_split_across_deltas() {
        let (answer, thinking) = collect(&["<thi", "nk>reason", "ing</th", "ink>Answer", "."]);
        assert_eq!(thinking, "reasoning");
        assert_eq!(answer, "Answer.");
    }

    #[test]
    fn test_lone_angle_bracket_is_not_swallowed() {
        let (answer, thinking) = collect(&["a < b", " and c <", "d"]);
        assert_eq!(answer, "a < b and c <d");
        assert!(thinking.is_empty());
    }

    #[test]
    fn test_unclosed_think_flushes_as_thinking() {
        let (answer, thinking) = collect(&["<think>still going"]);
        assert!(answer.is_empty());
        assert_eq!(thinking, "still going");
    }

    #[test]
    fn test_multibyte_text_near_tags() {
        let g = split_thinking("<think>思考中</think>答案是巴黎。");
        assert_eq!(g.answer, "答案是巴黎。");
        assert_eq!(g.thinking.as_deref(), Some("思考中"));
    }
}
