//! Folds streamed reply fragments into visible text plus one structured block.
//!
//! All derived views are computed from the single raw accumulation buffer,
//! so a marker split across fragments is seen as soon as its last piece
//! arrives and the visible text after any fragment equals the visible text
//! of the concatenation so far.

use quill_channel::frame::{END_SENTINEL, error_detail, is_completion};

/// Delimiter pair that encloses a structured block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// `---` ... `---`, carrying a validation verdict.
    FrontMatter,
    /// ```` ``` ```` ... ```` ``` ````, carrying rephrased text.
    CodeFence,
}

impl BlockKind {
    pub fn marker(self) -> &'static str {
        match self {
            Self::FrontMatter => "---",
            Self::CodeFence => "```",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyState {
    Plain,
    InStructuredBlock,
    Done,
    Error,
}

impl ReassemblyState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// Final result of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Reply text outside the structured block, trimmed.
    pub text: String,
    /// Contents of the first complete block, if any.
    pub block: Option<String>,
}

/// What one fragment did to the reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Streaming {
        visible: String,
        /// Set when this fragment closed a block; worth an eager parse.
        block: Option<String>,
    },
    Completed(Completion),
    Failed(String),
    /// The reply already finished; the fragment was dropped.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct Reassembler {
    kind: BlockKind,
    state: ReassemblyState,
    raw: String,
}

impl Reassembler {
    pub fn new(kind: BlockKind) -> Self {
        Self { kind, state: ReassemblyState::Plain, raw: String::new() }
    }

    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    pub fn state(&self) -> ReassemblyState {
        self.state
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn feed(&mut self, fragment: &str) -> Progress {
        if self.state.is_terminal() {
            return Progress::Ignored;
        }

        if let Some(detail) = error_detail(fragment) {
            self.state = ReassemblyState::Error;
            return Progress::Failed(detail.to_owned());
        }

        if is_completion(fragment) {
            // text riding along with the sentinel still belongs to the reply
            self.raw.push_str(&fragment.replace(END_SENTINEL, ""));
            self.state = ReassemblyState::Done;
            return Progress::Completed(Completion {
                text: outside_blocks(&self.raw, self.kind.marker(), false).trim().to_owned(),
                block: extract_block(&self.raw, self.kind),
            });
        }

        let closed_before = closed_blocks(&self.raw, self.kind);
        self.raw.push_str(fragment);
        let markers = marker_positions(&self.raw, self.kind.marker());
        self.state = if markers.len() % 2 == 1 {
            ReassemblyState::InStructuredBlock
        } else {
            ReassemblyState::Plain
        };

        let block = if markers.len() / 2 > closed_before {
            extract_block(&self.raw, self.kind)
        } else {
            None
        };
        Progress::Streaming { visible: visible_text(&self.raw, self.kind), block }
    }

    /// Contents of the block currently being streamed, without any trailing
    /// partial closing marker.
    pub fn open_block(&self) -> Option<&str> {
        if self.state != ReassemblyState::InStructuredBlock {
            return None;
        }
        let marker = self.kind.marker();
        let open = *marker_positions(&self.raw, marker).last()?;
        let body = &self.raw[open + marker.len()..];
        Some(&body[..body.len() - partial_marker_len(body, marker)])
    }
}

fn marker_positions(raw: &str, marker: &str) -> Vec<usize> {
    raw.match_indices(marker).map(|(i, _)| i).collect()
}

fn closed_blocks(raw: &str, kind: BlockKind) -> usize {
    marker_positions(raw, kind.marker()).len() / 2
}

/// Length of a proper prefix of `marker` that `text` ends with.
fn partial_marker_len(text: &str, marker: &str) -> usize {
    (1..marker.len())
        .rev()
        .find(|&k| text.ends_with(&marker[..k]))
        .unwrap_or(0)
}

/// Text with every complete block removed. An unmatched opening marker
/// either hides the rest (`hide_open`) or is kept verbatim.
fn outside_blocks(raw: &str, marker: &str, hide_open: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut cursor = 0;
    for pair in marker_positions(raw, marker).chunks(2) {
        match *pair {
            [open, close] => {
                out.push_str(&raw[cursor..open]);
                cursor = close + marker.len();
            }
            [open] if hide_open => {
                out.push_str(&raw[cursor..open]);
                cursor = raw.len();
            }
            _ => {}
        }
    }
    out.push_str(&raw[cursor..]);
    out
}

/// Text to show while a reply streams in: blocks and their markers removed,
/// an open block hidden, a trailing partial marker withheld, left-trimmed.
pub fn visible_text(raw: &str, kind: BlockKind) -> String {
    let marker = kind.marker();
    let positions = marker_positions(raw, marker);
    let mut shown = raw;
    if positions.len() % 2 == 0 {
        let last_end = positions.last().map_or(0, |p| p + marker.len());
        let held = partial_marker_len(raw, marker);
        if raw.len() - held >= last_end {
            shown = &raw[..raw.len() - held];
        }
    }
    outside_blocks(shown, marker, true).trim_start().to_owned()
}

/// Contents of the first complete block.
pub fn extract_block(raw: &str, kind: BlockKind) -> Option<String> {
    let marker = kind.marker();
    let positions = marker_positions(raw, marker);
    match positions.as_slice() {
        [open, close, ..] => Some(raw[open + marker.len()..*close].to_owned()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(kind: BlockKind, fragments: &[&str]) -> (Reassembler, Vec<Progress>) {
        let mut r = Reassembler::new(kind);
        let progress = fragments.iter().map(|f| r.feed(f)).collect();
        (r, progress)
    }

    #[test]
    fn rephrase_reply_with_split_fence() {
        let (r, progress) = feed_all(
            BlockKind::CodeFence,
            &["Intro ", "text ``", "`rephrased ", "content`", "``", "<END>"],
        );
        assert_eq!(r.state(), ReassemblyState::Done);
        assert_eq!(
            progress.last(),
            Some(&Progress::Completed(Completion {
                text: "Intro text".into(),
                block: Some("rephrased content".into()),
            }))
        );
        // the fragment that completed the closing fence carried the eager block
        assert_eq!(
            progress[4],
            Progress::Streaming { visible: "Intro text ".into(), block: Some("rephrased content".into()) }
        );
    }

    #[test]
    fn visible_text_while_streaming() {
        let kind = BlockKind::CodeFence;
        assert_eq!(visible_text("  Intro text ``", kind), "Intro text ");
        assert_eq!(visible_text("Intro text ```rephr", kind), "Intro text ");
        assert_eq!(visible_text("Intro ```a``` after", kind), "Intro  after");
        assert_eq!(visible_text("```a```", kind), "");
    }

    #[test]
    fn state_tracks_markers() {
        let mut r = Reassembler::new(BlockKind::FrontMatter);
        r.feed("Looks good.\n--");
        assert_eq!(r.state(), ReassemblyState::Plain);
        r.feed("-\nimpact: tr");
        assert_eq!(r.state(), ReassemblyState::InStructuredBlock);
        assert_eq!(r.open_block(), Some("\nimpact: tr"));
        r.feed("ue\n--");
        assert_eq!(r.open_block(), Some("\nimpact: true\n"));
        r.feed("-\n");
        assert_eq!(r.state(), ReassemblyState::Plain);
        assert_eq!(r.open_block(), None);
    }

    #[test]
    fn error_fragment_is_terminal() {
        let mut r = Reassembler::new(BlockKind::FrontMatter);
        r.feed("partial");
        assert_eq!(r.feed("<ERROR>throttlingException"), Progress::Failed("throttlingException".into()));
        assert_eq!(r.state(), ReassemblyState::Error);
        assert_eq!(r.feed("<END>"), Progress::Ignored);
    }

    #[test]
    fn fragments_after_completion_are_ignored() {
        let mut r = Reassembler::new(BlockKind::CodeFence);
        r.feed("<END>");
        assert_eq!(r.feed("late"), Progress::Ignored);
    }

    #[test]
    fn unterminated_block_keeps_text_but_no_block() {
        let (_, progress) = feed_all(BlockKind::CodeFence, &["Sure ```half", "<END>"]);
        assert_eq!(
            progress.last(),
            Some(&Progress::Completed(Completion { text: "Sure ```half".into(), block: None }))
        );
    }

    #[test]
    fn every_partition_yields_the_same_block() {
        let whole = "Checked.\n---\nvalidation:\n  impact: true\n---\nNice work.";
        let expected = extract_block(whole, BlockKind::FrontMatter);
        for a in 1..whole.len() {
            for b in a..whole.len() {
                let (_, progress) = feed_all(
                    BlockKind::FrontMatter,
                    &[&whole[..a], &whole[a..b], &whole[b..], "<END>"],
                );
                match progress.last() {
                    Some(Progress::Completed(c)) => {
                        assert_eq!(c.block, expected);
                        assert_eq!(c.text, "Checked.\n\nNice work.");
                    }
                    other => panic!("unexpected {other:?}"),
                }
            }
        }
    }

    #[test]
    fn incremental_visible_text_matches_concatenation() {
        let whole = "Hi ```one``` and ```tw";
        let mut r = Reassembler::new(BlockKind::CodeFence);
        for end in 1..=whole.len() {
            if let Progress::Streaming { visible, .. } = r.feed(&whole[end - 1..end]) {
                assert_eq!(visible, visible_text(&whole[..end], BlockKind::CodeFence));
            }
        }
    }
}
