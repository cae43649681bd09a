#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The permanent artifact already exists, or a rule declined the unit.
    AlreadyDone,
    Cancelled,
}

/// Terminal state of one node in the crawl tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    Done,
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterOutcome {
    pub label: String,
    pub state: NodeState,
}

impl ChapterOutcome {
    pub fn new(label: impl Into<String>, state: NodeState) -> Self {
        Self {
            label: label.into(),
            state,
        }
    }
}

/// Per-input summary: one entry per chapter that reached a terminal state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub chapters: Vec<ChapterOutcome>,
}

impl CrawlReport {
    pub fn push(&mut self, outcome: ChapterOutcome) {
        self.chapters.push(outcome);
    }

    pub fn done(&self) -> usize {
        self.count(|s| matches!(s, NodeState::Done))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, NodeState::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, NodeState::Failed(_)))
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, pred: impl Fn(&NodeState) -> bool) -> usize {
        self.chapters.iter().filter(|c| pred(&c.state)).count()
    }
}
