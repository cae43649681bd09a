use crate::Metadata;

/// Decides from persisted state whether a unit of work is already done.
pub trait Rule: Send + Sync {
    fn block(&self, metadata: &Metadata) -> bool;
}

/// Blocks when any member blocks.
#[derive(Default)]
pub struct AnyRule {
    rules: Vec<Box<dyn Rule>>,
}

impl AnyRule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }
}

impl Rule for AnyRule {
    fn block(&self, metadata: &Metadata) -> bool {
        self.rules.iter().any(|rule| rule.block(metadata))
    }
}

/// Only lets the newest listed chapter through.
#[derive(Debug, Default, Clone, Copy)]
pub struct LatestChapterRule;

impl Rule for LatestChapterRule {
    fn block(&self, metadata: &Metadata) -> bool {
        match (metadata.chapter_index, metadata.chapters) {
            (Some(index), Some(total)) => index < total,
            _ => false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NeverBlock;

impl Rule for NeverBlock {
    fn block(&self, _metadata: &Metadata) -> bool {
        false
    }
}

impl<R: Rule + ?Sized> Rule for std::sync::Arc<R> {
    fn block(&self, metadata: &Metadata) -> bool {
        (**self).block(metadata)
    }
}
