use std::sync::Arc;

use crate::Metadata;

/// Lifecycle notifications from the crawl. All hooks default to no-ops.
pub trait Observer: Send + Sync {
    fn on_chapter_start(&self, _metadata: &Metadata) {}
    fn on_page_start(&self, _metadata: &Metadata) {}
    fn on_page_end(&self, _metadata: &Metadata) {}
    fn on_chapter_end(&self, _metadata: &Metadata) {}
}

/// Fans each notification out to every subscriber, in subscription order.
#[derive(Default, Clone)]
pub struct Observers {
    subscribers: Vec<Arc<dyn Observer>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, observer: Arc<dyn Observer>) {
        self.subscribers.push(observer);
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl Observer for Observers {
    fn on_chapter_start(&self, metadata: &Metadata) {
        for o in &self.subscribers {
            o.on_chapter_start(metadata);
        }
    }

    fn on_page_start(&self, metadata: &Metadata) {
        for o in &self.subscribers {
            o.on_page_start(metadata);
        }
    }

    fn on_page_end(&self, metadata: &Metadata) {
        for o in &self.subscribers {
            o.on_page_end(metadata);
        }
    }

    fn on_chapter_end(&self, metadata: &Metadata) {
        for o in &self.subscribers {
            o.on_chapter_end(metadata);
        }
    }
}
