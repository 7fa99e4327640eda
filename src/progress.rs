use std::rc::Rc;

/// Stage of a feed whose items are being walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Recording fetched entries.
    Refreshing,
    /// Submitting pending torrents.
    Dispatching,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent<'a> {
    Started {
        feed: &'a str,
        stage: Stage,
        total: usize,
    },
    /// One entry or torrent handled.
    Advanced { name: &'a str },
    Finished,
}

/// Receives per-item progress of refreshes and dispatches.
pub trait ProgressReporter {
    fn report(&self, event: ProgressEvent<'_>);
}

pub type SharedProgressReporter = Rc<dyn ProgressReporter>;

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent<'_>) {}
}

impl NoopReporter {
    pub fn shared() -> SharedProgressReporter {
        Rc::new(Self)
    }
}
