//! Jobs and the per-document job queue.
//!
//! A [`Job`] moves `Queued -> Executing -> Finished` and never back. The
//! [`JobQueue`] is append-only: it doubles as the document's history.

use std::collections::HashMap;

use easel_core::types::Timestamp;
use easel_core::{Bounds, ImageCollection};

use crate::error::GenerationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Queued,
    Executing,
    Finished,
}

/// Outcome of applying a transition to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The job was already past the requested state; nothing changed.
    Ignored,
    /// A finished job was finished again; its results were replaced.
    Overwritten,
}

/// One submitted generation request and its outcome.
#[derive(Debug, Clone)]
pub struct Job {
    id: String,
    state: JobState,
    prompt: String,
    bounds: Bounds,
    created_at: Timestamp,
    results: ImageCollection,
}

impl Job {
    fn new(id: String, prompt: String, bounds: Bounds) -> Self {
        Self {
            id,
            state: JobState::Queued,
            prompt,
            bounds,
            created_at: chrono::Utc::now(),
            results: ImageCollection::new(),
        }
    }

    /// Server-assigned id, the correlation key for incoming messages.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Images produced by the job; empty until it is finished.
    pub fn results(&self) -> &ImageCollection {
        &self.results
    }

    /// Progress was reported for this job.
    pub fn begin_executing(&mut self) -> Transition {
        match self.state {
            JobState::Queued => {
                self.state = JobState::Executing;
                Transition::Applied
            }
            JobState::Executing => Transition::Applied,
            JobState::Finished => Transition::Ignored,
        }
    }

    /// The job completed; results are attached in the same step.
    pub fn finish(&mut self, results: ImageCollection) -> Transition {
        let transition = match self.state {
            JobState::Queued | JobState::Executing => Transition::Applied,
            JobState::Finished => Transition::Overwritten,
        };
        self.state = JobState::Finished;
        self.results = results;
        transition
    }
}

/// Insertion-ordered jobs of one document, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct JobQueue {
    entries: Vec<Job>,
    index: HashMap<String, usize>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new `Queued` job timestamped now.
    pub fn add(
        &mut self,
        id: impl Into<String>,
        prompt: impl Into<String>,
        bounds: Bounds,
    ) -> Result<&Job, GenerationError> {
        let id = id.into();
        if self.index.contains_key(&id) {
            return Err(GenerationError::DuplicateJob(id));
        }
        let position = self.entries.len();
        self.index.insert(id.clone(), position);
        self.entries.push(Job::new(id, prompt.into(), bounds));
        Ok(&self.entries[position])
    }

    pub fn find(&self, id: &str) -> Option<&Job> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Job> {
        let i = *self.index.get(id)?;
        self.entries.get_mut(i)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn count(&self, state: JobState) -> usize {
        self.entries.iter().filter(|j| j.state == state).count()
    }

    pub fn any_executing(&self) -> bool {
        self.entries.iter().any(|j| j.state == JobState::Executing)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Job> {
        self.entries.get(position)
    }

    /// Jobs in submission order.
    pub fn iter(&self) -> std::slice::Iter<'_, Job> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a JobQueue {
    type Item = &'a Job;
    type IntoIter = std::slice::Iter<'a, Job>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
