use super::JoinType;
use crate::data::Sample;
use crate::error::{EvalError, QueryError};
use crate::stream::{ExecContext, SampleStream};
use chrono::{DateTime, Utc};

/// One input of the merge: its stream and the sample waiting at its head
struct Cursor<V> {
    stream: SampleStream<V>,
    head: Option<Sample<V>>,
    last: Option<DateTime<Utc>>,
    exhausted: bool,
}

impl<V> Cursor<V> {
    fn new(stream: SampleStream<V>) -> Self {
        Self {
            stream,
            head: None,
            last: None,
            exhausted: false,
        }
    }

    /// Load the next sample into the head if it is empty
    fn fill(&mut self, input: usize) -> Result<(), QueryError> {
        if self.head.is_some() || self.exhausted {
            return Ok(());
        }
        match self.stream.next() {
            None => self.exhausted = true,
            Some(sample) => {
                let sample = sample?;
                if let Some(previous) = self.last {
                    if sample.timestamp < previous {
                        return Err(EvalError::Unsorted {
                            input,
                            previous,
                            timestamp: sample.timestamp,
                        }
                        .into());
                    }
                }
                self.last = Some(sample.timestamp);
                self.head = Some(sample);
            }
        }
        Ok(())
    }

    fn head_timestamp(&self) -> Option<DateTime<Utc>> {
        self.head.as_ref().map(|s| s.timestamp)
    }

    /// Take the head value if it sits exactly at `key`
    fn take_at(&mut self, key: DateTime<Utc>) -> Option<V> {
        if self.head_timestamp() == Some(key) {
            self.head.take().map(|s| s.value)
        } else {
            None
        }
    }
}

/// Sorted merge join over N inputs keyed on exact timestamp equality.
///
/// Yields one slot per input for each output timestamp; a slot is `None`
/// when that input has no sample at the timestamp. Inputs must already be
/// sorted ascending; a timestamp going backwards is an error.
pub struct MergeJoin<V> {
    cursors: Vec<Cursor<V>>,
    join_type: JoinType,
}

impl<V> MergeJoin<V> {
    pub fn new(inputs: Vec<SampleStream<V>>, join_type: JoinType) -> Self {
        Self {
            cursors: inputs.into_iter().map(Cursor::new).collect(),
            join_type,
        }
    }

    fn fill_all(&mut self) -> Result<(), QueryError> {
        for (i, cursor) in self.cursors.iter_mut().enumerate() {
            cursor.fill(i)?;
        }
        Ok(())
    }

    fn take_all(&mut self, key: DateTime<Utc>) -> Sample<Vec<Option<V>>> {
        let slots = self.cursors.iter_mut().map(|c| c.take_at(key)).collect();
        Sample::new(key, slots)
    }

    fn next_inner(&mut self) -> Result<Option<Sample<Vec<Option<V>>>>, QueryError> {
        loop {
            self.fill_all()?;
            let heads: Option<Vec<DateTime<Utc>>> =
                self.cursors.iter().map(|c| c.head_timestamp()).collect();
            let Some(heads) = heads else {
                return Ok(None);
            };
            let Some(key) = heads.iter().copied().max() else {
                return Ok(None);
            };
            if heads.iter().all(|ts| *ts == key) {
                return Ok(Some(self.take_all(key)));
            }
            // Drop every head that can no longer match
            for cursor in &mut self.cursors {
                if cursor.head_timestamp().map_or(false, |ts| ts < key) {
                    cursor.head = None;
                }
            }
        }
    }

    fn next_left(&mut self) -> Result<Option<Sample<Vec<Option<V>>>>, QueryError> {
        let Some((left, rest)) = self.cursors.split_first_mut() else {
            return Ok(None);
        };
        left.fill(0)?;
        let Some(key) = left.head_timestamp() else {
            return Ok(None);
        };
        for (i, cursor) in rest.iter_mut().enumerate() {
            loop {
                cursor.fill(i + 1)?;
                match cursor.head_timestamp() {
                    Some(ts) if ts < key => cursor.head = None,
                    _ => break,
                }
            }
        }
        Ok(Some(self.take_all(key)))
    }

    fn next_full(&mut self) -> Result<Option<Sample<Vec<Option<V>>>>, QueryError> {
        self.fill_all()?;
        let key = self.cursors.iter().filter_map(|c| c.head_timestamp()).min();
        Ok(key.map(|key| self.take_all(key)))
    }
}

impl<V> Iterator for MergeJoin<V> {
    type Item = Result<Sample<Vec<Option<V>>>, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = match self.join_type {
            JoinType::Inner => self.next_inner(),
            JoinType::Left => self.next_left(),
            JoinType::Full => self.next_full(),
        };
        next.transpose()
    }
}

/// Join `inputs` and combine each row of slots into one value
pub fn merge_join<V, T, F>(
    ctx: &ExecContext,
    inputs: Vec<SampleStream<V>>,
    join_type: JoinType,
    mut combine: F,
) -> SampleStream<T>
where
    V: Send + 'static,
    T: Send + 'static,
    F: FnMut(Vec<Option<V>>) -> Result<T, EvalError> + Send + 'static,
{
    tracing::debug!("{:?} join over {} inputs", join_type, inputs.len());
    let joined = MergeJoin::new(inputs, join_type).map(move |row| -> Result<Sample<T>, QueryError> {
        let row = row?;
        let timestamp = row.timestamp;
        let value = combine(row.value).map_err(|e| QueryError::from(e.context("join")))?;
        Ok(Sample::new(timestamp, value))
    });
    ctx.guard(joined)
}
