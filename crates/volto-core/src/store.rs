//! Descriptor Store: the persisted list of enrolled people.
//!
//! Every mutation is applied to a copy, the whole copy is written to the
//! blob store, and only then does it replace the in-memory list. A failed
//! write leaves the store exactly as it was.

use crate::blob::{BlobError, BlobStore};
use crate::schema::{self, SchemaError, Snapshot, LEGACY_KEY, STORE_KEY};
use crate::types::{names_equal, Person, Sample};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("blob store: {0}")]
    Blob(#[from] BlobError),
    #[error("snapshot: {0}")]
    Schema(#[from] SchemaError),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt sample {sample} of {person:?}: {reason}")]
    CorruptSample {
        person: String,
        sample: usize,
        reason: String,
    },
    #[error("name must not be empty")]
    MissingName,
    #[error("no person at index {0}")]
    PersonNotFound(usize),
    #[error("person {person} has no sample at index {sample}")]
    SampleNotFound { person: usize, sample: usize },
    #[error("a person named {0:?} is already enrolled")]
    NameTaken(String),
    #[error("descriptor has {actual} dimensions, store holds {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("legacy import needs an empty store ({0} people enrolled)")]
    NotEmpty(usize),
}

/// What renaming onto another person's name does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenamePolicy {
    /// Refuse the rename.
    #[default]
    Reject,
    /// Move the renamed person's samples into the existing person.
    Merge,
}

/// Outcome of removing one sample.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleRemoval {
    SampleRemoved { remaining: usize },
    /// That was the last sample, so the person went with it.
    PersonRemoved(Person),
}

/// Outcome of a rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renamed {
    InPlace { index: usize },
    /// Merged into the person now at `index`.
    Merged { index: usize },
}

pub struct DescriptorStore<B: BlobStore> {
    backend: B,
    people: Vec<Person>,
    dim: usize,
    revision: u64,
}

impl<B: BlobStore> DescriptorStore<B> {
    /// Load the store from `backend`, refusing corrupt data.
    ///
    /// `dim` is the descriptor dimensionality every sample must have.
    pub fn open(backend: B, dim: usize) -> Result<Self, StoreError> {
        let people = match backend.get(STORE_KEY)? {
            Some(raw) => normalize(schema::upgrade(&raw)?.people, dim)?,
            None => Vec::new(),
        };

        if people.is_empty() && backend.get(LEGACY_KEY)?.is_some() {
            tracing::warn!(
                key = LEGACY_KEY,
                "legacy database present; it is not merged automatically, import it explicitly"
            );
        }

        tracing::info!(people = people.len(), dim, "descriptor store loaded");

        Ok(Self {
            backend,
            people,
            dim,
            revision: 0,
        })
    }

    pub fn people(&self) -> &[Person] {
        &self.people
    }

    pub fn person(&self, index: usize) -> Result<&Person, StoreError> {
        self.people
            .get(index)
            .ok_or(StoreError::PersonNotFound(index))
    }

    /// Case-insensitive lookup.
    pub fn find(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.people.iter().position(|p| p.is_named(name))
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Bumped after every successful mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Serialized form of the current contents, as persisted.
    pub fn serialize(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(&Snapshot::new(self.people.clone()))?)
    }

    /// Append `sample` to the person called `name`, creating them if needed.
    /// Returns the person's index.
    pub fn add_sample(&mut self, name: &str, sample: Sample) -> Result<usize, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::MissingName);
        }
        if sample.descriptor.dim() != self.dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                actual: sample.descriptor.dim(),
            });
        }
        check_sample(&sample, self.dim).map_err(|reason| StoreError::CorruptSample {
            person: name.to_string(),
            sample: self.find(name).map_or(0, |i| self.people[i].samples.len()),
            reason,
        })?;

        let existing = self.find(name);
        let index = self.apply(|people| {
            Ok(match existing {
                Some(i) => {
                    people[i].samples.push(sample);
                    i
                }
                None => {
                    people.push(Person {
                        name: name.to_string(),
                        samples: vec![sample],
                    });
                    people.len() - 1
                }
            })
        })?;

        tracing::info!(
            person = %self.people[index].name,
            samples = self.people[index].samples.len(),
            created = existing.is_none(),
            "sample added"
        );
        Ok(index)
    }

    /// Remove one sample; removes the person too when it was their last.
    pub fn remove_sample(
        &mut self,
        person: usize,
        sample: usize,
    ) -> Result<SampleRemoval, StoreError> {
        let count = self.person(person)?.samples.len();
        if sample >= count {
            return Err(StoreError::SampleNotFound { person, sample });
        }

        let outcome = self.apply(|people| {
            people[person].samples.remove(sample);
            Ok(if people[person].samples.is_empty() {
                SampleRemoval::PersonRemoved(people.remove(person))
            } else {
                SampleRemoval::SampleRemoved {
                    remaining: people[person].samples.len(),
                }
            })
        })?;

        match &outcome {
            SampleRemoval::PersonRemoved(p) => {
                tracing::info!(person = %p.name, "last sample removed; person removed")
            }
            SampleRemoval::SampleRemoved { remaining } => {
                tracing::info!(person, sample, remaining, "sample removed")
            }
        }
        Ok(outcome)
    }

    /// Remove a person with all their samples. Confirmation is the caller's job.
    pub fn remove_person(&mut self, person: usize) -> Result<Person, StoreError> {
        self.person(person)?;
        let removed = self.apply(|people| Ok(people.remove(person)))?;
        tracing::info!(person = %removed.name, samples = removed.samples.len(), "person removed");
        Ok(removed)
    }

    /// Rename a person. A clash with another person's name is resolved by `policy`.
    pub fn rename_person(
        &mut self,
        person: usize,
        new_name: &str,
        policy: RenamePolicy,
    ) -> Result<Renamed, StoreError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(StoreError::MissingName);
        }
        let old_name = self.person(person)?.name.clone();
        let clash = self
            .people
            .iter()
            .enumerate()
            .position(|(i, p)| i != person && p.is_named(new_name));

        let outcome = match (clash, policy) {
            (None, _) => self.apply(|people| {
                people[person].name = new_name.to_string();
                Ok(Renamed::InPlace { index: person })
            })?,
            (Some(_), RenamePolicy::Reject) => {
                return Err(StoreError::NameTaken(new_name.to_string()));
            }
            (Some(other), RenamePolicy::Merge) => self.apply(|people| {
                let moved = people.remove(person);
                let target = if other > person { other - 1 } else { other };
                people[target].samples.extend(moved.samples);
                Ok(Renamed::Merged { index: target })
            })?,
        };

        tracing::info!(from = %old_name, to = new_name, ?outcome, "person renamed");
        Ok(outcome)
    }

    /// Import a serialized database (any known schema version) into an empty store.
    pub fn import(&mut self, raw: &str) -> Result<usize, StoreError> {
        if !self.people.is_empty() {
            return Err(StoreError::NotEmpty(self.people.len()));
        }
        let imported = normalize(schema::upgrade(raw)?.people, self.dim)?;
        let count = self.apply(move |people| {
            *people = imported;
            Ok(people.len())
        })?;
        tracing::info!(people = count, "database imported");
        Ok(count)
    }

    fn apply<T>(
        &mut self,
        mutate: impl FnOnce(&mut Vec<Person>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut next = self.people.clone();
        let out = mutate(&mut next)?;
        let raw = serde_json::to_string(&Snapshot::new(next.clone()))?;
        self.backend.set(STORE_KEY, &raw)?;
        self.people = next;
        self.revision += 1;
        Ok(out)
    }
}

fn check_sample(sample: &Sample, dim: usize) -> Result<(), String> {
    let d = sample.descriptor.values();
    if d.len() != dim {
        return Err(format!("descriptor has {} dimensions, expected {dim}", d.len()));
    }
    if d.iter().any(|v| !v.is_finite()) {
        return Err("descriptor contains non-finite values".into());
    }
    if !sample.score.is_finite() || !(0.0..=1.0).contains(&sample.score) {
        return Err(format!("score {} outside [0, 1]", sample.score));
    }
    Ok(())
}

/// Validate loaded people and restore the store invariants.
fn normalize(loaded: Vec<Person>, dim: usize) -> Result<Vec<Person>, StoreError> {
    let mut people: Vec<Person> = Vec::with_capacity(loaded.len());
    for mut person in loaded {
        let trimmed = person.name.trim();
        if trimmed.is_empty() {
            tracing::warn!(samples = person.samples.len(), "dropping person with no name");
            continue;
        }
        if trimmed.len() != person.name.len() {
            person.name = trimmed.to_string();
        }
        for (i, sample) in person.samples.iter().enumerate() {
            check_sample(sample, dim).map_err(|reason| StoreError::CorruptSample {
                person: person.name.clone(),
                sample: i,
                reason,
            })?;
        }
        if person.samples.is_empty() {
            tracing::warn!(person = %person.name, "dropping person with no samples");
            continue;
        }
        match people.iter_mut().find(|p| names_equal(&p.name, &person.name)) {
            Some(existing) => {
                tracing::warn!(
                    kept = %existing.name,
                    merged = %person.name,
                    "merging people with the same name"
                );
                existing.samples.extend(person.samples);
            }
            None => people.push(person),
        }
    }
    Ok(people)
}
