//! Session context: the store, the matcher derived from it, the current
//! target and the scan flag, owned together.
//!
//! Every mutating call persists first, then rebuilds the gallery matcher,
//! then re-resolves the target. Callers never observe a matcher built from
//! data that was not written.

use crate::blob::BlobStore;
use crate::detection::Detection;
use crate::efficacy::Efficacy;
use crate::matcher::{Classifier, GalleryMatcher, MatchEngine, MatchOutcome, TargetMatcher};
use crate::overlay::DisplayPolicy;
use crate::profile::Profile;
use crate::quality::{QualityGate, Rejection};
use crate::scan::{ScanFlag, ScanTicket};
use crate::store::{DescriptorStore, Renamed, SampleRemoval, StoreError};
use crate::types::{Descriptor, Person, Sample};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Label of a target captured from an image rather than picked from the roster.
pub const ADHOC_TARGET_NAME: &str = "Target";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("a name is required")]
    MissingName,
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("face is not frontal enough (nose offset {offset:.2} of face width, limit {limit:.2})")]
    PoseRejected { offset: f32, limit: f32 },
    #[error("detection has no landmarks, so its pose cannot be checked")]
    MissingLandmarks,
    #[error(transparent)]
    Store(StoreError),
}

impl SessionError {
    /// Stable name of the failure, as surfaced to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::MissingName => "MissingName",
            SessionError::NoFaceDetected => "NoFaceDetected",
            SessionError::PoseRejected { .. } => "PoseRejected",
            SessionError::MissingLandmarks => "MissingLandmarks",
            SessionError::Store(e) => match e {
                StoreError::CorruptSample { .. } => "CorruptSample",
                StoreError::NameTaken(_) => "NameTaken",
                StoreError::PersonNotFound(_) => "PersonNotFound",
                StoreError::SampleNotFound { .. } => "SampleNotFound",
                StoreError::DimensionMismatch { .. } => "DimensionMismatch",
                StoreError::NotEmpty(_) => "NotEmpty",
                StoreError::MissingName => "MissingName",
                StoreError::Blob(_) | StoreError::Schema(_) | StoreError::Json(_) => {
                    "StorageFailure"
                }
            },
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::MissingName => SessionError::MissingName,
            other => SessionError::Store(other),
        }
    }
}

impl From<Rejection> for SessionError {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::NoFaceDetected => SessionError::NoFaceDetected,
            Rejection::PoseRejected { offset, limit } => SessionError::PoseRejected { offset, limit },
            Rejection::MissingLandmarks => SessionError::MissingLandmarks,
        }
    }
}

/// Who live matching is narrowed to.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Captured from a one-off image, not stored.
    Adhoc { name: String, sample: Sample },
    /// An enrolled person, tracked by name.
    Enrolled { name: String },
}

impl Target {
    pub fn name(&self) -> &str {
        match self {
            Target::Adhoc { name, .. } | Target::Enrolled { name } => name,
        }
    }
}

/// One roster row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonSummary {
    pub index: usize,
    pub name: String,
    /// Per-sample quality, percent.
    pub samples: Vec<u32>,
    pub efficacy: Efficacy,
    pub efficacy_label: String,
}

pub struct Session<B: BlobStore> {
    store: DescriptorStore<B>,
    profile: Profile,
    gate: QualityGate,
    gallery: Arc<GalleryMatcher>,
    target: Option<Target>,
    target_matcher: Option<Arc<TargetMatcher>>,
    scan: ScanFlag,
}

impl<B: BlobStore> Session<B> {
    pub fn open(backend: B, profile: Profile) -> Result<Self, SessionError> {
        let store = DescriptorStore::open(backend, profile.descriptor_dim)?;
        let gallery = Arc::new(build_gallery(store.people(), &profile));
        tracing::info!(profile = %profile.name, people = store.people().len(), "session opened");
        Ok(Self {
            gate: profile.quality_gate(),
            store,
            profile,
            gallery,
            target: None,
            target_matcher: None,
            scan: ScanFlag::new(),
        })
    }

    pub fn people(&self) -> &[Person] {
        self.store.people()
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn store(&self) -> &DescriptorStore<B> {
        &self.store
    }

    pub fn revision(&self) -> u64 {
        self.store.revision()
    }

    pub fn roster(&self) -> Vec<PersonSummary> {
        self.people()
            .iter()
            .enumerate()
            .map(|(index, p)| {
                let efficacy = self.profile.efficacy.evaluate(&p.samples);
                PersonSummary {
                    index,
                    name: p.name.clone(),
                    samples: p
                        .samples
                        .iter()
                        .map(|s| (s.score * 100.0).round().max(0.0) as u32)
                        .collect(),
                    efficacy,
                    efficacy_label: efficacy.label(),
                }
            })
            .collect()
    }

    pub fn efficacy(&self, person: usize) -> Result<Efficacy, SessionError> {
        let p = self.store.person(person)?;
        Ok(self.profile.efficacy.evaluate(&p.samples))
    }

    /// Enroll a capture under `name`, creating the person if needed.
    pub fn enroll(&mut self, name: &str, detection: Option<&Detection>) -> Result<usize, SessionError> {
        if name.trim().is_empty() {
            return Err(SessionError::MissingName);
        }
        let sample = self.gate.accept(detection)?;
        let index = self.store.add_sample(name, sample)?;
        self.rebuild();
        Ok(index)
    }

    /// Add a capture to an existing person.
    pub fn enroll_into(
        &mut self,
        person: usize,
        detection: Option<&Detection>,
    ) -> Result<usize, SessionError> {
        let name = self.store.person(person)?.name.clone();
        let sample = self.gate.accept(detection)?;
        let index = self.store.add_sample(&name, sample)?;
        self.rebuild();
        Ok(index)
    }

    pub fn remove_sample(&mut self, person: usize, sample: usize) -> Result<SampleRemoval, SessionError> {
        let outcome = self.store.remove_sample(person, sample)?;
        self.rebuild();
        Ok(outcome)
    }

    pub fn remove_person(&mut self, person: usize) -> Result<Person, SessionError> {
        let removed = self.store.remove_person(person)?;
        self.rebuild();
        Ok(removed)
    }

    pub fn rename_person(&mut self, person: usize, new_name: &str) -> Result<Renamed, SessionError> {
        let follows = matches!(
            &self.target,
            Some(Target::Enrolled { name }) if self.store.person(person)?.is_named(name)
        );
        let outcome = self.store.rename_person(person, new_name, self.profile.rename)?;
        if follows {
            let index = match outcome {
                Renamed::InPlace { index } | Renamed::Merged { index } => index,
            };
            let name = self.store.person(index)?.name.clone();
            self.target = Some(Target::Enrolled { name });
        }
        self.rebuild();
        Ok(outcome)
    }

    pub fn import_legacy(&mut self, raw: &str) -> Result<usize, SessionError> {
        let count = self.store.import(raw)?;
        self.rebuild();
        Ok(count)
    }

    /// Narrow matching to one enrolled person, or `None` for everyone.
    pub fn select_target(&mut self, person: Option<usize>) -> Result<(), SessionError> {
        match person {
            None => self.clear_target(),
            Some(i) => {
                let name = self.store.person(i)?.name.clone();
                tracing::info!(person = %name, "target selected");
                self.target = Some(Target::Enrolled { name });
                self.refresh_target();
            }
        }
        Ok(())
    }

    /// Narrow matching to a face captured from a one-off image.
    pub fn set_adhoc_target(&mut self, detection: Option<&Detection>) -> Result<(), SessionError> {
        let det = detection.ok_or(SessionError::NoFaceDetected)?;
        let dim = det.descriptor().dim();
        if dim != self.store.dim() {
            return Err(StoreError::DimensionMismatch {
                expected: self.store.dim(),
                actual: dim,
            }
            .into());
        }
        let sample = Sample::new(det.descriptor().clone(), det.score());
        tracing::info!(score = det.score(), "ad-hoc target set");
        self.target = Some(Target::Adhoc {
            name: ADHOC_TARGET_NAME.to_string(),
            sample,
        });
        self.refresh_target();
        Ok(())
    }

    pub fn clear_target(&mut self) {
        if self.target.take().is_some() {
            tracing::info!("target cleared; matching against everyone");
        }
        self.target_matcher = None;
    }

    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    pub fn begin_scan(&self) -> ScanTicket {
        let ticket = self.scan.begin();
        tracing::info!(epoch = ticket.epoch(), "scan started");
        ticket
    }

    /// Stop scanning. The target does not outlive the scan.
    pub fn stop_scan(&mut self) {
        if self.scan.cancel() {
            tracing::info!("scan stopped");
        }
        self.clear_target();
    }

    pub fn scan_flag(&self) -> &ScanFlag {
        &self.scan
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_active()
    }

    /// Snapshot of the active matcher, safe to use after releasing the session.
    pub fn match_engine(&self) -> MatchEngine {
        match &self.target_matcher {
            Some(t) => MatchEngine::Target(Arc::clone(t)),
            None => MatchEngine::Gallery(Arc::clone(&self.gallery)),
        }
    }

    pub fn display_policy(&self) -> DisplayPolicy {
        self.profile.display
    }

    pub fn classify(&self, query: &Descriptor) -> MatchOutcome {
        self.match_engine().classify(query)
    }

    fn rebuild(&mut self) {
        self.gallery = Arc::new(build_gallery(self.store.people(), &self.profile));
        self.refresh_target();
    }

    fn refresh_target(&mut self) {
        let threshold = self.profile.matching.target_threshold;
        let matcher = match &self.target {
            None => None,
            Some(Target::Adhoc { name, sample }) => Some(TargetMatcher::new(
                name.clone(),
                vec![sample.descriptor.clone()],
                threshold,
            )),
            Some(Target::Enrolled { name }) => self.store.find(name).map(|i| {
                let person = &self.store.people()[i];
                TargetMatcher::new(
                    person.name.clone(),
                    person.samples.iter().map(|s| s.descriptor.clone()).collect(),
                    threshold,
                )
            }),
        };
        if matcher.is_none() {
            if let Some(stale) = self.target.take() {
                tracing::info!(person = %stale.name(), "target no longer enrolled; cleared");
            }
        }
        self.target_matcher = matcher.map(Arc::new);
    }
}

fn build_gallery(people: &[Person], profile: &Profile) -> GalleryMatcher {
    GalleryMatcher::build(
        people,
        profile.matching.gallery_threshold,
        profile.matching.label_distance,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{BlobError, MemoryBlobStore};
    use crate::efficacy::Tier;
    use crate::matcher::UNKNOWN_LABEL;
    use crate::store::RenamePolicy;
    use crate::types::{FaceBox, Landmarks, Point};

    const DIM: usize = 4;

    fn profile() -> Profile {
        Profile {
            descriptor_dim: DIM,
            ..Profile::strict()
        }
    }

    fn session() -> Session<MemoryBlobStore> {
        Session::open(MemoryBlobStore::new(), profile()).unwrap()
    }

    fn face(seed: f32, score: f32, nose_x: f32) -> Detection {
        Detection::new(
            FaceBox { x: 20.0, y: 20.0, width: 80.0, height: 100.0 },
            score,
            vec![seed; DIM],
            Some(Landmarks::five_point([
                Point::new(40.0, 50.0),
                Point::new(80.0, 50.0),
                Point::new(nose_x, 70.0),
                Point::new(45.0, 90.0),
                Point::new(75.0, 90.0),
            ])),
        )
        .unwrap()
    }

    fn frontal(seed: f32) -> Detection {
        face(seed, 0.9, 60.0)
    }

    fn q(seed: f32) -> Descriptor {
        Descriptor::new(vec![seed; DIM])
    }

    struct FailingBlobStore;

    impl BlobStore for FailingBlobStore {
        fn get(&self, _key: &str) -> Result<Option<String>, BlobError> {
            Ok(None)
        }

        fn set(&mut self, _key: &str, _value: &str) -> Result<(), BlobError> {
            Err(BlobError::Io(std::io::Error::other("quota exceeded")))
        }
    }

    #[test]
    fn test_no_face_means_no_write() {
        let mut s = session();
        let err = s.enroll("Alice", None).unwrap_err();
        assert!(matches!(err, SessionError::NoFaceDetected));
        assert_eq!(err.kind(), "NoFaceDetected");
        assert_eq!(s.store().backend().writes(), 0);
        assert!(s.people().is_empty());
    }

    #[test]
    fn test_missing_name_checked_before_detection() {
        let mut s = session();
        assert!(matches!(s.enroll("  ", None), Err(SessionError::MissingName)));
    }

    #[test]
    fn test_empty_store_is_unknown() {
        let s = session();
        let out = s.classify(&q(0.3));
        assert!(!out.matched);
        assert_eq!(out.label, UNKNOWN_LABEL);
    }

    #[test]
    fn test_enroll_is_visible_to_matcher_immediately() {
        let mut s = session();
        let engine_before = s.match_engine();
        assert_eq!(s.enroll("Alice", Some(&frontal(0.1))).unwrap(), 0);
        assert!(s.classify(&q(0.1)).matched);
        assert_eq!(s.classify(&q(0.1)).label, "Alice");
        // Old snapshots stay as they were.
        assert!(!engine_before.classify(&q(0.1)).matched);
    }

    #[test]
    fn test_pose_rejected_means_no_write() {
        let mut s = session();
        // 15 px off centre on a 40 px eye span.
        let err = s.enroll("Alice", Some(&face(0.1, 0.9, 75.0))).unwrap_err();
        assert!(matches!(err, SessionError::PoseRejected { .. }));
        assert_eq!(s.store().backend().writes(), 0);
    }

    #[test]
    fn test_lenient_profile_skips_pose_check() {
        let p = Profile { descriptor_dim: DIM, ..Profile::lenient() };
        let mut s = Session::open(MemoryBlobStore::new(), p).unwrap();
        s.enroll("Alice", Some(&face(0.1, 0.9, 75.0))).unwrap();
        assert_eq!(s.people().len(), 1);
    }

    #[test]
    fn test_enroll_into_existing_person() {
        let mut s = session();
        s.enroll("Alice", Some(&frontal(0.1))).unwrap();
        assert_eq!(s.enroll_into(0, Some(&frontal(0.2))).unwrap(), 0);
        assert_eq!(s.people()[0].samples.len(), 2);
        let err = s.enroll_into(3, Some(&frontal(0.2))).unwrap_err();
        assert_eq!(err.kind(), "PersonNotFound");
    }

    #[test]
    fn test_efficacy_single_sample() {
        let mut s = session();
        s.enroll("Alice", Some(&frontal(0.1))).unwrap();
        let e = s.efficacy(0).unwrap();
        assert_eq!(e.score, 90);
        assert_eq!(e.tier, Tier::Medium);
        let roster = s.roster();
        assert_eq!(roster[0].samples, vec![90]);
        assert_eq!(roster[0].efficacy_label, "efficacy 90% (good)");
    }

    #[test]
    fn test_adhoc_target_exact_match_and_stop_clears() {
        let mut s = session();
        s.enroll("Alice", Some(&frontal(0.1))).unwrap();
        s.set_adhoc_target(Some(&frontal(0.7))).unwrap();
        let _ticket = s.begin_scan();

        let out = s.classify(&q(0.7));
        assert!(out.matched);
        assert_eq!(out.label, ADHOC_TARGET_NAME);
        // Alice is not the target.
        assert!(!s.classify(&q(0.1)).matched);

        s.stop_scan();
        assert!(s.target().is_none());
        assert!(!s.is_scanning());
        assert_eq!(s.classify(&q(0.1)).label, "Alice");
    }

    #[test]
    fn test_adhoc_target_requires_face() {
        let mut s = session();
        assert!(matches!(s.set_adhoc_target(None), Err(SessionError::NoFaceDetected)));
        assert!(s.target().is_none());
    }

    #[test]
    fn test_enrolled_target_follows_rename_and_clears_on_remove() {
        let mut s = session();
        s.enroll("Alice", Some(&frontal(0.1))).unwrap();
        s.enroll("Bob", Some(&frontal(0.5))).unwrap();
        s.select_target(Some(0)).unwrap();
        assert!(s.match_engine().is_target());

        s.rename_person(0, "Alicia").unwrap();
        assert_eq!(s.target().map(Target::name), Some("Alicia"));
        assert_eq!(s.classify(&q(0.1)).label, "Alicia");

        s.remove_person(0).unwrap();
        assert!(s.target().is_none());
        assert!(!s.match_engine().is_target());
        assert_eq!(s.classify(&q(0.5)).label, "Bob");
    }

    #[test]
    fn test_select_all_returns_to_gallery() {
        let mut s = session();
        s.enroll("Alice", Some(&frontal(0.1))).unwrap();
        s.select_target(Some(0)).unwrap();
        s.select_target(None).unwrap();
        assert!(!s.match_engine().is_target());
        assert!(matches!(s.select_target(Some(9)), Err(SessionError::Store(StoreError::PersonNotFound(9)))));
    }

    #[test]
    fn test_rename_clash_rejected() {
        let mut s = session();
        s.enroll("Alice", Some(&frontal(0.1))).unwrap();
        s.enroll("Bob", Some(&frontal(0.5))).unwrap();
        let before = s.store().serialize().unwrap();
        let err = s.rename_person(1, "alice").unwrap_err();
        assert_eq!(err.kind(), "NameTaken");
        assert_eq!(s.store().serialize().unwrap(), before);
    }

    #[test]
    fn test_rename_merge_profile_moves_target() {
        let p = Profile {
            descriptor_dim: DIM,
            rename: RenamePolicy::Merge,
            ..Profile::strict()
        };
        let mut s = Session::open(MemoryBlobStore::new(), p).unwrap();
        s.enroll("Alice", Some(&frontal(0.1))).unwrap();
        s.enroll("Bob", Some(&frontal(0.5))).unwrap();
        s.select_target(Some(1)).unwrap();
        s.rename_person(1, "ALICE").unwrap();
        assert_eq!(s.people().len(), 1);
        assert_eq!(s.target().map(Target::name), Some("Alice"));
        assert!(s.classify(&q(0.5)).matched);
    }

    #[test]
    fn test_removing_last_sample_drops_person_from_matcher() {
        let mut s = session();
        s.enroll("Alice", Some(&frontal(0.1))).unwrap();
        let outcome = s.remove_sample(0, 0).unwrap();
        assert!(matches!(outcome, SampleRemoval::PersonRemoved(_)));
        assert!(!s.classify(&q(0.1)).matched);
    }

    #[test]
    fn test_persistence_failure_leaves_matcher_untouched() {
        let mut s = Session::open(FailingBlobStore, profile()).unwrap();
        let err = s.enroll("Alice", Some(&frontal(0.1))).unwrap_err();
        assert_eq!(err.kind(), "StorageFailure");
        assert!(s.people().is_empty());
        assert!(!s.classify(&q(0.1)).matched);
    }

    #[test]
    fn test_import_legacy_rebuilds_matcher() {
        let mut s = session();
        let legacy = r#"[{"name":"Old","photos":[{"descriptor":{"0":0.3,"1":0.3,"2":0.3,"3":0.3},"score":0.8}]}]"#;
        assert_eq!(s.import_legacy(legacy).unwrap(), 1);
        assert_eq!(s.classify(&q(0.3)).label, "Old");
    }
}
