//! volto-core — Enrollment database and live matching logic for the kiosk.
//!
//! Face detection and descriptor extraction sit behind the [`FaceProvider`]
//! trait; everything here is plain data, persistence and threshold decisions.

pub mod blob;
pub mod crop;
pub mod detection;
pub mod efficacy;
pub mod matcher;
pub mod overlay;
pub mod profile;
pub mod quality;
pub mod scan;
pub mod schema;
pub mod session;
pub mod store;
pub mod types;

pub use blob::{BlobError, BlobStore, MemoryBlobStore, SqliteBlobStore};
pub use crop::{load_image, CropError, CropRect};
pub use detection::{Detection, DetectionError, FaceProvider, ProviderError};
pub use efficacy::{Efficacy, EfficacyPolicy, Tier};
pub use matcher::{
    Classifier, GalleryMatcher, LabelDistance, MatchEngine, MatchOutcome, TargetMatcher,
    UNKNOWN_LABEL,
};
pub use overlay::{DisplayPolicy, FaceReport, FrameReport};
pub use profile::{Profile, ProfileError};
pub use quality::{QualityGate, Rejection};
pub use scan::{ScanFlag, ScanTicket};
pub use session::{PersonSummary, Session, SessionError, Target, ADHOC_TARGET_NAME};
pub use store::{DescriptorStore, RenamePolicy, Renamed, SampleRemoval, StoreError};
pub use types::{Descriptor, FaceBox, LandmarkLayout, Landmarks, Person, Point, Sample};
