pub mod authentication;
pub mod cascade;
pub mod comparer;
pub mod enrollment;
pub mod extractor;
pub mod locator;
pub mod pipeline;
pub mod store;

pub use authentication::{
    run_authentication_with, AuthenticationOutcome, AuthenticationRequest, ComparisonPath,
};

pub use cascade::{group_rectangles, CascadeFaceLocator, CascadeModel};

pub use comparer::{
    cosine_similarity, mean_squared_error, EmbeddingMatcher, MatchScore, Matcher, PixelMatcher,
};

pub use enrollment::{run_enrollment_with, validate_identity, EnrollmentOutcome, EnrollmentRequest};

pub use extractor::{
    resolve_model_paths, CommandEmbeddingModel, DlibEmbeddingModel, EmbeddingExtractor,
    EmbeddingModel, FaceModelPaths, FeatureExtractor, RawPixelExtractor, Representation,
    RepresentationKind, TransientArtifact,
};

pub use locator::{locate_primary_face, DlibFaceLocator, FaceBounds, FaceLocator, FaceRegion};

pub use pipeline::FacePipeline;

pub use store::{
    decode_record_key, resolve_store_layout, split_display_name, BlobStore, EnrollmentRecord,
    EnvStoreDirResolver, FilesystemBlobStore, FilesystemRecordStore, RecordStore,
    StoreDirResolver, StoreLayout,
};
