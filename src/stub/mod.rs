//! Stub mappings, matching and loading
//!
//! Mappings use the WireMock JSON layout so existing fixture trees load as-is.

mod loader;
mod mapping;
mod matcher;
mod registry;

pub use loader::{body_file_path, load_mappings, render_response, FILES_DIR, MAPPINGS_DIR};
pub use mapping::{
    BodyPattern, HeaderPattern, HeaderValues, RequestPattern, ResponseDefinition, StubMapping,
    DEFAULT_PRIORITY, FALLBACK_PRIORITY, SCENARIO_STARTED, STUB_NOT_FOUND_BODY,
};
pub use matcher::RequestMatcher;
pub use registry::{StubRegistry, StubRule};
