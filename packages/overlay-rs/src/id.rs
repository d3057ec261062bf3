//! Identifier generation for overlays and component keys.

use uuid::Uuid;

/// Produces collision-resistant string identifiers.
///
/// Used for overlay ids the caller did not supply and for the component key
/// that distinguishes successive mounts under one overlay id.
pub trait IdGenerator: Send + Sync + 'static {
    fn generate(&self) -> String;
}

/// Random UUID v4 identifiers in simple (unhyphenated) form.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync + 'static,
{
    fn generate(&self) -> String {
        self()
    }
}
