//! Port interfaces for platform-specific adapters

use std::sync::Arc;

use async_trait::async_trait;
use tether_domain::{
    AvailabilityItem, Credentials, MediaDescriptor, OperationKind, OperationOutput,
    OperationPayload, ProfileSnapshot, ProfileUpdate, Result,
};

use crate::pool::AutomationSession;

/// Automation capability for one external platform
///
/// One method per [`OperationKind`]; the orchestrator picks the method with
/// [`dispatch`].
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Log in with the target's credentials
    async fn authenticate(&self, credentials: &Credentials) -> Result<()>;

    /// Returns `(count, external_ids)`
    async fn push_availability(&self, items: &[AvailabilityItem]) -> Result<(u32, Vec<String>)>;

    /// Returns `(external_id, url)`
    async fn push_media(&self, media: &MediaDescriptor) -> Result<(String, String)>;

    /// Returns the names of the fields the platform accepted
    async fn update_profile(&self, profile: &ProfileUpdate) -> Result<Vec<String>>;

    /// Read the profile currently published on the platform
    async fn read_profile(&self) -> Result<ProfileSnapshot>;

    /// Always called once the operation ends, whatever the outcome
    async fn cleanup(&self) -> Result<()>;
}

/// Builds adapters bound to a target's credentials and, when the kind needs
/// one, a pooled session
pub trait AdapterFactory: Send + Sync {
    /// Build an adapter for one operation
    fn create(
        &self,
        credentials: &Credentials,
        session: Option<Arc<dyn AutomationSession>>,
    ) -> Result<Box<dyn PlatformAdapter>>;

    /// Whether `kind` drives a pooled session. API-backed adapters return
    /// `false` and never touch the pool.
    fn requires_session(&self, kind: OperationKind) -> bool {
        let _ = kind;
        true
    }
}

/// Invoke the adapter method matching `payload`
pub async fn dispatch(
    adapter: &dyn PlatformAdapter,
    credentials: &Credentials,
    payload: &OperationPayload,
) -> Result<OperationOutput> {
    match payload {
        OperationPayload::Authenticate => {
            adapter.authenticate(credentials).await?;
            Ok(OperationOutput::Authenticated)
        }
        OperationPayload::PushAvailability(items) => {
            let (count, external_ids) = adapter.push_availability(items).await?;
            Ok(OperationOutput::AvailabilityPushed { count, external_ids })
        }
        OperationPayload::PushMedia(media) => {
            let (external_id, url) = adapter.push_media(media).await?;
            Ok(OperationOutput::MediaPushed { external_id, url })
        }
        OperationPayload::UpdateProfile(profile) => {
            let updated_fields = adapter.update_profile(profile).await?;
            Ok(OperationOutput::ProfileUpdated { updated_fields })
        }
        OperationPayload::ReadProfile => Ok(OperationOutput::Profile(adapter.read_profile().await?)),
    }
}
