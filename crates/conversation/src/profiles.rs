use providers::SessionBootstrap;
use shared::agent_api::BirthDetailPayload;
use shared::profile::ProfileDraft;
use shared::{ChatError, Profile};
use store::ChatStore;

/// Validate the form, start a remote session for it and store the profile
/// with the returned token. Nothing is stored when any step fails.
pub async fn register_profile<S>(
    store: &S,
    bootstrap: &dyn SessionBootstrap,
    draft: &ProfileDraft,
) -> Result<Profile, ChatError>
where
    S: ChatStore + ?Sized,
{
    let new_profile = draft.validate()?;

    let token = bootstrap
        .start_session(&BirthDetailPayload::from(&new_profile))
        .await
        .map_err(|e| {
            tracing::warn!(name = %new_profile.name, error = %e, "Could not start remote session");
            e
        })?;

    let profile = store
        .create_profile(new_profile.with_remote_session_token(token))
        .await?;
    tracing::info!(profile_id = %profile.id, name = %profile.name, "Profile registered");
    Ok(profile)
}
