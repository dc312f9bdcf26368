//! Provider factory using the inventory pattern for compile-time registration.
//!
//! Backends register themselves with `inventory::submit!`; the orchestrator
//! only ever asks for a [`ProviderKind`].

use super::{HypervisorProvider, ProviderKind, ProviderOptions};
use ffuforge_shared::errors::{FfuError, FfuResult};
use std::sync::Arc;

/// Type alias for provider factory functions.
pub type ProviderFactoryFn = fn(ProviderOptions) -> FfuResult<Arc<dyn HypervisorProvider>>;

/// Registration entry submitted by each backend.
pub struct ProviderRegistration {
    pub kind: ProviderKind,
    pub factory: ProviderFactoryFn,
}

inventory::collect!(ProviderRegistration);

/// Create a provider by looking up the registered factory.
///
/// # Returns
/// * `Ok(Arc<dyn HypervisorProvider>)` - Provider instance, availability not yet checked
/// * `Err(FfuError::ProviderUnavailable)` - Kind not compiled into this build
pub fn create_provider(
    kind: ProviderKind,
    options: ProviderOptions,
) -> FfuResult<Arc<dyn HypervisorProvider>> {
    for registration in inventory::iter::<ProviderRegistration> {
        if registration.kind == kind {
            tracing::debug!(provider = %kind, "Creating provider instance");
            return (registration.factory)(options);
        }
    }

    let available: Vec<_> = available_providers()
        .into_iter()
        .map(|k| k.as_str())
        .collect();

    Err(FfuError::ProviderUnavailable(format!(
        "provider {} is not compiled in. Available providers: [{}]",
        kind,
        available.join(", ")
    )))
}

/// Create a provider and check that its platform is usable.
///
/// `test_available` is the first call made on the instance; nothing else
/// runs against an unavailable platform.
pub async fn select_provider(
    kind: ProviderKind,
    options: ProviderOptions,
) -> FfuResult<Arc<dyn HypervisorProvider>> {
    let provider = create_provider(kind, options)?;
    if !provider.test_available().await {
        return Err(FfuError::ProviderUnavailable(format!(
            "{} is not installed or its service is not running",
            kind
        )));
    }
    tracing::info!(provider = %kind, "Hypervisor provider available");
    Ok(provider)
}

/// Check if a provider kind is registered.
pub fn is_registered(kind: ProviderKind) -> bool {
    inventory::iter::<ProviderRegistration>().any(|r| r.kind == kind)
}

/// All registered provider kinds.
pub fn available_providers() -> Vec<ProviderKind> {
    inventory::iter::<ProviderRegistration>()
        .map(|r| r.kind)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(feature = "hyperv")]
    fn test_hyperv_registered() {
        assert!(is_registered(ProviderKind::HyperV));
        assert!(available_providers().contains(&ProviderKind::HyperV));
    }

    #[test]
    #[cfg(feature = "workstation")]
    fn test_create_workstation_provider() {
        let provider = create_provider(ProviderKind::Workstation, ProviderOptions::default()).unwrap();
        assert_eq!(provider.kind(), ProviderKind::Workstation);
    }

    #[test]
    fn test_unregistered_provider_is_unavailable() {
        for kind in [ProviderKind::HyperV, ProviderKind::Workstation] {
            if !is_registered(kind) {
                let err = create_provider(kind, ProviderOptions::default()).err().unwrap();
                assert!(matches!(err, FfuError::ProviderUnavailable(_)));
            }
        }
    }
}
