//! Route paths served by the gateway router.

pub(super) const JSON_RPC_ROOT_ENDPOINT: &str = "/";
pub(super) const JSON_RPC_API_ENDPOINT: &str = "/api";
pub(super) const LIVEZ_ENDPOINT: &str = "/livez";
pub(super) const READYZ_ENDPOINT: &str = "/readyz";
pub(super) const DRAIN_ENDPOINT: &str = "/drain";
pub(super) const UNDRAIN_ENDPOINT: &str = "/undrain";
