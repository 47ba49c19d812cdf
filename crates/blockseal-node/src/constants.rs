/// Response bodies of the transaction endpoints.
pub(crate) const SUCCESS: &str = "Success";
pub(crate) const INVALID_SIGNATURE: &str = "Invalid signature";

pub(crate) const DEFAULT_LISTEN: &str = "127.0.0.1:5000";
