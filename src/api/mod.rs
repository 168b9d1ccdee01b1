pub(crate) mod attempts;
pub(crate) mod errors;
pub(crate) mod handlers;
pub(crate) mod router;
