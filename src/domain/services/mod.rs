mod client_resolver;
mod image_policy;
mod tier_router;

pub use client_resolver::{ClientResolver, DEFAULT_TRUSTED_HEADERS};
pub use image_policy::{
    ImagePolicy, ALLOWED_CONTENT_TYPES, MAX_IMAGE_BYTES, MIN_IMAGE_BYTES, SUPPORTED_LANGUAGES,
};
pub use tier_router::TierRouter;
