//! Strains: per-tenant routing rules
//!
//! A strain binds requests, by condition or URL prefix, to a content repository, a
//! static repository or a proxy origin.

mod condition;
mod model;
mod registry;

pub use condition::{Condition, ConditionInput, ConditionMatch};
pub use model::{
    GitLocation, ProxyOrigin, StaticConfig, StaticContent, Strain, StrainConfig,
    DEFAULT_CONTENT_URL, DEFAULT_DIRECTORY_INDEX, DEFAULT_STATIC_PATH,
};
pub use registry::{
    Selection, StrainRegistry, StrainRequest, DEFAULT_STRAIN, STRAIN_COOKIE, STRAIN_PARAM,
};
